//! Per-session cancellation registry.
//!
//! Each in-flight turn gets a `CancelToken` (re-exported from `va_domain`).
//! `CancelMap` tracks the currently-registered token per session so the
//! connection task can cancel "whatever turn is running now" without
//! holding a reference to it directly.

use std::collections::HashMap;

use parking_lot::Mutex;
use va_domain::CancelToken;

pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Create and register a new cancel token for a session, replacing any
    /// previous one (the old token is simply orphaned).
    pub fn register(&self, session_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens
            .lock()
            .insert(session_id.to_owned(), token.clone());
        token
    }

    /// Cancel the running turn for a session. Returns true if a token was
    /// found. Idempotent: a second call just finds the same (already
    /// cancelled) token again.
    pub fn cancel(&self, session_id: &str) -> bool {
        if let Some(token) = self.tokens.lock().get(session_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Remove the token for a session (called when a turn completes).
    pub fn remove(&self, session_id: &str) {
        self.tokens.lock().remove(session_id);
    }

    /// Remove the token for a session only if it's still `token` — guards
    /// against a just-finished turn clobbering the entry a newer, barge-in
    /// turn already registered.
    pub fn remove_if_current(&self, session_id: &str, token: &CancelToken) {
        let mut tokens = self.tokens.lock();
        if tokens.get(session_id).is_some_and(|current| current.is_same(token)) {
            tokens.remove(session_id);
        }
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.tokens.lock().contains_key(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_cancel() {
        let map = CancelMap::new();
        let token = map.register("s1");
        assert!(!token.is_cancelled());
        assert!(map.is_running("s1"));

        assert!(map.cancel("s1"));
        assert!(token.is_cancelled());

        map.remove("s1");
        assert!(!map.is_running("s1"));
        assert!(!map.cancel("s1"));
    }

    #[test]
    fn cancel_nonexistent_session_returns_false() {
        let map = CancelMap::new();
        assert!(!map.cancel("ghost"));
    }

    #[test]
    fn remove_is_idempotent() {
        let map = CancelMap::new();
        map.register("s1");
        map.remove("s1");
        map.remove("s1");
        assert!(!map.is_running("s1"));
    }

    #[test]
    fn register_replaces_previous_token() {
        let map = CancelMap::new();
        let old_token = map.register("s1");
        let new_token = map.register("s1");
        assert!(!old_token.is_cancelled());

        map.cancel("s1");
        assert!(new_token.is_cancelled());
    }

    #[test]
    fn double_cancel_is_idempotent() {
        let map = CancelMap::new();
        let token = map.register("s1");
        assert!(map.cancel("s1"));
        assert!(map.cancel("s1"));
        assert!(token.is_cancelled());
    }

    #[test]
    fn remove_if_current_ignores_stale_token() {
        let map = CancelMap::new();
        let stale = map.register("s1");
        let current = map.register("s1");
        map.remove_if_current("s1", &stale);
        assert!(map.is_running("s1"));
        map.remove_if_current("s1", &current);
        assert!(!map.is_running("s1"));
    }
}
