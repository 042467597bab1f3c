//! Per-session state machine and configuration shapes.

use serde::{Deserialize, Serialize};

use crate::message::ToolDefinition;

/// The orchestrator's state machine (§4.1). `Error` is terminal, same as
/// `Closed`, but kept distinct so a failed session can be told apart from
/// a clean disconnect in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    AwaitingConfigure,
    Configured,
    Listening,
    Thinking,
    Speaking,
    Closed,
    Error,
}

impl SessionState {
    /// Invalid transitions are coerced rather than rejected (§4.1: "the
    /// state machine coerces to the requested state"); this just logs
    /// a warning for the caller to emit, it never panics or errors.
    pub fn is_legal_transition(self, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Connecting, AwaitingConfigure)
                | (AwaitingConfigure, Configured)
                | (Configured, Speaking)
                | (Speaking, Listening)
                | (Listening, Thinking)
                | (Thinking, Speaking)
                | (Thinking, Listening)
                | (Speaking, Thinking) // barge-in: new turn cuts speaking short
                | (_, Closed)
                | (_, Error)
        )
    }
}

/// Per-session agent configuration, supplied by the `configure` frame.
#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    pub instructions: String,
    pub greeting: String,
    pub voice: String,
    pub wake_prompt: Option<String>,
    pub tools: Vec<ToolDefinition>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn legal_happy_path_transitions() {
        assert!(Connecting.is_legal_transition(AwaitingConfigure));
        assert!(AwaitingConfigure.is_legal_transition(Configured));
        assert!(Configured.is_legal_transition(Speaking));
        assert!(Speaking.is_legal_transition(Listening));
        assert!(Listening.is_legal_transition(Thinking));
        assert!(Thinking.is_legal_transition(Speaking));
    }

    #[test]
    fn any_state_can_close_or_error() {
        assert!(Thinking.is_legal_transition(Closed));
        assert!(Listening.is_legal_transition(Error));
    }

    #[test]
    fn skipping_listening_is_not_legal_but_not_enforced() {
        // The spec explicitly does not enforce this as a hard error — the
        // machine just coerces — so this only documents the check exists.
        assert!(!Connecting.is_legal_transition(Thinking));
    }
}
