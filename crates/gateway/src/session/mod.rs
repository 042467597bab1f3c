//! A single browser connection's orchestrator state (§4.1, §4.2, §4.4).
//!
//! `Session` owns everything that belongs to one conversation: history,
//! the upstream STT link, the warm TTS link, the sandbox, and the
//! customer-supplied tool set. It exposes the public contract the
//! WebSocket handler drives — `start`, `on_audio`, `on_partial_transcript`,
//! `on_committed_transcript`, `on_cancel`, `on_reset`, `stop` — and nothing
//! else touches `shared.history` directly.

pub mod cancel;
pub mod tools;
pub mod turn;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;
use va_domain::{AgentConfig, ChatMessage, SessionState, ToolDefinition};
use va_llm::LlmClient;
use va_sandbox::Sandbox;
use va_stt::SttLink;
use va_tts::TtsLink;

pub use cancel::CancelMap;

use crate::protocol::{BrowserSink, ServerEvent};

/// State a spawned turn task needs. Split out from `Session` so a turn can
/// hold just an `Arc<SessionShared>` rather than borrowing the whole
/// session — that's what lets the connection task keep driving `on_cancel`
/// / `on_reset` while a turn is in flight.
///
/// `state` lives here rather than on `Session` itself: a turn runs on its
/// own spawned task (so a `cancel` frame can interrupt it), and still needs
/// to advance the machine through `thinking → speaking → listening` as it
/// progresses, same as `Session::transition` would from the connection
/// task. One coercion-aware setter, shared by both sides.
pub struct SessionShared {
    pub id: String,
    pub history: Mutex<Vec<ChatMessage>>,
    pub tools: Vec<ToolDefinition>,
    pub llm: Arc<dyn LlmClient>,
    /// The credential forwarded as `apiKey` on every LLM call: the
    /// customer's own key from the `authenticate` frame, or the gateway's
    /// configured fallback if they didn't send one.
    pub llm_api_key: String,
    pub model: String,
    pub sandbox: Arc<Sandbox>,
    pub secrets: HashMap<String, String>,
    pub tts: Arc<TtsLink>,
    pub voice: String,
    pub state: SyncMutex<SessionState>,
}

impl SessionShared {
    pub fn current_state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Invalid transitions are coerced rather than rejected (§4.1); this
    /// just logs a warning, it never panics or blocks a caller.
    pub fn transition(&self, to: SessionState) {
        let mut state = self.state.lock();
        if !state.is_legal_transition(to) {
            tracing::debug!(session = %self.id, from = ?*state, to = ?to, "coercing illegal state transition");
        }
        *state = to;
    }
}

pub struct Session {
    pub id: String,
    pub shared: Arc<SessionShared>,
    pub stt: SttLink,
    pub cancel_map: Arc<CancelMap>,
    pub stt_sample_rate: u32,
    pub tts_sample_rate: u32,
    instructions: String,
    greeting: String,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        agent: AgentConfig,
        llm: Arc<dyn LlmClient>,
        llm_api_key: String,
        model: String,
        sandbox: Arc<Sandbox>,
        secrets: HashMap<String, String>,
        tts: Arc<TtsLink>,
        stt: SttLink,
        cancel_map: Arc<CancelMap>,
        stt_sample_rate: u32,
        tts_sample_rate: u32,
    ) -> Self {
        let voice = if agent.voice.trim().is_empty() {
            "jess".to_string()
        } else {
            agent.voice.clone()
        };

        Self {
            id: id.clone(),
            shared: Arc::new(SessionShared {
                id,
                history: Mutex::new(seed_history(&agent.instructions)),
                tools: agent.tools,
                llm,
                llm_api_key,
                model,
                sandbox,
                secrets,
                tts,
                voice,
                state: SyncMutex::new(SessionState::Configured),
            }),
            stt,
            cancel_map,
            stt_sample_rate,
            tts_sample_rate,
            instructions: agent.instructions,
            greeting: agent.greeting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.current_state()
    }

    /// Entry into the session after a successful `configure` (§4.1 step 1):
    /// emit `ready`, speak the greeting if configured, and land in
    /// `Listening`.
    pub async fn start(&mut self, out: &BrowserSink) {
        out.event(ServerEvent::Ready {
            sample_rate: self.stt_sample_rate,
            tts_sample_rate: self.tts_sample_rate,
        })
        .await;

        if !self.greeting.trim().is_empty() {
            self.shared.transition(SessionState::Speaking);
            out.event(ServerEvent::Greeting {
                text: self.greeting.clone(),
            })
            .await;
            {
                let mut history = self.shared.history.lock().await;
                history.push(ChatMessage::assistant_text(self.greeting.clone()));
            }

            let token = self.cancel_map.register(&self.id);
            turn::speak(&self.shared, &self.greeting.clone(), &token, out).await;
            self.cancel_map.remove_if_current(&self.id, &token);
        }

        self.shared.transition(SessionState::Listening);
    }

    /// Forward raw mic audio to the upstream STT socket. Cheap fire-and-
    /// forget into a channel; never blocks on the network.
    pub async fn on_audio(&self, frame: Vec<u8>) {
        self.stt.send(frame).await;
    }

    /// A non-final partial transcript: echoed straight to the browser,
    /// no state change, no history mutation (§4.2).
    pub async fn on_partial_transcript(&self, text: String, out: &BrowserSink) {
        out.event(ServerEvent::Transcript { text }).await;
    }

    /// A finalized ("turn") transcript: starts a new turn, cancelling
    /// whatever turn (or greeting) was still in flight — this is how
    /// barge-in works (§4.1, §5).
    pub fn on_committed_transcript(&mut self, text: String, out: BrowserSink) {
        self.cancel_map.cancel(&self.id);
        self.shared.transition(SessionState::Thinking);

        let token = self.cancel_map.register(&self.id);
        let cleanup_token = token.clone();
        let cancel_map = self.cancel_map.clone();
        let id = self.id.clone();
        let shared = self.shared.clone();

        tokio::spawn(async move {
            turn::run_turn(shared, text, token, out).await;
            cancel_map.remove_if_current(&id, &cleanup_token);
        });
    }

    /// Cancel whatever turn is running, clear the STT buffer, and return
    /// to `Listening` (§4.1: cancel never closes the connection).
    pub async fn on_cancel(&mut self, out: &BrowserSink) {
        self.cancel_map.cancel(&self.id);
        self.stt.clear().await;
        self.shared.transition(SessionState::Listening);
        out.event(ServerEvent::Cancelled {}).await;
    }

    /// Cancel the running turn, clear the STT buffer, and wipe history
    /// back to just the system instructions (§4.1).
    pub async fn on_reset(&mut self, out: &BrowserSink) {
        self.cancel_map.cancel(&self.id);
        self.stt.clear().await;
        {
            let mut history = self.shared.history.lock().await;
            *history = seed_history(&self.instructions);
        }
        self.shared.transition(SessionState::Listening);
        out.event(ServerEvent::Reset {}).await;
    }

    /// Tear everything down on disconnect. Safe to call once; nothing
    /// here is re-entrant beyond its own idempotent guards.
    pub async fn stop(&mut self) {
        self.cancel_map.cancel(&self.id);
        self.cancel_map.remove(&self.id);
        self.stt.close().await;
        self.shared.tts.close().await;
        self.shared.sandbox.dispose().await;
        self.shared.transition(SessionState::Closed);
    }
}

fn seed_history(instructions: &str) -> Vec<ChatMessage> {
    if instructions.trim().is_empty() {
        Vec::new()
    } else {
        vec![ChatMessage::system(instructions.to_string())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_history_is_empty_without_instructions() {
        assert!(seed_history("").is_empty());
        assert!(seed_history("   ").is_empty());
    }

    #[test]
    fn seed_history_carries_a_single_system_message() {
        let history = seed_history("be terse");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, va_domain::Role::System);
        assert_eq!(history[0].content.as_deref(), Some("be terse"));
    }
}
