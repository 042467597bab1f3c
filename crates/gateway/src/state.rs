use std::sync::Arc;

use va_domain::config::Config;
use va_domain::SecretsStore;
use va_llm::LlmClient;
use va_sandbox::Sandbox;
use va_tts::TtsLink;

use crate::session::CancelMap;

/// Shared application state passed to every connection handler.
///
/// Deliberately small: there is no session store here because a browser
/// connection *is* its session for its whole lifetime — the WebSocket
/// handler owns the `Session` directly rather than looking one up by id.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub secrets: Arc<SecretsStore>,
    pub llm: Arc<dyn LlmClient>,
    pub cancel_map: Arc<CancelMap>,
}

impl AppState {
    pub fn new(config: Config, secrets: SecretsStore, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            config: Arc::new(config),
            secrets: Arc::new(secrets),
            llm,
            cancel_map: Arc::new(CancelMap::new()),
        }
    }

    /// Build a fresh per-session TTS link and sandbox. Each browser
    /// connection gets its own warm TTS socket and its own isolate
    /// (§4.4, §4.5: "one isolate per session").
    pub async fn new_tts_link(&self) -> TtsLink {
        TtsLink::new(self.config.tts.clone(), self.config.tts.api_key.clone()).await
    }

    pub async fn new_sandbox(&self) -> Result<Sandbox, String> {
        Sandbox::new().await
    }
}
