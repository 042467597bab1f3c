/// Shared error type used across the voice-agent gateway crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("upstream {provider}: {message}")]
    Upstream { provider: String, message: String },

    #[error("sandbox: {0}")]
    Sandbox(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Machine-checkable codes surfaced to the browser as the `error{message}`
/// frame's payload. Distinct from [`Error`]: this is the small, stable,
/// user-facing taxonomy described in the error handling design, not the
/// internal plumbing error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientErrorCode {
    ChatFailed,
    TtsFailed,
    SttConnectFailed,
    ConfigureInvalid,
    AuthInvalid,
}

#[derive(Debug, Clone)]
pub struct ClientError {
    pub code: ClientErrorCode,
    pub message: String,
}

impl ClientError {
    pub fn new(code: ClientErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Render as the single string carried by the `error{message}` browser
    /// frame: `"<CODE>: <message>"`.
    pub fn to_frame_message(&self) -> String {
        format!("{:?}: {}", self.code, self.message)
    }
}
