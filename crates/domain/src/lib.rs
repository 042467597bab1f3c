pub mod cancel;
pub mod config;
pub mod error;
pub mod message;
pub mod schema;
pub mod session;

pub use cancel::CancelToken;
pub use config::{Config, ConfigIssue, ConfigSeverity, SecretsStore};
pub use error::{ClientError, ClientErrorCode, Error, Result};
pub use message::{ChatMessage, Role, ToolCall, ToolDefinition, ToolHandler};
pub use session::{AgentConfig, SessionState};
