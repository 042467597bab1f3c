//! Browser ↔ server WebSocket JSON frame vocabulary (§6.1).

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use va_domain::{ToolDefinition, ToolHandler};

/// JSON frames the browser sends. Binary frames (raw PCM16 mic audio) are
/// handled separately in the WebSocket loop, not through this enum.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Authenticate {
        #[serde(rename = "apiKey")]
        api_key: String,
    },
    Configure {
        #[serde(default)]
        instructions: String,
        #[serde(default)]
        greeting: String,
        voice: Option<String>,
        prompt: Option<String>,
        #[serde(default)]
        tools: Vec<ClientToolDef>,
    },
    Cancel,
    Reset,
    Ping,
}

/// The wire shape of a customer tool declaration, as received on the
/// `configure` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientToolDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Function-expression source. Absent for a built-in tool (e.g.
    /// `web_search`).
    pub source: Option<String>,
}

impl ClientToolDef {
    pub fn into_tool_definition(self) -> ToolDefinition {
        let parameters = va_domain::schema::to_json_schema(&self.parameters);
        let handler = match self.source {
            Some(source) => ToolHandler::Sandboxed { source },
            None => ToolHandler::BuiltIn,
        };
        ToolDefinition {
            name: self.name,
            description: self.description,
            parameters,
            handler,
        }
    }
}

/// JSON frames the server sends. Binary frames (synthesized PCM16) are
/// sent directly, not through this enum.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Ready {
        #[serde(rename = "sampleRate")]
        sample_rate: u32,
        #[serde(rename = "ttsSampleRate")]
        tts_sample_rate: u32,
    },
    Greeting {
        text: String,
    },
    Transcript {
        text: String,
    },
    Turn {
        text: String,
    },
    Thinking {},
    Chat {
        text: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        steps: Vec<String>,
    },
    TtsDone {},
    Cancelled {},
    Reset {},
    Error {
        message: String,
    },
    Pong {},
}

/// What the writer task sends down the socket: either a JSON event frame
/// or a raw binary PCM16 audio frame.
pub enum OutboundFrame {
    Event(ServerEvent),
    Audio(Vec<u8>),
}

/// Handle the session and turn tasks use to talk back to the browser
/// writer task. Cloning is cheap; a dropped receiver (socket gone) just
/// makes sends silently no-op rather than panic.
#[derive(Clone)]
pub struct BrowserSink(pub mpsc::Sender<OutboundFrame>);

impl BrowserSink {
    pub async fn event(&self, event: ServerEvent) {
        let _ = self.0.send(OutboundFrame::Event(event)).await;
    }

    pub async fn audio(&self, bytes: Vec<u8>) {
        let _ = self.0.send(OutboundFrame::Audio(bytes)).await;
    }
}
