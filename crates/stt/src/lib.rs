//! Streaming speech-to-text link (§4.2).
//!
//! Owns the ephemeral-token mint, the upstream WebSocket, and the
//! 80%-of-lifetime token refresh with seamless dual-socket handoff. Events
//! are dispatched to a single `mpsc` receiver owned by the session task —
//! this is the "tagged-variant channel whose single consumer is the
//! session task" pattern the design notes call for, so the orchestrator
//! never touches a socket directly.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use va_domain::config::SttConfig;
use va_domain::error::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Fan-in events the orchestrator consumes. Mirrors `onTranscript` /
/// `onTurn` / `onError` / `onClose` from the design notes.
#[derive(Debug, Clone)]
pub enum SttEvent {
    Transcript { text: String, is_final: bool },
    Turn { text: String },
    Error { message: String },
    Closed,
}

enum SttCommand {
    Audio(Vec<u8>),
    Clear,
    Close,
}

/// Handle held by the session task. Cloning is cheap; all clones share the
/// same upstream connection(s).
#[derive(Clone)]
pub struct SttLink {
    cmd_tx: mpsc::Sender<SttCommand>,
}

impl SttLink {
    /// Open the link: mint a token, connect, and start the background
    /// manager task. Returns the handle plus the event receiver.
    #[tracing::instrument(name = "stt.connect", skip(cfg, customer_api_key))]
    pub async fn connect(
        cfg: SttConfig,
        customer_api_key: String,
    ) -> Result<(Self, mpsc::Receiver<SttEvent>)> {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (cmd_tx, cmd_rx) = mpsc::channel(256);

        let manager = SttManager {
            cfg,
            customer_api_key,
            http: reqwest::Client::new(),
            event_tx,
        };

        // Establish the first socket synchronously so `connect()` reports a
        // connect failure to the caller instead of only via `onClose`.
        let socket = manager.open_socket().await?;
        tokio::spawn(manager.run(socket, cmd_rx));

        Ok((Self { cmd_tx }, event_rx))
    }

    /// Forward raw audio to the upstream socket. No-op if the link has
    /// already been closed.
    pub async fn send(&self, audio: Vec<u8>) {
        let _ = self.cmd_tx.send(SttCommand::Audio(audio)).await;
    }

    /// Force-finalize any partial turn.
    pub async fn clear(&self) {
        let _ = self.cmd_tx.send(SttCommand::Clear).await;
    }

    pub async fn close(&self) {
        let _ = self.cmd_tx.send(SttCommand::Close).await;
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct SttManager {
    cfg: SttConfig,
    customer_api_key: String,
    http: reqwest::Client,
    event_tx: mpsc::Sender<SttEvent>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl SttManager {
    /// Mint an ephemeral token then open the streaming WebSocket.
    async fn open_socket(&self) -> Result<WsStream> {
        let token = self.mint_token().await?;
        let url = build_ws_url(&self.cfg, &token);

        let connect = tokio_tungstenite::connect_async(&url);
        let (ws, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect)
            .await
            .map_err(|_| Error::Timeout("stt connect".into()))?
            .map_err(|e| Error::Upstream {
                provider: "stt".into(),
                message: e.to_string(),
            })?;
        Ok(ws)
    }

    async fn mint_token(&self) -> Result<String> {
        let response = self
            .http
            .get(&self.cfg.token_mint_url)
            .bearer_auth(&self.customer_api_key)
            .send()
            .await
            .map_err(|e| Error::Upstream {
                provider: "stt".into(),
                message: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(Error::Upstream {
                provider: "stt".into(),
                message: format!("token mint HTTP {}", response.status()),
            });
        }
        let parsed: TokenResponse = response.json().await.map_err(|e| Error::Upstream {
            provider: "stt".into(),
            message: e.to_string(),
        })?;
        Ok(parsed.access_token)
    }

    /// Drive one active socket (plus, briefly during refresh, an outgoing
    /// one) until the link is closed or the socket dies unexpectedly.
    async fn run(self, initial_socket: WsStream, mut cmd_rx: mpsc::Receiver<SttCommand>) {
        let manager = Arc::new(self);
        let mut active = spawn_socket_tasks(initial_socket, manager.event_tx.clone());
        let refresh_after = Duration::from_secs((manager.cfg.token_lifetime_secs * 4) / 5);
        let mut refresh_timer = Box::pin(tokio::time::sleep(refresh_after));

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SttCommand::Audio(bytes)) => {
                            if active.writer.send(Message::Binary(bytes)).await.is_err() {
                                break;
                            }
                        }
                        Some(SttCommand::Clear) => {
                            let frame = serde_json::json!({"type": "ForceEndpoint"}).to_string();
                            let _ = active.writer.send(Message::Text(frame)).await;
                        }
                        Some(SttCommand::Close) | None => {
                            let _ = active.writer.send(Message::Close(None)).await;
                            break;
                        }
                    }
                }
                _ = &mut refresh_timer => {
                    match manager.open_socket().await {
                        Ok(fresh) => {
                            let old = std::mem::replace(
                                &mut active,
                                spawn_socket_tasks(fresh, manager.event_tx.clone()),
                            );
                            // Seamless handoff: close the old socket only
                            // after the new one is live. Both dispatch to
                            // the same event_tx until this point.
                            let _ = old.writer.send(Message::Close(None)).await;
                            refresh_timer = Box::pin(tokio::time::sleep(refresh_after));
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "stt token refresh failed, keeping current socket");
                            // Keep the current socket; if it later closes,
                            // the reader task already propagates Closed.
                            refresh_timer = Box::pin(tokio::time::sleep(Duration::from_secs(30)));
                        }
                    }
                }
            }
        }
    }
}

struct ActiveSocket {
    writer: mpsc::Sender<Message>,
}

/// Spawn the writer and reader halves for one socket. The reader forwards
/// every inbound message to `event_tx`; unrecognized or malformed payloads
/// are logged and skipped, never fatal (§4.2).
fn spawn_socket_tasks(socket: WsStream, event_tx: mpsc::Sender<SttEvent>) -> ActiveSocket {
    let (mut sink, mut stream) = socket.split();
    let (writer_tx, mut writer_rx) = mpsc::channel::<Message>(256);

    tokio::spawn(async move {
        while let Some(msg) = writer_rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if let Some(event) = parse_upstream_message(&text) {
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    let _ = event_tx.send(SttEvent::Closed).await;
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    let _ = event_tx
                        .send(SttEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                    break;
                }
            }
        }
    });

    ActiveSocket { writer: writer_tx }
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum UpstreamMessage {
    Transcript {
        text: String,
        #[serde(default)]
        is_final: bool,
    },
    Turn {
        text: String,
        #[serde(default)]
        turn_is_formatted: bool,
    },
}

fn parse_upstream_message(text: &str) -> Option<SttEvent> {
    match serde_json::from_str::<UpstreamMessage>(text) {
        Ok(UpstreamMessage::Transcript { text, is_final }) => {
            Some(SttEvent::Transcript { text, is_final })
        }
        Ok(UpstreamMessage::Turn {
            text,
            turn_is_formatted,
        }) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                None
            } else if turn_is_formatted {
                Some(SttEvent::Turn {
                    text: trimmed.to_string(),
                })
            } else {
                Some(SttEvent::Transcript {
                    text: trimmed.to_string(),
                    is_final: false,
                })
            }
        }
        Err(_) => None,
    }
}

fn build_ws_url(cfg: &SttConfig, token: &str) -> String {
    format!(
        "{}?sample_rate={}&model=nova-2&token={}&turn_formatting=true&endpointing=300",
        cfg.ws_base_url, cfg.sample_rate, token
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_includes_sample_rate_and_token() {
        let cfg = SttConfig {
            ws_base_url: "wss://example.com/listen".into(),
            sample_rate: 16_000,
            ..Default::default()
        };
        let url = build_ws_url(&cfg, "tok123");
        assert!(url.contains("sample_rate=16000"));
        assert!(url.contains("token=tok123"));
    }

    #[test]
    fn formatted_turn_with_text_is_committed() {
        let msg = r#"{"type":"Turn","text":"hello there","turn_is_formatted":true}"#;
        match parse_upstream_message(msg) {
            Some(SttEvent::Turn { text }) => assert_eq!(text, "hello there"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unformatted_turn_is_echoed_as_partial() {
        let msg = r#"{"type":"Turn","text":"hello","turn_is_formatted":false}"#;
        match parse_upstream_message(msg) {
            Some(SttEvent::Transcript { text, is_final }) => {
                assert_eq!(text, "hello");
                assert!(!is_final);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn empty_turn_is_dropped() {
        let msg = r#"{"type":"Turn","text":"   ","turn_is_formatted":true}"#;
        assert!(parse_upstream_message(msg).is_none());
    }

    #[test]
    fn malformed_json_is_skipped_not_fatal() {
        assert!(parse_upstream_message("not json").is_none());
    }

    #[test]
    fn transcript_message_preserves_final_flag() {
        let msg = r#"{"type":"Transcript","text":"partial","is_final":true}"#;
        match parse_upstream_message(msg) {
            Some(SttEvent::Transcript { is_final, .. }) => assert!(is_final),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
