//! `/session` WebSocket endpoint — the browser-facing protocol (§6.1).
//!
//! Flow:
//! 1. Browser connects to `/session`.
//! 2. First JSON frame must be `{type: "authenticate", apiKey}`.
//! 3. Second JSON frame must be `{type: "configure", ...}`.
//! 4. Bidirectional loop: binary frames are mic audio (→ STT) or
//!    synthesized speech (→ browser); JSON frames are `cancel`/`reset`/
//!    `ping` inbound, the full `ServerEvent` vocabulary outbound.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;
use tracing::Instrument;
use va_domain::{AgentConfig, SecretsStore};
use va_stt::{SttEvent, SttLink};

use crate::protocol::{BrowserSink, ClientFrame, OutboundFrame, ServerEvent};
use crate::session::Session;
use crate::state::AppState;

const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn session_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundFrame>(128);
    let out = BrowserSink(outbound_tx);

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let sent = match frame {
                OutboundFrame::Event(event) => match serde_json::to_string(&event) {
                    Ok(json) => ws_sink.send(Message::Text(json)).await,
                    Err(_) => continue,
                },
                OutboundFrame::Audio(bytes) => ws_sink.send(Message::Binary(bytes)).await,
            };
            if sent.is_err() {
                break;
            }
        }
    });

    let api_key = match wait_for_authenticate(&mut ws_stream, &out).await {
        Some(key) => key,
        None => {
            writer.abort();
            return;
        }
    };

    let agent = match wait_for_configure(&mut ws_stream, &out).await {
        Some(agent) => agent,
        None => {
            writer.abort();
            return;
        }
    };

    let session_id = uuid::Uuid::new_v4().to_string();
    let session_span = tracing::info_span!("session", session_id = %session_id, state = tracing::field::Empty);
    tracing::info!(session_id = %session_id, "session configured");

    run_configured_session(state, api_key, agent, session_id, out, ws_stream, writer)
        .instrument(session_span)
        .await;
}

/// Everything from "we have a fully configured agent" through connection
/// teardown — split out of [`handle_socket`] so the whole lifetime runs
/// inside one `session` span (§[AMBIENT-LOGGING]).
#[allow(clippy::too_many_arguments)]
async fn run_configured_session(
    state: AppState,
    api_key: String,
    agent: AgentConfig,
    session_id: String,
    out: BrowserSink,
    mut ws_stream: futures_util::stream::SplitStream<WebSocket>,
    writer: tokio::task::JoinHandle<()>,
) {
    let secrets = lookup_secrets(&state.secrets, &api_key);
    let llm_api_key = if api_key.trim().is_empty() {
        state.config.llm.api_key.clone()
    } else {
        api_key.clone()
    };

    let stt = match SttLink::connect(state.config.stt.clone(), api_key.clone()).await {
        Ok((link, rx)) => (link, rx),
        Err(e) => {
            tracing::warn!(error = %e, "stt connect failed");
            out.event(ServerEvent::Error {
                message: va_domain::ClientError {
                    code: va_domain::ClientErrorCode::SttConnectFailed,
                    message: "could not reach speech recognition".to_string(),
                }
                .to_frame_message(),
            })
            .await;
            writer.abort();
            return;
        }
    };
    let (stt_link, mut stt_rx) = stt;

    let tts = Arc::new(state.new_tts_link().await);
    let sandbox = match state.new_sandbox().await {
        Ok(sandbox) => Arc::new(sandbox),
        Err(e) => {
            tracing::error!(error = %e, "sandbox init failed");
            out.event(ServerEvent::Error {
                message: "internal error starting session".to_string(),
            })
            .await;
            writer.abort();
            return;
        }
    };

    let mut session = Session::new(
        session_id,
        agent,
        state.llm.clone(),
        llm_api_key,
        state.config.llm.model.clone(),
        sandbox,
        secrets,
        tts,
        stt_link,
        state.cancel_map.clone(),
        state.config.stt.sample_rate,
        state.config.tts.sample_rate,
    );

    session.start(&out).await;
    tracing::Span::current().record("state", tracing::field::debug(session.state()));

    loop {
        tokio::select! {
            frame = ws_stream.next() => {
                match frame {
                    Some(Ok(Message::Binary(bytes))) => session.on_audio(bytes).await,
                    Some(Ok(Message::Text(text))) => {
                        handle_client_frame(&text, &mut session, &out).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            event = stt_rx.recv() => {
                match event {
                    Some(SttEvent::Transcript { text, .. }) => {
                        session.on_partial_transcript(text, &out).await;
                    }
                    Some(SttEvent::Turn { text }) => {
                        session.on_committed_transcript(text, out.clone());
                    }
                    Some(SttEvent::Error { message }) => {
                        tracing::warn!(%message, "stt error during active session");
                        out.event(ServerEvent::Error {
                            message: "speech recognition failed".to_string(),
                        })
                        .await;
                        break;
                    }
                    Some(SttEvent::Closed) | None => break,
                }
            }
        }
        tracing::Span::current().record("state", tracing::field::debug(session.state()));
    }

    session.stop().await;
    writer.abort();
    tracing::info!("session closed");
}

async fn handle_client_frame(text: &str, session: &mut Session, out: &BrowserSink) {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Cancel) => session.on_cancel(out).await,
        Ok(ClientFrame::Reset) => session.on_reset(out).await,
        Ok(ClientFrame::Ping) => out.event(ServerEvent::Pong {}).await,
        Ok(ClientFrame::Authenticate { .. }) | Ok(ClientFrame::Configure { .. }) => {
            // Already past the handshake; a stray repeat is ignored.
        }
        Err(_) => {
            // Unknown/malformed JSON frames are ignored silently (§6.1).
        }
    }
}

async fn wait_for_authenticate(
    stream: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    out: &BrowserSink,
) -> Option<String> {
    let first = tokio::time::timeout(FIRST_FRAME_TIMEOUT, stream.next()).await;
    let frame = match first {
        Ok(Some(Ok(Message::Text(text)))) => text,
        _ => {
            send_handshake_error(out).await;
            return None;
        }
    };

    match serde_json::from_str::<ClientFrame>(&frame) {
        Ok(ClientFrame::Authenticate { api_key }) => Some(api_key),
        _ => {
            send_handshake_error(out).await;
            None
        }
    }
}

async fn wait_for_configure(
    stream: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    out: &BrowserSink,
) -> Option<AgentConfig> {
    let second = tokio::time::timeout(FIRST_FRAME_TIMEOUT, stream.next()).await;
    let frame = match second {
        Ok(Some(Ok(Message::Text(text)))) => text,
        _ => {
            send_handshake_error(out).await;
            return None;
        }
    };

    match serde_json::from_str::<ClientFrame>(&frame) {
        Ok(ClientFrame::Configure {
            instructions,
            greeting,
            voice,
            prompt,
            tools,
        }) => Some(AgentConfig {
            instructions,
            greeting,
            voice: voice.unwrap_or_default(),
            wake_prompt: prompt,
            tools: tools.into_iter().map(|t| t.into_tool_definition()).collect(),
        }),
        _ => {
            send_handshake_error(out).await;
            None
        }
    }
}

async fn send_handshake_error(out: &BrowserSink) {
    out.event(ServerEvent::Error {
        message: va_domain::ClientError {
            code: va_domain::ClientErrorCode::ConfigureInvalid,
            message: "expected authenticate then configure".to_string(),
        }
        .to_frame_message(),
    })
    .await;
}

/// Constant-time lookup: hash both the provided key and every stored key
/// before comparing, the way the node WebSocket handshake compares
/// pre-shared tokens.
fn lookup_secrets(store: &SecretsStore, api_key: &str) -> HashMap<String, String> {
    let provided = Sha256::digest(api_key.as_bytes());
    for (stored_key, secrets) in store {
        let stored = Sha256::digest(stored_key.as_bytes());
        if provided.ct_eq(&stored).into() {
            return secrets.clone();
        }
    }
    HashMap::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_secrets_matches_exact_key() {
        let mut store = SecretsStore::new();
        let mut secrets = HashMap::new();
        secrets.insert("WEATHER_KEY".to_string(), "abc".to_string());
        store.insert("customer-1".to_string(), secrets);

        let found = lookup_secrets(&store, "customer-1");
        assert_eq!(found.get("WEATHER_KEY").map(String::as_str), Some("abc"));
    }

    #[test]
    fn lookup_secrets_returns_empty_for_unknown_key() {
        let store = SecretsStore::new();
        assert!(lookup_secrets(&store, "nobody").is_empty());
    }
}
