//! Streaming text-to-speech link (§4.4).
//!
//! Holds at most one *warm* upstream socket at rest — a two-slot state,
//! `Idle(conn)` or `Busy`, no queue (§9 design note). `synthesize` consumes
//! the warm slot and, unless the session is closing, re-warms it for the
//! next call.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use va_domain::cancel::CancelToken;
use va_domain::config::TtsConfig;
use va_domain::error::{Error, Result};

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const END_SENTINEL: &str = "__END__";

enum Slot {
    Idle(WsStream),
    Empty,
}

pub struct TtsLink {
    cfg: TtsConfig,
    api_key: String,
    slot: Mutex<Slot>,
}

impl TtsLink {
    /// Construct the link. Opens the first warm socket eagerly when
    /// credentials are present; a missing/failed warm-up is not fatal —
    /// the next `synthesize` call opens a fresh socket instead.
    pub async fn new(cfg: TtsConfig, api_key: String) -> Self {
        let slot = if api_key.is_empty() {
            Slot::Empty
        } else {
            match open_socket(&cfg, &api_key).await {
                Ok(ws) => Slot::Idle(ws),
                Err(e) => {
                    tracing::warn!(error = %e, "tts warm-up failed, will connect lazily");
                    Slot::Empty
                }
            }
        };
        Self {
            cfg,
            api_key,
            slot: Mutex::new(slot),
        }
    }

    /// Synthesize `text`, forwarding every upstream binary chunk on
    /// `chunk_tx` as it arrives. Resolves on upstream close, short-circuits
    /// to an immediate resolve if `cancel` has already fired, and resolves
    /// (without forwarding further chunks) if cancelled mid-stream.
    #[tracing::instrument(name = "tts.synthesize", skip(self, chunk_tx, cancel), fields(voice, chars = text.len()))]
    pub async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        chunk_tx: mpsc::Sender<Vec<u8>>,
        cancel: CancelToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let socket = self.take_or_open().await?;
        let (mut sink, mut stream) = socket.split();

        let header = serde_json::json!({
            "voice": voice,
            "sample_rate": self.cfg.sample_rate,
            "buffer_size": 4096,
        })
        .to_string();
        sink.send(Message::Text(header))
            .await
            .map_err(|e| Error::Upstream { provider: "tts".into(), message: e.to_string() })?;

        for word in text.split_whitespace() {
            if cancel.is_cancelled() {
                break;
            }
            sink.send(Message::Text(word.to_string()))
                .await
                .map_err(|e| Error::Upstream { provider: "tts".into(), message: e.to_string() })?;
        }

        if !cancel.is_cancelled() {
            let _ = sink.send(Message::Text(END_SENTINEL.to_string())).await;
        }

        let mut result = Ok(());
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match stream.next().await {
                Some(Ok(Message::Binary(bytes))) => {
                    if chunk_tx.send(bytes).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    result = Err(Error::Upstream {
                        provider: "tts".into(),
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }

        // Tear down without waiting for drain on cancellation; otherwise
        // recombine and let the connection close on drop.
        drop(sink);
        drop(stream);

        if result.is_ok() && !cancel.is_cancelled() {
            self.rewarm().await;
        }
        result
    }

    /// Take the warm socket if present, else open a fresh one.
    async fn take_or_open(&self) -> Result<WsStream> {
        let mut slot = self.slot.lock().await;
        let taken = std::mem::replace(&mut *slot, Slot::Empty);
        match taken {
            Slot::Idle(ws) => Ok(ws),
            Slot::Empty => open_socket(&self.cfg, &self.api_key).await,
        }
    }

    async fn rewarm(&self) {
        match open_socket(&self.cfg, &self.api_key).await {
            Ok(ws) => {
                *self.slot.lock().await = Slot::Idle(ws);
            }
            Err(e) => {
                tracing::warn!(error = %e, "tts re-warm failed");
                *self.slot.lock().await = Slot::Empty;
            }
        }
    }

    /// Called at session teardown: drop any warm connection without
    /// re-warming.
    pub async fn close(&self) {
        *self.slot.lock().await = Slot::Empty;
    }
}

async fn open_socket(cfg: &TtsConfig, api_key: &str) -> Result<WsStream> {
    let url = format!("{}?api_key={}", cfg.ws_url, api_key);
    let connect = tokio_tungstenite::connect_async(&url);
    let (ws, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect)
        .await
        .map_err(|_| Error::Timeout("tts connect".into()))?
        .map_err(|e| Error::Upstream {
            provider: "tts".into(),
            message: e.to_string(),
        })?;
    Ok(ws)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn already_cancelled_token_short_circuits() {
        let link = TtsLink::new(TtsConfig::default(), String::new()).await;
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = link.synthesize("hello world", "jess", tx, cancel).await;
        assert!(result.is_ok());
        assert!(rx.try_recv().is_err());
    }
}
