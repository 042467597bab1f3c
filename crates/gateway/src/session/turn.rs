//! Turn execution loop (§4.1 step 4): history mutation, the bounded tool
//! loop, and the hand-off into text-to-speech.
//!
//! Spawned per turn rather than awaited inline by the connection's read
//! loop — that's what lets a `cancel` frame arriving mid-turn actually cut
//! it short instead of queueing behind it. The turn only ever touches its
//! own session's `history` mutex and never another session's.

use std::sync::Arc;

use tokio::sync::mpsc;
use va_domain::{CancelToken, ChatMessage, ClientError, ClientErrorCode, Role, ToolHandler};
use va_llm::ChatOutcome;

use crate::normalize::normalize_for_speech;
use crate::protocol::{BrowserSink, ServerEvent};
use crate::session::{tools as builtin_tools, SessionShared};

const MAX_TOOL_ITERATIONS: usize = 3;

/// Run one full turn: append the user transcript, loop the LLM against its
/// tools up to `MAX_TOOL_ITERATIONS` times, then speak the final text.
///
/// Never panics. Two distinct "didn't get a clean reply" outcomes, per
/// §4.1/§7:
/// - the LLM transport itself fails (HTTP error, parse failure): the turn
///   is rolled back to how history looked before it started, `CHAT_FAILED`
///   is emitted, and nothing is spoken.
/// - the tool loop runs out of iterations without a final text message:
///   that's a completed (if unsatisfying) turn, so an apology string
///   stands in for the reply and is spoken normally (§4.1 step 5).
#[tracing::instrument(
    name = "turn",
    skip(shared, transcript, cancel, out),
    fields(session_id = %shared.id, turn_id = %uuid::Uuid::new_v4())
)]
pub async fn run_turn(
    shared: Arc<SessionShared>,
    transcript: String,
    cancel: CancelToken,
    out: BrowserSink,
) {
    out.event(ServerEvent::Turn {
        text: transcript.clone(),
    })
    .await;

    let turn_start_len = shared.history.lock().await.len();

    {
        let mut history = shared.history.lock().await;
        history.push(ChatMessage::user(transcript));
    }

    if cancel.is_cancelled() {
        return;
    }

    out.event(ServerEvent::Thinking {}).await;

    let mut steps: Vec<String> = Vec::new();
    let mut final_text: Option<String> = None;
    let mut chat_failed = false;

    for _ in 0..MAX_TOOL_ITERATIONS {
        if cancel.is_cancelled() {
            return;
        }

        let history_snapshot = shared.history.lock().await.clone();
        let outcome = shared
            .llm
            .call(
                &history_snapshot,
                &shared.tools,
                &shared.llm_api_key,
                &shared.model,
                &cancel,
            )
            .await;

        if cancel.is_cancelled() {
            return;
        }

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, session = %shared.id, "llm call failed mid-turn");
                chat_failed = true;
                break;
            }
        };

        match outcome {
            ChatOutcome::FinalText(text) => {
                final_text = Some(text);
                break;
            }
            ChatOutcome::ToolCalls(calls) if calls.is_empty() => break,
            ChatOutcome::ToolCalls(calls) => {
                {
                    let mut history = shared.history.lock().await;
                    history.push(ChatMessage::assistant_tool_calls(calls.clone()));
                }

                for call in calls {
                    if cancel.is_cancelled() {
                        return;
                    }

                    steps.push(format!("Using {}", call.name));
                    let definition = shared.tools.iter().find(|t| t.name == call.name);

                    let result = match definition.map(|d| &d.handler) {
                        Some(ToolHandler::BuiltIn) => {
                            builtin_tools::dispatch_built_in(&call.name, &call.arguments)
                        }
                        Some(ToolHandler::Sandboxed { source }) => {
                            shared
                                .sandbox
                                .execute(
                                    &call.name,
                                    source,
                                    call.arguments.clone(),
                                    shared.secrets.clone(),
                                    cancel.clone(),
                                )
                                .await
                        }
                        None => format!("Error: Unknown tool \"{}\"", call.name),
                    };

                    let mut history = shared.history.lock().await;
                    history.push(ChatMessage::tool_result(call.id, result));
                }
            }
        }
    }

    if cancel.is_cancelled() {
        return;
    }

    if chat_failed {
        // "history is not extended with the failed turn" (§4.1/§7): unwind
        // back to exactly how it looked before this turn touched it.
        let mut history = shared.history.lock().await;
        history.truncate(turn_start_len);
        drop(history);

        out.event(ServerEvent::Error {
            message: ClientError::new(ClientErrorCode::ChatFailed, "chat request failed")
                .to_frame_message(),
        })
        .await;
        shared.transition(va_domain::SessionState::Listening);
        return;
    }

    let reply = final_text.unwrap_or_else(|| {
        "Sorry, I wasn't able to finish that thought. Could you try again?".to_string()
    });

    {
        let mut history = shared.history.lock().await;
        history.push(ChatMessage::assistant_text(reply.clone()));
    }

    out.event(ServerEvent::Chat {
        text: reply.clone(),
        steps,
    })
    .await;

    shared.transition(va_domain::SessionState::Speaking);
    speak(&shared, &reply, &cancel, &out).await;
    if !cancel.is_cancelled() {
        shared.transition(va_domain::SessionState::Listening);
    }
}

/// Normalize, synthesize, and stream audio to the browser. Suppresses the
/// trailing `tts_done` if cancellation fires during synthesis (§4.4).
///
/// `pub(crate)` rather than private: the greeting (spoken once from
/// `Session::start`, outside any turn) reuses this exact path.
pub(crate) async fn speak(shared: &Arc<SessionShared>, text: &str, cancel: &CancelToken, out: &BrowserSink) {
    if cancel.is_cancelled() {
        return;
    }

    let spoken = normalize_for_speech(text);
    if spoken.is_empty() {
        return;
    }

    let (chunk_tx, mut chunk_rx) = mpsc::channel::<Vec<u8>>(64);
    let out_clone = out.clone();
    let forward = tokio::spawn(async move {
        while let Some(chunk) = chunk_rx.recv().await {
            out_clone.audio(chunk).await;
        }
    });

    let result = shared
        .tts
        .synthesize(&spoken, &shared.voice, chunk_tx, cancel.clone())
        .await;
    let _ = forward.await;

    match result {
        Ok(()) if !cancel.is_cancelled() => {
            out.event(ServerEvent::TtsDone {}).await;
        }
        Ok(()) => {}
        Err(e) => {
            tracing::warn!(error = %e, session = %shared.id, "tts synthesis failed");
            out.event(ServerEvent::Error {
                message: ClientError::new(ClientErrorCode::TtsFailed, "speech synthesis failed")
                    .to_frame_message(),
            })
            .await;
        }
    }
}
