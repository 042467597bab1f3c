//! Non-streaming OpenAI-compatible chat completions client (§4.3).
//!
//! Single operation: `call(history, tools, apiKey, model, cancel) ->
//! ChatOutcome`. The API key travels per call rather than living on the
//! client: each session forwards the credential it was given on its
//! `authenticate` frame (or the gateway's own fallback), so one client
//! instance is shared across every tenant. Everything else — extracting
//! tool calls, deciding whether the response is final text, appending to
//! history — is the orchestrator's job; this crate only builds the
//! request body and parses the response shape.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use va_domain::{CancelToken, ChatMessage, Role, ToolCall, ToolDefinition};
use va_domain::error::{Error, Result};

/// What the LLM call returned, already branched on tool-call presence —
/// the only thing orchestrator-visible behavior depends on (§9 second open
/// question: response-field remapping is best-effort and never changes
/// this branch).
#[derive(Debug, Clone)]
pub enum ChatOutcome {
    FinalText(String),
    ToolCalls(Vec<ToolCall>),
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn call(
        &self,
        history: &[ChatMessage],
        tools: &[ToolDefinition],
        api_key: &str,
        model: &str,
        cancel: &CancelToken,
    ) -> Result<ChatOutcome>;
}

pub struct OpenAiCompatClient {
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("reqwest client builds"),
        }
    }

    /// Rewrites empty/whitespace-only message content to the literal
    /// `"..."` before building the wire body — the gateway rejects empty
    /// text (§4.3). Applied here, not at the `call()` call site, so every
    /// body this client sends gets the rewrite regardless of call path.
    fn build_body(&self, history: &[ChatMessage], tools: &[ToolDefinition], model: &str) -> Value {
        let messages: Vec<Value> = history
            .iter()
            .cloned()
            .map(|mut m| {
                if let Some(content) = &m.content {
                    if content.trim().is_empty() {
                        m.content = Some("...".to_string());
                    }
                }
                m
            })
            .map(|m| msg_to_openai(&m))
            .collect();
        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
        });
        if !tools.is_empty() {
            let schemas: Vec<Value> = tools.iter().map(ToolDefinition::to_schema_json).collect();
            body["tools"] = Value::Array(schemas);
        }
        body
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    #[tracing::instrument(name = "llm.call", skip(self, history, tools, api_key, cancel), fields(model, messages = history.len()))]
    async fn call(
        &self,
        history: &[ChatMessage],
        tools: &[ToolDefinition],
        api_key: &str,
        model: &str,
        cancel: &CancelToken,
    ) -> Result<ChatOutcome> {
        if cancel.is_cancelled() {
            return Err(Error::Other("call cancelled before send".into()));
        }

        let body = self.build_body(history, tools, model);
        let url = format!("{}/chat/completions", self.base_url);

        let send = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send();

        let response = tokio::select! {
            biased;
            _ = wait_for_cancel(cancel) => {
                return Err(Error::Other("call cancelled in flight".into()));
            }
            result = send => result.map_err(|e| Error::Http(e.to_string()))?,
        };

        let status = response.status();
        let text = response.text().await.map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Upstream {
                provider: "llm".into(),
                message: format!("HTTP {status}: {text}"),
            });
        }

        if cancel.is_cancelled() {
            return Err(Error::Other("call cancelled after response".into()));
        }

        parse_response(&text)
    }
}

/// Poll the token rather than require a notify primitive — cancellation is
/// a best-effort abort signal here, not a hard interrupt; the real
/// guarantee (§5) is that a cancelled-turn result is dropped by the caller,
/// not that the HTTP request itself necessarily stops instantly.
async fn wait_for_cancel(cancel: &CancelToken) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

fn parse_response(text: &str) -> Result<ChatOutcome> {
    let parsed: Value = serde_json::from_str(text)?;
    let choice = parsed
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| Error::Upstream {
            provider: "llm".into(),
            message: "response missing choices[0]".into(),
        })?;
    let message = choice.get("message").ok_or_else(|| Error::Upstream {
        provider: "llm".into(),
        message: "response missing choices[0].message".into(),
    })?;

    if let Some(raw) = choice.get("finish_reason").and_then(Value::as_str) {
        tracing::debug!(
            raw_finish_reason = raw,
            finish_reason = normalize_finish_reason(raw),
            "llm response finish reason"
        );
    }

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    if !tool_calls.is_empty() {
        let calls = tool_calls
            .iter()
            .filter_map(|tc| {
                let id = tc.get("id")?.as_str()?.to_string();
                let func = tc.get("function")?;
                let name = func.get("name")?.as_str()?.to_string();
                let args_str = func.get("arguments")?.as_str().unwrap_or("{}");
                let arguments: Value = serde_json::from_str(args_str).unwrap_or(Value::Null);
                Some(ToolCall { id, name, arguments })
            })
            .collect();
        return Ok(ChatOutcome::ToolCalls(calls));
    }

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(ChatOutcome::FinalText(content))
}

/// Best-effort `finish_reason` remapping for providers that speak an
/// Anthropic-shaped vocabulary instead of OpenAI's (§9 second open
/// question). Purely informational — orchestrator behavior branches only
/// on `message.tool_calls` being non-empty, never on this value.
fn normalize_finish_reason(raw: &str) -> &'static str {
    match raw {
        "stop" | "end_turn" => "stop",
        "length" | "max_tokens" => "length",
        "tool_calls" | "tool_use" => "tool_calls",
        _ => "unknown",
    }
}

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_openai(msg: &ChatMessage) -> Value {
    match msg.role {
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
            "content": msg.content.clone().unwrap_or_default(),
        }),
        Role::Assistant if !msg.tool_calls.is_empty() => {
            let tool_calls: Vec<Value> = msg
                .tool_calls
                .iter()
                .map(|tc| {
                    serde_json::json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {
                            "name": tc.name,
                            "arguments": tc.arguments.to_string(),
                        }
                    })
                })
                .collect();
            serde_json::json!({
                "role": "assistant",
                "content": Value::Null,
                "tool_calls": tool_calls,
            })
        }
        _ => serde_json::json!({
            "role": role_to_str(msg.role),
            "content": msg.content.clone().unwrap_or_default(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_final_text_response() {
        let body = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "hi there"}}]
        })
        .to_string();
        match parse_response(&body).unwrap() {
            ChatOutcome::FinalText(t) => assert_eq!(t, "hi there"),
            _ => panic!("expected final text"),
        }
    }

    #[test]
    fn parses_tool_call_response() {
        let body = serde_json::json!({
            "choices": [{"message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "function": {"name": "get_weather", "arguments": "{\"city\":\"Paris\"}"}
                }]
            }}]
        })
        .to_string();
        match parse_response(&body).unwrap() {
            ChatOutcome::ToolCalls(calls) => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].name, "get_weather");
                assert_eq!(calls[0].arguments["city"], "Paris");
            }
            _ => panic!("expected tool calls"),
        }
    }

    #[test]
    fn missing_choices_is_an_upstream_error() {
        let body = serde_json::json!({}).to_string();
        assert!(parse_response(&body).is_err());
    }

    #[test]
    fn empty_content_rewritten_to_ellipsis() {
        let client = OpenAiCompatClient::new("https://example.com");
        let history = vec![ChatMessage::user("   ")];
        let body = client.build_body(&history, &[], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["content"], "...");
    }

    #[test]
    fn finish_reason_remaps_anthropic_shaped_values() {
        assert_eq!(normalize_finish_reason("end_turn"), "stop");
        assert_eq!(normalize_finish_reason("max_tokens"), "length");
        assert_eq!(normalize_finish_reason("tool_use"), "tool_calls");
        assert_eq!(normalize_finish_reason("stop"), "stop");
        assert_eq!(normalize_finish_reason("something_else"), "unknown");
    }

    #[test]
    fn tools_envelope_omitted_when_empty() {
        let client = OpenAiCompatClient::new("https://example.com");
        let history = vec![ChatMessage::user("hi")];
        let body = client.build_body(&history, &[], "gpt-4o-mini");
        assert!(body.get("tools").is_none());
    }
}
