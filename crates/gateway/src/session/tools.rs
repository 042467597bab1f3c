//! Built-in (host-native) tool dispatch.
//!
//! §4.1 step 4d: "if a built-in tool, execute on host; else execute in
//! sandbox." The only built-in this gateway ships is `web_search` — no
//! search-API credential is part of the ambient configuration, so it
//! returns a clear "not configured" result rather than a silent no-op,
//! demonstrating the built-in-vs-sandboxed branch without inventing an
//! unspecified vendor integration.

use serde_json::Value;

/// Dispatch a built-in tool call on the host. Returns the tool-result
/// string, never an error — unknown built-in names fall back to the
/// "not configured" stub rather than a hard failure, since by the time
/// this is called the orchestrator has already decided `handler` is
/// `ToolHandler::BuiltIn` for this name.
pub fn dispatch_built_in(tool_name: &str, args: &Value) -> String {
    match tool_name {
        "web_search" => web_search(args),
        other => stub_result(other, "no host-native handler registered for this built-in tool"),
    }
}

fn web_search(args: &Value) -> String {
    let query = args.get("query").and_then(Value::as_str).unwrap_or("");
    stub_result(
        "web_search",
        &format!(
            "web search is not configured for this deployment (query: \"{query}\")"
        ),
    )
}

fn stub_result(tool_name: &str, message: &str) -> String {
    serde_json::json!({
        "error": true,
        "message": message,
        "suggestion": format!("configure credentials for \"{tool_name}\" or remove it from the tool list"),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn web_search_reports_not_configured() {
        let result = dispatch_built_in("web_search", &serde_json::json!({"query": "rust async"}));
        assert!(result.contains("not configured"));
        assert!(result.contains("rust async"));
    }

    #[test]
    fn unknown_built_in_falls_back_to_stub() {
        let result = dispatch_built_in("unregistered_tool", &serde_json::json!({}));
        assert!(result.contains("no host-native handler"));
    }
}
