//! JSON-RPC transports to MCP servers.
//!
//! Every transport exposes the same request/notify/close surface; the MCP
//! handshake and tool methods are layered on top by
//! [`ProtocolClient`](super::ProtocolClient).

mod http;
mod pending;
mod sse;
mod stdio;

pub use http::StreamableHttpTransport;
pub use sse::SseTransport;
pub use stdio::StdioTransport;

pub(crate) use pending::{CancelOnDrop, PendingRequests};

use super::error::ToolInvokeError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::future::Future;

pub const PROTOCOL_VERSION: &str = "2025-06-18";

#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and wait for the matching response's `result`.
    async fn request(&self, method: &str, params: Value) -> Result<Value, ToolInvokeError>;

    async fn notify(&self, method: &str, params: Value) -> Result<(), ToolInvokeError>;

    async fn close(&self) -> Result<(), ToolInvokeError>;
}

pub(crate) fn request_message(id: &str, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    })
}

pub(crate) fn notification_message(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params
    })
}

pub(crate) fn cancellation_params(id: &str) -> Value {
    json!({
        "requestId": id,
        "reason": "request timed out on the client"
    })
}

/// Turns a JSON-RPC response into its `result`, or the error it carries.
pub(crate) fn response_result(server: &str, message: Value) -> Result<Value, ToolInvokeError> {
    if let Some(error) = message.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32000);
        let text = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Err(ToolInvokeError::Rpc {
            server: server.to_string(),
            code,
            message: text,
        });
    }
    Ok(message.get("result").cloned().unwrap_or(Value::Null))
}

pub(crate) fn response_key(id: &Value) -> Option<String> {
    match id {
        Value::String(value) => Some(value.clone()),
        Value::Number(num) => Some(num.to_string()),
        _ => None,
    }
}

/// Reply for a request initiated by the server. Only `ping` is supported.
pub(crate) fn server_request_reply(server: &str, id: Value, method: &str) -> Value {
    if method == "ping" {
        return json!({ "jsonrpc": "2.0", "id": id, "result": {} });
    }
    tracing::warn!(server, method, "server sent unsupported request");
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": -32601,
            "message": format!("client does not implement method '{method}'"),
        }
    })
}

pub(crate) fn header_map(
    server: &str,
    headers: &HashMap<String, String>,
) -> Result<HeaderMap, ToolInvokeError> {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes()).map_err(|err| {
            ToolInvokeError::transport(server, format!("invalid header name '{key}': {err}"))
        })?;
        let value = HeaderValue::from_str(value).map_err(|err| {
            ToolInvokeError::transport(server, format!("invalid value for header '{key}': {err}"))
        })?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Runs `future` on the current runtime without waiting for it. Used from
/// drop guards, where awaiting is impossible.
pub(crate) fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(future);
    }
}
