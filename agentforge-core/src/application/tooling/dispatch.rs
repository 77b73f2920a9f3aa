use super::catalog::split_namespaced;
use super::error::ToolInvokeError;
use super::manager::McpClientManager;
use serde::Serialize;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, warn};

/// A tool call as requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    /// Namespaced (`server__tool`) or bare name.
    pub name: String,
    pub server_name: Option<String>,
    pub input: Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            server_name: None,
            input,
        }
    }

    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server_name = Some(server.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub output: String,
    pub is_error: bool,
    pub duration_ms: u64,
}

/// Returns the server prefix of a namespaced tool name when that prefix is
/// one of `known_servers`.
pub fn resolve_server_for_tool<S: AsRef<str>>(name: &str, known_servers: &[S]) -> Option<String> {
    let (server, _) = split_namespaced(name)?;
    known_servers
        .iter()
        .any(|known| known.as_ref() == server)
        .then(|| server.to_string())
}

impl McpClientManager {
    /// Routes a call to the server owning the tool. Every failure comes back
    /// as an error-flagged result; this never returns `Err`.
    pub async fn execute_tool(&self, request: ToolCallRequest) -> ToolResult {
        let started = Instant::now();
        let ToolCallRequest {
            id,
            name,
            server_name,
            input,
        } = request;

        let (output, is_error) = match self.dispatch(&name, server_name, input).await {
            Ok(outcome) => outcome,
            Err(message) => (message, true),
        };

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(tool = %name, call_id = %id, is_error, duration_ms, "Tool call finished");
        ToolResult {
            tool_call_id: id,
            output,
            is_error,
            duration_ms,
        }
    }

    async fn dispatch(
        &self,
        name: &str,
        server_name: Option<String>,
        input: Value,
    ) -> Result<(String, bool), String> {
        let server = server_name
            .or_else(|| resolve_server_for_tool(name, &self.known_servers()))
            .ok_or_else(|| format!("cannot determine server for tool '{name}'"))?;

        let connections = self.snapshot();
        let connected = connections
            .get(&server)
            .ok_or_else(|| format!("MCP server '{server}' is not connected"))?;

        let tool = match split_namespaced(name) {
            Some((prefix, tool)) if prefix == server => tool,
            _ => name,
        };
        let timeout = connected.definition.sandbox.execution_timeout();

        match tokio::time::timeout(timeout, connected.client.call_tool(tool, input)).await {
            Ok(Ok(output)) => Ok((output.joined_text(), output.is_error)),
            Ok(Err(err)) => {
                warn!(server = %server, tool, %err, "Tool call failed");
                Err(err.to_string())
            }
            Err(_) => {
                let err = ToolInvokeError::Timeout {
                    server: server.clone(),
                    tool: tool.to_string(),
                    timeout_ms: connected.definition.sandbox.max_execution_ms,
                };
                warn!(server = %server, tool, %err, "Tool call timed out");
                Err(err.to_string())
            }
        }
    }
}
