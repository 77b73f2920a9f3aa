use super::error::ToolInvokeError;
use super::transport::{McpTransport, PROTOCOL_VERSION};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

/// Upper bound on `tools/list` pages, against servers that never stop paging.
const MAX_TOOL_PAGES: usize = 64;

/// Tool metadata exactly as a server reports it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

/// Result of a `tools/call`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallOutput {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolCallOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Text blocks joined by newlines; other block kinds are skipped.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ToolContent::Text { text } => Some(text.as_str()),
                ToolContent::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One live, initialised connection to a tool server.
#[async_trait]
pub trait ToolServerClient: Send + Sync {
    /// Usage instructions returned by the server during the handshake.
    fn instructions(&self) -> Option<String> {
        None
    }

    async fn list_tools(&self) -> Result<Vec<ServerToolInfo>, ToolInvokeError>;

    async fn call_tool(&self, name: &str, arguments: Value)
    -> Result<ToolCallOutput, ToolInvokeError>;

    async fn close(&self) -> Result<(), ToolInvokeError>;
}

/// MCP client methods layered over any [`McpTransport`].
pub struct ProtocolClient {
    server: String,
    transport: Box<dyn McpTransport>,
    instructions: Option<String>,
}

impl ProtocolClient {
    /// Performs the `initialize` handshake and returns a ready client.
    pub async fn initialize(
        server: &str,
        transport: Box<dyn McpTransport>,
    ) -> Result<Self, ToolInvokeError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {}
        });
        let result = transport.request("initialize", params).await?;
        let instructions = result
            .get("instructions")
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(version) = result.get("protocolVersion").and_then(Value::as_str) {
            debug!(server, protocol = version, "MCP handshake completed");
        }
        transport
            .notify("notifications/initialized", json!({}))
            .await?;

        Ok(Self {
            server: server.to_string(),
            transport,
            instructions,
        })
    }

    pub fn server(&self) -> &str {
        &self.server
    }
}

#[async_trait]
impl ToolServerClient for ProtocolClient {
    fn instructions(&self) -> Option<String> {
        self.instructions.clone()
    }

    async fn list_tools(&self) -> Result<Vec<ServerToolInfo>, ToolInvokeError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_TOOL_PAGES {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let page = self.transport.request("tools/list", params).await?;
            tools.extend(parse_tool_page(&self.server, &page));
            cursor = page
                .get("nextCursor")
                .and_then(Value::as_str)
                .filter(|next| !next.is_empty())
                .map(str::to_string);
            if cursor.is_none() {
                return Ok(tools);
            }
        }
        Err(ToolInvokeError::transport(
            &self.server,
            format!("tools/list did not finish within {MAX_TOOL_PAGES} pages"),
        ))
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolCallOutput, ToolInvokeError> {
        let params = json!({
            "name": name,
            "arguments": match arguments {
                Value::Null => Value::Object(Default::default()),
                other => other,
            }
        });
        let result = self.transport.request("tools/call", params).await?;
        serde_json::from_value(result).map_err(|source| ToolInvokeError::InvalidJson {
            server: self.server.clone(),
            source,
        })
    }

    async fn close(&self) -> Result<(), ToolInvokeError> {
        self.transport.close().await
    }
}

fn parse_tool_page(server: &str, page: &Value) -> Vec<ServerToolInfo> {
    let Some(items) = page.get("tools").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(info) => Some(info),
            Err(err) => {
                debug!(server, %err, "skipping malformed tool entry");
                None
            }
        })
        .collect()
}
