//! Multi-server MCP tool management.
//!
//! [`McpClientManager`] owns one connection per active server definition,
//! aggregates and filters their tool catalogues under `server__tool` names and
//! dispatches tool calls back to the owning server with a per-call timeout.

mod catalog;
mod client;
mod connector;
mod dispatch;
mod error;
mod glob;
mod manager;
pub mod transport;

pub use catalog::{
    InputSchema, NAMESPACE_SEPARATOR, ToolDescriptor, ToolFilter, ToolSpec, filter_tools,
    namespaced_name, split_namespaced,
};
pub use client::{ProtocolClient, ServerToolInfo, ToolCallOutput, ToolContent, ToolServerClient};
pub use connector::{ServerConnector, TransportConnector};
pub use dispatch::{ToolCallRequest, ToolResult, resolve_server_for_tool};
pub use error::ToolInvokeError;
pub use glob::matches_glob;
pub use manager::{CONNECT_TIMEOUT, ConnectSummary, ConnectedServer, McpClientManager};
