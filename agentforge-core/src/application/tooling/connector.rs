use super::client::{ProtocolClient, ToolServerClient};
use super::error::ToolInvokeError;
use super::transport::{McpTransport, SseTransport, StdioTransport, StreamableHttpTransport};
use crate::config::{ServerDefinition, TransportConfig};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Builds a live client for one server definition.
#[async_trait]
pub trait ServerConnector: Send + Sync {
    async fn connect(
        &self,
        definition: &ServerDefinition,
    ) -> Result<Arc<dyn ToolServerClient>, ToolInvokeError>;
}

/// Default connector: picks the transport from the definition and runs the
/// MCP handshake over it.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransportConnector;

impl TransportConnector {
    async fn open_transport(
        definition: &ServerDefinition,
    ) -> Result<Box<dyn McpTransport>, ToolInvokeError> {
        let server = definition.name.as_str();
        let transport: Box<dyn McpTransport> = match &definition.transport {
            TransportConfig::Stdio {
                command,
                args,
                env,
                workdir,
            } => Box::new(StdioTransport::spawn(server, command, args, env, workdir.as_ref()).await?),
            TransportConfig::Sse { url, headers } => {
                Box::new(SseTransport::connect(server, url, headers).await?)
            }
            TransportConfig::StreamableHttp { url, headers } => {
                Box::new(StreamableHttpTransport::new(server, url, headers)?)
            }
        };
        Ok(transport)
    }
}

pub(crate) fn check_sandbox(definition: &ServerDefinition) -> Result<(), ToolInvokeError> {
    if definition.transport.is_remote() && !definition.sandbox.allow_network {
        return Err(ToolInvokeError::PolicyViolation {
            server: definition.name.clone(),
            reason: format!(
                "{} transport needs network access but allow_network is false",
                definition.transport.kind()
            ),
        });
    }
    Ok(())
}

#[async_trait]
impl ServerConnector for TransportConnector {
    async fn connect(
        &self,
        definition: &ServerDefinition,
    ) -> Result<Arc<dyn ToolServerClient>, ToolInvokeError> {
        check_sandbox(definition)?;
        let server = definition.name.as_str();

        // Callers bound this with a timeout; dropping the future drops the
        // transport, and stdio children are spawned with kill_on_drop.
        let transport = Self::open_transport(definition).await?;
        debug!(server, transport = %definition.transport.kind(), "Opened transport");
        let client = ProtocolClient::initialize(server, transport).await?;
        Ok(Arc::new(client))
    }
}
