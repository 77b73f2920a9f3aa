use super::catalog::{ToolDescriptor, ToolSpec, filter_tools};
use super::client::ToolServerClient;
use super::connector::{ServerConnector, TransportConnector};
use super::error::ToolInvokeError;
use crate::config::ServerDefinition;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Limit for transport setup plus the `initialize` handshake of one server.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A live client bound to the definition it was built from.
#[derive(Clone)]
pub struct ConnectedServer {
    pub definition: ServerDefinition,
    pub client: Arc<dyn ToolServerClient>,
}

/// Outcome of one `connect` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectSummary {
    pub connected: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

type Connections = Arc<HashMap<String, ConnectedServer>>;

/// Connection set plus a counter bumped on every change, so a catalogue built
/// from an older set is never cached.
#[derive(Default)]
struct ConnectionTable {
    servers: Connections,
    generation: u64,
}

/// Owns the connections of one agent runtime and the tool catalogue built
/// from them.
pub struct McpClientManager {
    connector: Arc<dyn ServerConnector>,
    pub(super) definitions: RwLock<Arc<HashMap<String, ServerDefinition>>>,
    connections: RwLock<ConnectionTable>,
    tool_cache: Mutex<Option<CachedTools>>,
}

struct CachedTools {
    generation: u64,
    tools: Arc<Vec<ToolDescriptor>>,
}

impl Default for McpClientManager {
    fn default() -> Self {
        Self::new()
    }
}

impl McpClientManager {
    pub fn new() -> Self {
        Self::with_connector(Arc::new(TransportConnector))
    }

    pub fn with_connector(connector: Arc<dyn ServerConnector>) -> Self {
        Self {
            connector,
            definitions: RwLock::new(Arc::new(HashMap::new())),
            connections: RwLock::new(ConnectionTable::default()),
            tool_cache: Mutex::new(None),
        }
    }

    /// Connects every active definition concurrently. Each attempt is bounded
    /// by [`CONNECT_TIMEOUT`]; failures are logged and reported in the summary
    /// and never abort the other servers.
    pub async fn connect(&self, definitions: Vec<ServerDefinition>) -> ConnectSummary {
        {
            let mut known = self.definitions.write().unwrap_or_else(PoisonError::into_inner);
            let mut next = HashMap::clone(&known);
            for definition in &definitions {
                next.insert(definition.name.clone(), definition.clone());
            }
            *known = Arc::new(next);
        }

        let mut summary = ConnectSummary::default();
        let mut active = Vec::new();
        for definition in definitions {
            if definition.is_active() {
                active.push(definition);
            } else {
                debug!(server = %definition.name, "Skipping inactive MCP server");
                summary.skipped.push(definition.name);
            }
        }

        let attempts = active.into_iter().map(|definition| async move {
            let result =
                match tokio::time::timeout(CONNECT_TIMEOUT, self.connector.connect(&definition))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ToolInvokeError::transport(
                        &definition.name,
                        format!("connect timed out after {} ms", CONNECT_TIMEOUT.as_millis()),
                    )),
                };
            (definition, result)
        });

        let mut established = Vec::new();
        for (definition, result) in join_all(attempts).await {
            match result {
                Ok(client) => {
                    info!(server = %definition.name, "Connected to MCP server");
                    summary.connected.push(definition.name.clone());
                    established.push(ConnectedServer { definition, client });
                }
                Err(err) => {
                    warn!(server = %definition.name, %err, "Failed to connect to MCP server");
                    summary.failed.push((definition.name, err.to_string()));
                }
            }
        }

        if established.is_empty() {
            return summary;
        }

        let replaced = {
            let mut table = self.connections.write().unwrap_or_else(PoisonError::into_inner);
            let mut next = HashMap::clone(&table.servers);
            let mut replaced = Vec::new();
            for server in established {
                if let Some(previous) = next.insert(server.definition.name.clone(), server) {
                    replaced.push(previous);
                }
            }
            table.servers = Arc::new(next);
            table.generation += 1;
            replaced
        };
        // The connection set changed; a catalogue built before it is stale.
        self.clear_cache();
        close_all(replaced).await;

        summary
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.snapshot().contains_key(name)
    }

    pub fn connected_count(&self) -> usize {
        self.snapshot().len()
    }

    pub fn connected_servers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.snapshot().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn server_instructions(&self, name: &str) -> Option<String> {
        self.snapshot()
            .get(name)
            .and_then(|server| server.client.instructions())
    }

    /// Aggregated, filtered catalogue of every connected server. The first
    /// call queries the servers; later calls share the cached list.
    ///
    /// Each listing is bounded by the server's `max_execution_ms`. A server
    /// that fails or times out contributes no tools. No lock is held while
    /// servers are queried.
    pub async fn list_tools(&self) -> Arc<Vec<ToolDescriptor>> {
        let (connections, generation) = {
            let table = self.connections.read().unwrap_or_else(PoisonError::into_inner);
            (Arc::clone(&table.servers), table.generation)
        };
        if let Some(tools) = self.cached(generation) {
            return tools;
        }

        let mut servers: Vec<&ConnectedServer> = connections.values().collect();
        servers.sort_by(|a, b| a.definition.name.cmp(&b.definition.name));

        let queries = servers.into_iter().map(list_server_tools);
        let tools: Vec<ToolDescriptor> = join_all(queries).await.into_iter().flatten().collect();
        debug!(count = tools.len(), generation, "Built tool catalogue");

        let mut cache = self.tool_cache.lock().unwrap_or_else(PoisonError::into_inner);
        // A concurrent caller may have stored the same generation first; share it.
        if let Some(cached) = cache.as_ref().filter(|cached| cached.generation == generation) {
            return Arc::clone(&cached.tools);
        }
        let tools = Arc::new(tools);
        if self.current_generation() == generation {
            *cache = Some(CachedTools {
                generation,
                tools: Arc::clone(&tools),
            });
        }
        tools
    }

    /// Drops the cached catalogue so the next `list_tools` re-queries.
    pub fn refresh_tools(&self) {
        self.clear_cache();
    }

    pub async fn to_anthropic_tools(&self) -> Vec<ToolSpec> {
        self.list_tools().await.iter().map(ToolSpec::from).collect()
    }

    /// Closes every connection and forgets the tool catalogue. Never waits on
    /// an in-flight `list_tools`; closing is what unblocks it.
    pub async fn disconnect(&self) {
        let previous = {
            let mut table = self.connections.write().unwrap_or_else(PoisonError::into_inner);
            table.generation += 1;
            std::mem::take(&mut table.servers)
        };
        self.clear_cache();

        let servers: Vec<ConnectedServer> = previous.values().cloned().collect();
        drop(previous);
        close_all(servers).await;
    }

    pub(super) fn snapshot(&self) -> Connections {
        Arc::clone(
            &self
                .connections
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .servers,
        )
    }

    pub(super) fn known_servers(&self) -> Vec<String> {
        self.definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn current_generation(&self) -> u64 {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    fn cached(&self, generation: u64) -> Option<Arc<Vec<ToolDescriptor>>> {
        self.tool_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|cached| cached.generation == generation)
            .map(|cached| Arc::clone(&cached.tools))
    }

    fn clear_cache(&self) {
        self.tool_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

async fn list_server_tools(server: &ConnectedServer) -> Vec<ToolDescriptor> {
    let name = &server.definition.name;
    let limit = server.definition.sandbox.execution_timeout();
    match tokio::time::timeout(limit, server.client.list_tools()).await {
        Ok(Ok(tools)) => filter_tools(&server.definition, tools),
        Ok(Err(err)) => {
            warn!(server = %name, %err, "Failed to list tools, server contributes none");
            Vec::new()
        }
        Err(_) => {
            warn!(
                server = %name,
                timeout_ms = server.definition.sandbox.max_execution_ms,
                "Listing tools timed out, server contributes none"
            );
            Vec::new()
        }
    }
}

async fn close_all(servers: Vec<ConnectedServer>) {
    let closes = servers.into_iter().map(|server| async move {
        if let Err(err) = server.client.close().await {
            warn!(server = %server.definition.name, %err, "Failed to close MCP server");
        } else {
            debug!(server = %server.definition.name, "Closed MCP server connection");
        }
    });
    join_all(closes).await;
}
