// Connection manager tests - connect isolation, catalogue caching, filtering
// and dispatch, using an injected connector with call-counting fake clients.

use agentforge_core::config::{SandboxPolicy, ServerDefinition, ServerStatus};
use agentforge_core::tooling::{
    CONNECT_TIMEOUT, McpClientManager, ServerConnector, ServerToolInfo, ToolCallOutput, ToolCallRequest,
    ToolContent, ToolInvokeError, ToolServerClient,
};
use async_trait::async_trait;
use futures::future;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct FakeClient {
    tools: Vec<&'static str>,
    list_calls: AtomicUsize,
    close_calls: AtomicUsize,
    calls: Mutex<Vec<(String, Value)>>,
    delay: Option<Duration>,
    fail_listing: bool,
    hang_listing: bool,
}

impl FakeClient {
    fn with_tools(tools: &[&'static str]) -> Self {
        Self {
            tools: tools.to_vec(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl ToolServerClient for FakeClient {
    fn instructions(&self) -> Option<String> {
        Some("fake server".to_string())
    }

    async fn list_tools(&self) -> Result<Vec<ServerToolInfo>, ToolInvokeError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_listing {
            future::pending::<()>().await;
        }
        if self.fail_listing {
            return Err(ToolInvokeError::transport("fake", "listing failed"));
        }
        Ok(self
            .tools
            .iter()
            .map(|name| ServerToolInfo {
                name: name.to_string(),
                description: Some(format!("{name} description")),
                input_schema: Some(json!({ "type": "object", "properties": {} })),
            })
            .collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolCallOutput, ToolInvokeError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments.clone()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if name == "explode" {
            return Err(ToolInvokeError::Rpc {
                server: "fake".to_string(),
                code: -32000,
                message: "tool exploded".to_string(),
            });
        }
        Ok(ToolCallOutput {
            content: vec![
                ToolContent::Text {
                    text: format!("ran {name}"),
                },
                ToolContent::Text {
                    text: arguments.to_string(),
                },
            ],
            is_error: false,
        })
    }

    async fn close(&self) -> Result<(), ToolInvokeError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out pre-built clients by server name; unknown names fail to connect.
#[derive(Default)]
struct FakeConnector {
    clients: HashMap<String, Arc<FakeClient>>,
    stalled: Vec<String>,
    attempts: AtomicUsize,
}

impl FakeConnector {
    fn with(mut self, name: &str, client: FakeClient) -> Self {
        self.clients.insert(name.to_string(), Arc::new(client));
        self
    }

    fn stalling(mut self, name: &str) -> Self {
        self.stalled.push(name.to_string());
        self
    }

    fn client(&self, name: &str) -> Arc<FakeClient> {
        Arc::clone(self.clients.get(name).expect("known fake client"))
    }
}

#[async_trait]
impl ServerConnector for FakeConnector {
    async fn connect(
        &self,
        definition: &ServerDefinition,
    ) -> Result<Arc<dyn ToolServerClient>, ToolInvokeError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.stalled.contains(&definition.name) {
            future::pending::<()>().await;
        }
        match self.clients.get(&definition.name) {
            Some(client) => Ok(Arc::clone(client) as Arc<dyn ToolServerClient>),
            None => Err(ToolInvokeError::transport(
                &definition.name,
                "connection refused",
            )),
        }
    }
}

fn definition(name: &str) -> ServerDefinition {
    ServerDefinition::stdio(name, "fake-server", Vec::<String>::new())
}

fn manager_with(connector: &Arc<FakeConnector>) -> McpClientManager {
    McpClientManager::with_connector(Arc::clone(connector) as Arc<dyn ServerConnector>)
}

#[tokio::test]
async fn failing_server_does_not_block_the_others() {
    let connector = Arc::new(
        FakeConnector::default()
            .with("filesystem", FakeClient::with_tools(&["read_file"]))
            .with("github", FakeClient::with_tools(&["create_issue"])),
    );
    let manager = manager_with(&connector);

    let summary = manager
        .connect(vec![
            definition("filesystem"),
            definition("broken"),
            definition("github"),
        ])
        .await;

    assert_eq!(manager.connected_count(), 2);
    assert!(manager.is_connected("filesystem"));
    assert!(manager.is_connected("github"));
    assert!(!manager.is_connected("broken"));
    assert_eq!(summary.connected.len(), 2);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, "broken");
    assert!(summary.failed[0].1.contains("connection refused"));
}

#[tokio::test]
async fn inactive_servers_are_skipped_not_failed() {
    let connector = Arc::new(
        FakeConnector::default().with("filesystem", FakeClient::with_tools(&["read_file"])),
    );
    let manager = manager_with(&connector);

    let summary = manager
        .connect(vec![
            definition("filesystem").with_status(ServerStatus::Inactive),
        ])
        .await;

    assert_eq!(manager.connected_count(), 0);
    assert_eq!(summary.skipped, vec!["filesystem".to_string()]);
    assert!(summary.failed.is_empty());
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn list_tools_is_cached_until_disconnect() {
    let connector = Arc::new(
        FakeConnector::default()
            .with("filesystem", FakeClient::with_tools(&["read_file", "write_file"]))
            .with("github", FakeClient::with_tools(&["create_issue"])),
    );
    let manager = manager_with(&connector);
    manager
        .connect(vec![definition("filesystem"), definition("github")])
        .await;

    let first = manager.list_tools().await;
    let second = manager.list_tools().await;
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.len(), 3);
    assert_eq!(connector.client("filesystem").list_calls.load(Ordering::SeqCst), 1);
    assert_eq!(connector.client("github").list_calls.load(Ordering::SeqCst), 1);

    manager.disconnect().await;
    assert_eq!(manager.connected_count(), 0);
    assert!(manager.list_tools().await.is_empty());
}

#[tokio::test]
async fn refresh_tools_forces_a_new_query() {
    let connector = Arc::new(
        FakeConnector::default().with("filesystem", FakeClient::with_tools(&["read_file"])),
    );
    let manager = manager_with(&connector);
    manager.connect(vec![definition("filesystem")]).await;

    let first = manager.list_tools().await;
    manager.refresh_tools();
    let second = manager.list_tools().await;

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(connector.client("filesystem").list_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failing_listing_contributes_no_tools() {
    let broken = FakeClient {
        fail_listing: true,
        ..FakeClient::with_tools(&["hidden"])
    };
    let connector = Arc::new(
        FakeConnector::default()
            .with("filesystem", FakeClient::with_tools(&["read_file"]))
            .with("flaky", broken),
    );
    let manager = manager_with(&connector);
    manager
        .connect(vec![definition("filesystem"), definition("flaky")])
        .await;

    let tools = manager.list_tools().await;
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].server_name, "filesystem");
}

#[tokio::test]
async fn allow_and_block_lists_shape_the_catalogue() {
    let connector = Arc::new(FakeConnector::default().with(
        "filesystem",
        FakeClient::with_tools(&["read_file", "read_secret", "write_file", "list_dir"]),
    ));
    let manager = manager_with(&connector);
    manager
        .connect(vec![
            definition("filesystem")
                .with_allowed_tools(["read_*", "list_dir"])
                .with_blocked_tools(["*secret*"]),
        ])
        .await;

    let names: Vec<String> = manager
        .list_tools()
        .await
        .iter()
        .map(|tool| tool.name.clone())
        .collect();
    assert_eq!(names, vec!["read_file", "list_dir"]);

    let specs = manager.to_anthropic_tools().await;
    assert_eq!(specs[0].name, "filesystem__read_file");
    assert_eq!(specs[0].input_schema.schema_type, "object");
}

#[tokio::test]
async fn disconnect_closes_each_client_once() {
    let connector = Arc::new(
        FakeConnector::default()
            .with("filesystem", FakeClient::with_tools(&["read_file"]))
            .with("github", FakeClient::with_tools(&["create_issue"])),
    );
    let manager = manager_with(&connector);
    manager
        .connect(vec![definition("filesystem"), definition("github")])
        .await;

    manager.disconnect().await;
    manager.disconnect().await;

    assert_eq!(connector.client("filesystem").close_calls.load(Ordering::SeqCst), 1);
    assert_eq!(connector.client("github").close_calls.load(Ordering::SeqCst), 1);
    assert!(!manager.is_connected("filesystem"));
}

#[tokio::test]
async fn reconnecting_a_name_closes_the_previous_client() {
    let connector = Arc::new(
        FakeConnector::default().with("filesystem", FakeClient::with_tools(&["read_file"])),
    );
    let manager = manager_with(&connector);
    manager.connect(vec![definition("filesystem")]).await;
    manager.connect(vec![definition("filesystem")]).await;

    assert_eq!(manager.connected_count(), 1);
    assert_eq!(connector.client("filesystem").close_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn execute_tool_strips_namespace_and_keeps_call_id() {
    let connector = Arc::new(
        FakeConnector::default().with("filesystem", FakeClient::with_tools(&["read_file"])),
    );
    let manager = manager_with(&connector);
    manager.connect(vec![definition("filesystem")]).await;

    let result = manager
        .execute_tool(ToolCallRequest::new(
            "call-42",
            "filesystem__read_file",
            json!({ "path": "README.md" }),
        ))
        .await;

    assert!(!result.is_error, "unexpected error: {}", result.output);
    assert_eq!(result.tool_call_id, "call-42");
    assert_eq!(result.output, "ran read_file\n{\"path\":\"README.md\"}");

    let calls = connector.client("filesystem").calls.lock().unwrap().clone();
    assert_eq!(calls, vec![("read_file".to_string(), json!({ "path": "README.md" }))]);
}

#[tokio::test]
async fn explicit_server_name_skips_resolution() {
    let connector = Arc::new(
        FakeConnector::default().with("filesystem", FakeClient::with_tools(&["read_file"])),
    );
    let manager = manager_with(&connector);
    manager.connect(vec![definition("filesystem")]).await;

    let result = manager
        .execute_tool(ToolCallRequest::new("call-1", "read_file", json!({})).with_server("filesystem"))
        .await;
    assert!(!result.is_error);
    assert_eq!(
        connector.client("filesystem").calls.lock().unwrap()[0].0,
        "read_file"
    );
}

#[tokio::test]
async fn unresolvable_tool_is_an_error_result() {
    let manager = manager_with(&Arc::new(FakeConnector::default()));

    let result = manager
        .execute_tool(ToolCallRequest::new("call-1", "mystery__tool", json!({})))
        .await;
    assert!(result.is_error);
    assert!(result.output.contains("cannot determine server"));
    assert_eq!(result.tool_call_id, "call-1");
}

#[tokio::test]
async fn known_but_disconnected_server_is_an_error_result() {
    let manager = manager_with(&Arc::new(FakeConnector::default()));
    manager.connect(vec![definition("filesystem")]).await;

    let result = manager
        .execute_tool(ToolCallRequest::new("call-2", "filesystem__read_file", json!({})))
        .await;
    assert!(result.is_error);
    assert!(result.output.contains("is not connected"));
}

#[tokio::test]
async fn underlying_failure_text_is_carried() {
    let connector = Arc::new(
        FakeConnector::default().with("filesystem", FakeClient::with_tools(&["explode"])),
    );
    let manager = manager_with(&connector);
    manager.connect(vec![definition("filesystem")]).await;

    let result = manager
        .execute_tool(ToolCallRequest::new("call-3", "filesystem__explode", json!({})))
        .await;
    assert!(result.is_error);
    assert!(result.output.contains("tool exploded"));
}

#[tokio::test(start_paused = true)]
async fn slow_tool_times_out_with_sandbox_limit() {
    let slow = FakeClient {
        delay: Some(Duration::from_secs(5)),
        ..FakeClient::with_tools(&["crawl"])
    };
    let connector = Arc::new(FakeConnector::default().with("fetch", slow));
    let manager = manager_with(&connector);
    manager
        .connect(vec![definition("fetch").with_sandbox(SandboxPolicy {
            max_execution_ms: 100,
            allow_network: true,
        })])
        .await;

    let result = manager
        .execute_tool(ToolCallRequest::new("call-4", "fetch__crawl", json!({})))
        .await;
    assert!(result.is_error);
    assert!(result.output.contains("timed out after 100 ms"));
}

#[tokio::test]
async fn server_instructions_are_exposed() {
    let connector = Arc::new(
        FakeConnector::default().with("filesystem", FakeClient::with_tools(&["read_file"])),
    );
    let manager = manager_with(&connector);
    manager.connect(vec![definition("filesystem")]).await;

    assert_eq!(
        manager.server_instructions("filesystem").as_deref(),
        Some("fake server")
    );
    assert_eq!(manager.server_instructions("github"), None);
}

#[tokio::test(start_paused = true)]
async fn stalled_connect_does_not_hold_back_other_servers() {
    let connector = Arc::new(
        FakeConnector::default()
            .with("filesystem", FakeClient::with_tools(&["read_file"]))
            .stalling("sleepy"),
    );
    let manager = manager_with(&connector);
    let started = tokio::time::Instant::now();

    let summary = manager
        .connect(vec![definition("filesystem"), definition("sleepy")])
        .await;

    assert_eq!(summary.connected, vec!["filesystem".to_string()]);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, "sleepy");
    assert!(summary.failed[0].1.contains("timed out"));
    assert!(started.elapsed() <= CONNECT_TIMEOUT + Duration::from_secs(1));
    assert!(manager.is_connected("filesystem"));
}

#[tokio::test(start_paused = true)]
async fn hung_listing_is_bounded_by_sandbox_limit() {
    let hung = FakeClient {
        hang_listing: true,
        ..FakeClient::with_tools(&["never"])
    };
    let connector = Arc::new(
        FakeConnector::default()
            .with("filesystem", FakeClient::with_tools(&["read_file"]))
            .with("sleepy", hung),
    );
    let manager = manager_with(&connector);
    manager
        .connect(vec![
            definition("filesystem"),
            definition("sleepy").with_sandbox(SandboxPolicy {
                max_execution_ms: 200,
                allow_network: true,
            }),
        ])
        .await;

    let started = tokio::time::Instant::now();
    let tools = manager.list_tools().await;
    assert!(started.elapsed() <= Duration::from_millis(250));
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].server_name, "filesystem");

    let again = manager.list_tools().await;
    assert!(Arc::ptr_eq(&tools, &again));
}

#[tokio::test]
async fn disconnect_does_not_wait_for_in_flight_listing() {
    let hung = FakeClient {
        hang_listing: true,
        ..FakeClient::with_tools(&["never"])
    };
    let connector = Arc::new(FakeConnector::default().with("sleepy", hung));
    let manager = Arc::new(manager_with(&connector));
    manager.connect(vec![definition("sleepy")]).await;

    let listing = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.list_tools().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(connector.client("sleepy").list_calls.load(Ordering::SeqCst), 1);

    let finished = tokio::time::timeout(Duration::from_secs(3), manager.disconnect()).await;
    assert!(finished.is_ok(), "disconnect waited behind list_tools");
    assert_eq!(connector.client("sleepy").close_calls.load(Ordering::SeqCst), 1);
    assert_eq!(manager.connected_count(), 0);

    listing.abort();
}
