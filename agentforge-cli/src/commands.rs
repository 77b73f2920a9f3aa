use agentforge_core::RuntimeConfig;
use agentforge_core::config::presets;
use agentforge_core::tooling::{McpClientManager, ToolCallRequest};
use serde_json::{Value, json};
use std::error::Error;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("--args is not valid JSON: {0}")]
    InvalidArguments(#[source] serde_json::Error),
    #[error("--args must be a JSON object, got {0}")]
    ArgumentsNotObject(&'static str),
}

pub async fn status(config: &RuntimeConfig) -> Result<(), Box<dyn Error>> {
    let manager = McpClientManager::new();
    let summary = manager.connect(config.servers.clone()).await;

    let servers: Vec<Value> = config
        .servers
        .iter()
        .map(|server| {
            json!({
                "name": server.name,
                "transport": server.transport.kind().to_string(),
                "status": server.status,
                "connected": manager.is_connected(&server.name),
                "instructions": manager.server_instructions(&server.name),
            })
        })
        .collect();
    let output = json!({
        "connected_count": manager.connected_count(),
        "servers": servers,
        "summary": summary,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    manager.disconnect().await;
    Ok(())
}

pub async fn tools(config: &RuntimeConfig, as_json: bool) -> Result<(), Box<dyn Error>> {
    let manager = McpClientManager::new();
    manager.connect(config.servers.clone()).await;
    let specs = manager.to_anthropic_tools().await;
    info!(count = specs.len(), "Collected tool catalogue");

    if as_json {
        println!("{}", serde_json::to_string_pretty(&specs)?);
    } else if specs.is_empty() {
        println!("no tools available");
    } else {
        for spec in &specs {
            println!("{:<40} {}", spec.name, spec.description);
        }
    }

    manager.disconnect().await;
    Ok(())
}

pub async fn call(
    config: &RuntimeConfig,
    name: String,
    args: Option<String>,
    server: Option<String>,
) -> Result<(), Box<dyn Error>> {
    let input = parse_arguments(args.as_deref())?;

    let manager = McpClientManager::new();
    manager.connect(config.servers.clone()).await;

    let mut request = ToolCallRequest::new(Uuid::new_v4().to_string(), name, input);
    if let Some(server) = server {
        request = request.with_server(server);
    }
    debug!(call_id = %request.id, tool = %request.name, "Dispatching tool call");
    let result = manager.execute_tool(request).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    manager.disconnect().await;
    Ok(())
}

pub fn list_presets() -> Result<(), Box<dyn Error>> {
    let output: Vec<Value> = presets()
        .iter()
        .map(|preset| {
            json!({
                "name": preset.name,
                "description": preset.description,
                "transport": preset.transport.to_string(),
                "command": preset.command,
                "args": preset.args,
                "max_execution_ms": preset.sandbox.max_execution_ms,
                "allow_network": preset.sandbox.allow_network,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn parse_arguments(raw: Option<&str>) -> Result<Value, CommandError> {
    let Some(raw) = raw else {
        return Ok(json!({}));
    };
    let value: Value = serde_json::from_str(raw).map_err(CommandError::InvalidArguments)?;
    match value {
        Value::Object(_) => Ok(value),
        Value::Null => Ok(json!({})),
        Value::Array(_) => Err(CommandError::ArgumentsNotObject("an array")),
        Value::String(_) => Err(CommandError::ArgumentsNotObject("a string")),
        Value::Number(_) => Err(CommandError::ArgumentsNotObject("a number")),
        Value::Bool(_) => Err(CommandError::ArgumentsNotObject("a boolean")),
    }
}
