use super::client::ServerToolInfo;
use super::glob::matches_glob;
use crate::config::ServerDefinition;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Separator between server and tool in an aggregated tool name.
pub const NAMESPACE_SEPARATOR: &str = "__";

pub fn namespaced_name(server: &str, tool: &str) -> String {
    format!("{server}{NAMESPACE_SEPARATOR}{tool}")
}

/// Splits `server__tool` at the first separator.
pub fn split_namespaced(name: &str) -> Option<(&str, &str)> {
    name.split_once(NAMESPACE_SEPARATOR)
}

/// JSON-schema fragment describing a tool's arguments. Only `type`,
/// `properties` and `required` are carried; they are passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(rename = "type", default = "default_schema_type")]
    pub schema_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
}

fn default_schema_type() -> String {
    "object".to_string()
}

impl Default for InputSchema {
    fn default() -> Self {
        Self {
            schema_type: default_schema_type(),
            properties: None,
            required: None,
        }
    }
}

impl InputSchema {
    pub fn from_value(schema: Option<&Value>) -> Self {
        schema
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default()
    }
}

/// A tool as reported by one server, tagged with that server's name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
    pub server_name: String,
}

impl ToolDescriptor {
    pub fn from_server_info(server: &str, info: ServerToolInfo) -> Self {
        Self {
            input_schema: InputSchema::from_value(info.input_schema.as_ref()),
            name: info.name,
            description: info.description.unwrap_or_default(),
            server_name: server.to_string(),
        }
    }

    pub fn namespaced_name(&self) -> String {
        namespaced_name(&self.server_name, &self.name)
    }
}

/// Tool definition in the shape the model-call boundary expects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
}

impl From<&ToolDescriptor> for ToolSpec {
    fn from(tool: &ToolDescriptor) -> Self {
        Self {
            name: tool.namespaced_name(),
            description: tool.description.clone(),
            input_schema: tool.input_schema.clone(),
        }
    }
}

/// Allow/deny policy of one server. A non-empty allow list admits only
/// matching tools; any block match removes a tool, even an allowed one.
#[derive(Debug, Clone, Copy)]
pub struct ToolFilter<'a> {
    allowed: &'a [String],
    blocked: &'a [String],
}

impl<'a> ToolFilter<'a> {
    pub fn new(allowed: &'a [String], blocked: &'a [String]) -> Self {
        Self { allowed, blocked }
    }

    pub fn for_server(definition: &'a ServerDefinition) -> Self {
        Self::new(&definition.allowed_tools, &definition.blocked_tools)
    }

    pub fn permits(&self, tool: &str) -> bool {
        let allowed = self.allowed.is_empty()
            || self
                .allowed
                .iter()
                .any(|pattern| matches_glob(pattern, tool));
        allowed
            && !self
                .blocked
                .iter()
                .any(|pattern| matches_glob(pattern, tool))
    }
}

/// Applies the server's policy to its raw tool list and tags the survivors.
pub fn filter_tools(definition: &ServerDefinition, tools: Vec<ServerToolInfo>) -> Vec<ToolDescriptor> {
    let filter = ToolFilter::for_server(definition);
    let reported = tools.len();
    let mut seen = HashSet::new();
    let mut descriptors = Vec::with_capacity(reported);
    for info in tools {
        if !filter.permits(&info.name) {
            continue;
        }
        if !seen.insert(info.name.clone()) {
            warn!(
                server = %definition.name,
                tool = %info.name,
                "Server reported the same tool twice, keeping the first"
            );
            continue;
        }
        descriptors.push(ToolDescriptor::from_server_info(&definition.name, info));
    }
    debug!(
        server = %definition.name,
        reported,
        exposed = descriptors.len(),
        "Filtered server tool catalogue"
    );
    descriptors
}
