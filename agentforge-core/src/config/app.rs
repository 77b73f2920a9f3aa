use super::agent::AgentConfig;
use super::error::ConfigError;
use super::server::ServerDefinition;
use crate::session::GuardrailLimits;
use std::path::Path;

/// Runtime configuration loaded from agent.toml
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub agent: AgentConfig,
    pub servers: Vec<ServerDefinition>,
}

impl RuntimeConfig {
    /// Load configuration from a file path (or default path if None)
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        super::loader::load_config(path)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        super::loader::parse_config(content)
    }

    pub fn limits(&self) -> GuardrailLimits {
        self.agent.limits()
    }

    pub fn server(&self, name: &str) -> Option<&ServerDefinition> {
        self.servers.iter().find(|server| server.name == name)
    }
}
