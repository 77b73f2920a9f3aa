pub mod agent;
pub mod app;
pub mod error;
pub mod loader;
pub mod presets;
pub mod server;

/// Default runtime config path - can be overridden via CLI argument
pub const CONFIG_PATH: &str = "config/agent.toml";

/// Default environment file path
pub const ENV_PATH: &str = "config/.env";

pub use agent::{AgentConfig, GuardrailsConfig, ResourceLimits};
pub use app::RuntimeConfig;
pub use error::ConfigError;
pub use presets::{ServerPreset, find_preset, presets};
pub use server::{SandboxPolicy, ServerDefinition, ServerStatus, TransportConfig, TransportKind};
