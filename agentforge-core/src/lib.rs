//! Runtime execution layer for declarative agents.
//!
//! Two independent halves live here: the per-session guardrail state machine
//! ([`guardrails`]) that decides whether a turn reaches the language model, and
//! the multi-server MCP tool manager ([`tooling`]) that connects, filters,
//! namespaces and dispatches tools exposed by external tool servers.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use application::{guardrails, tooling};
pub use config::{AgentConfig, ConfigError, RuntimeConfig, ServerDefinition};
pub use domain::{session, types};
pub use infrastructure::model;
