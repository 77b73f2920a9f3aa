//! The slice of an agent configuration the runtime reads.

use crate::session::{DEFAULT_MAX_TURNS_PER_SESSION, GuardrailLimits};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub guardrails: GuardrailsConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct GuardrailsConfig {
    #[serde(default)]
    pub resource_limits: ResourceLimits,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ResourceLimits {
    pub max_turns_per_session: Option<u32>,
    pub max_response_length: Option<u32>,
    pub escalation_threshold: Option<u32>,
}

impl AgentConfig {
    pub fn limits(&self) -> GuardrailLimits {
        GuardrailLimits::from(&self.guardrails.resource_limits)
    }

    pub fn system_prompt(&self) -> &str {
        self.system_prompt.as_deref().unwrap_or_default()
    }
}

impl From<&ResourceLimits> for GuardrailLimits {
    fn from(limits: &ResourceLimits) -> Self {
        Self {
            max_turns_per_session: limits
                .max_turns_per_session
                .unwrap_or(DEFAULT_MAX_TURNS_PER_SESSION),
            max_response_length: limits.max_response_length,
            escalation_threshold: limits.escalation_threshold,
        }
    }
}
