//! Session status, counters and guardrail limits.

use serde::{Deserialize, Serialize};

/// Turn ceiling applied when the agent configuration leaves it unset.
pub const DEFAULT_MAX_TURNS_PER_SESSION: u32 = 50;

/// Two-state session lifecycle. `Ended` is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Active,
    Ended,
}

impl SessionStatus {
    pub fn is_ended(self) -> bool {
        matches!(self, SessionStatus::Ended)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
        }
    }
}

/// Resource limits read from the owning agent's guardrail configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailLimits {
    pub max_turns_per_session: u32,
    pub max_response_length: Option<u32>,
    pub escalation_threshold: Option<u32>,
}

impl Default for GuardrailLimits {
    fn default() -> Self {
        Self {
            max_turns_per_session: DEFAULT_MAX_TURNS_PER_SESSION,
            max_response_length: None,
            escalation_threshold: None,
        }
    }
}

impl GuardrailLimits {
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns_per_session = max_turns;
        self
    }

    pub fn with_max_response_length(mut self, length: u32) -> Self {
        self.max_response_length = Some(length);
        self
    }

    pub fn with_escalation_threshold(mut self, threshold: u32) -> Self {
        self.escalation_threshold = Some(threshold);
        self
    }
}

/// Counters and status a caller should persist after a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUpdates {
    pub turn_count: u32,
    pub failed_attempts: u32,
    pub status: SessionStatus,
}
