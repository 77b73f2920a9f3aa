use tracing::warn;

/// Snapshot handed to an [`EscalationPolicy`] when failed attempts cross the
/// configured threshold.
#[derive(Debug, Clone, Copy)]
pub struct EscalationContext<'a> {
    pub turn_count: u32,
    pub failed_attempts: u32,
    pub threshold: u32,
    pub message: &'a str,
}

/// Hook for escalation behaviour. Implementations observe; they cannot change
/// the session counters or status.
pub trait EscalationPolicy: Send + Sync {
    fn escalate(&self, context: &EscalationContext<'_>);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogEscalation;

impl EscalationPolicy for LogEscalation {
    fn escalate(&self, context: &EscalationContext<'_>) {
        warn!(
            turn_count = context.turn_count,
            failed_attempts = context.failed_attempts,
            threshold = context.threshold,
            "Session crossed escalation threshold"
        );
    }
}
