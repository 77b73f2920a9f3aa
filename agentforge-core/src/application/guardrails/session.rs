use super::{TurnError, TurnOutcome, TurnProcessor, TurnRequest};
use crate::session::{GuardrailLimits, SessionStatus};
use crate::types::ChatMessage;
use tracing::debug;

/// Stored turns kept per session. Only the most recent
/// [`MAX_HISTORY_MESSAGES`](super::MAX_HISTORY_MESSAGES) reach the model.
pub const STORED_HISTORY_LIMIT: usize = 200;

/// Owned per-conversation state. Taking `&mut self` for a turn serialises turn
/// accounting for one session; separate sessions share nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    status: SessionStatus,
    turn_count: u32,
    failed_attempts: u32,
    history: Vec<ChatMessage>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild state from persisted counters.
    pub fn restore(
        status: SessionStatus,
        turn_count: u32,
        failed_attempts: u32,
        history: Vec<ChatMessage>,
    ) -> Self {
        let mut state = Self {
            status,
            turn_count,
            failed_attempts,
            history,
        };
        state.trim_history();
        state
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn turn_count(&self) -> u32 {
        self.turn_count
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn record_failure(&mut self) {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
    }

    pub fn reset_failures(&mut self) {
        self.failed_attempts = 0;
    }

    pub async fn take_turn(
        &mut self,
        processor: &TurnProcessor,
        system_prompt: &str,
        limits: &GuardrailLimits,
        message: &str,
    ) -> Result<TurnOutcome, TurnError> {
        let outcome = processor
            .process_turn(TurnRequest {
                system_prompt,
                limits,
                status: self.status,
                turn_count: self.turn_count,
                failed_attempts: self.failed_attempts,
                history: &self.history,
                message,
            })
            .await?;
        self.apply(message, &outcome);
        Ok(outcome)
    }

    fn apply(&mut self, message: &str, outcome: &TurnOutcome) {
        if !self.status.is_ended() {
            self.status = outcome.updates.status;
        }
        self.turn_count = self.turn_count.max(outcome.updates.turn_count);
        self.failed_attempts = outcome.updates.failed_attempts;
        if outcome.processed {
            self.history.push(ChatMessage::user(message));
            self.history.push(outcome.response.clone());
            self.trim_history();
        }
        debug!(
            status = self.status.as_str(),
            turn_count = self.turn_count,
            stored = self.history.len(),
            "Applied turn outcome to session"
        );
    }

    fn trim_history(&mut self) {
        if self.history.len() > STORED_HISTORY_LIMIT {
            let excess = self.history.len() - STORED_HISTORY_LIMIT;
            self.history.drain(..excess);
        }
    }
}
