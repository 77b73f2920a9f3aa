//! Per-session guardrail state machine.
//!
//! A turn is either rejected outright (session ended, turn ceiling reached) or
//! forwarded to the language model. Rejections never touch the model and never
//! change counters. The turn that exactly reaches the ceiling is still processed
//! and flips the session to `Ended` for the next one.

mod escalation;
mod session;

pub use escalation::{EscalationContext, EscalationPolicy, LogEscalation};
pub use session::{STORED_HISTORY_LIMIT, SessionState};

use crate::model::{ChatModel, ChatOptions, ModelError};
use crate::session::{GuardrailLimits, SessionStatus, SessionUpdates};
use crate::types::ChatMessage;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Most recent history entries forwarded to the model, before the new message.
pub const MAX_HISTORY_MESSAGES: usize = 40;

pub const SESSION_ENDED_NOTICE: &str = "Session has ended";
pub const MAX_TURNS_NOTICE: &str = "Maximum turns reached";

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("language model is disabled for this runtime")]
    ModelDisabled,
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl TurnError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TurnError::ModelDisabled => false,
            TurnError::Model(err) => err.is_retryable(),
        }
    }
}

/// Everything the state machine needs to decide one turn.
#[derive(Debug, Clone, Copy)]
pub struct TurnRequest<'a> {
    pub system_prompt: &'a str,
    pub limits: &'a GuardrailLimits,
    pub status: SessionStatus,
    pub turn_count: u32,
    pub failed_attempts: u32,
    pub history: &'a [ChatMessage],
    pub message: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub response: ChatMessage,
    pub updates: SessionUpdates,
    pub notice: Option<String>,
    /// `false` when the turn was rejected without calling the model.
    pub processed: bool,
}

impl TurnOutcome {
    fn rejected(request: &TurnRequest<'_>, notice: &str) -> Self {
        Self {
            response: ChatMessage::assistant(notice),
            updates: SessionUpdates {
                turn_count: request.turn_count,
                failed_attempts: request.failed_attempts,
                status: SessionStatus::Ended,
            },
            notice: Some(notice.to_string()),
            processed: false,
        }
    }
}

pub struct TurnProcessor {
    model: Option<Arc<dyn ChatModel>>,
    escalation: Arc<dyn EscalationPolicy>,
}

impl TurnProcessor {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self::from_optional(Some(model))
    }

    /// Processor without a model handle; rejections still work, processed turns
    /// fail with [`TurnError::ModelDisabled`].
    pub fn disabled() -> Self {
        Self::from_optional(None)
    }

    pub fn from_optional(model: Option<Arc<dyn ChatModel>>) -> Self {
        Self {
            model,
            escalation: Arc::new(LogEscalation),
        }
    }

    pub fn with_escalation(mut self, policy: Arc<dyn EscalationPolicy>) -> Self {
        self.escalation = policy;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.model.is_some()
    }

    pub async fn process_turn(&self, request: TurnRequest<'_>) -> Result<TurnOutcome, TurnError> {
        if request.status.is_ended() {
            debug!(turn_count = request.turn_count, "Rejecting turn for ended session");
            return Ok(TurnOutcome::rejected(&request, SESSION_ENDED_NOTICE));
        }

        let max_turns = request.limits.max_turns_per_session;
        if request.turn_count >= max_turns {
            info!(
                turn_count = request.turn_count,
                max_turns, "Turn ceiling reached, ending session"
            );
            return Ok(TurnOutcome::rejected(&request, MAX_TURNS_NOTICE));
        }

        let model = self.model.as_ref().ok_or(TurnError::ModelDisabled)?;

        if let Some(threshold) = request.limits.escalation_threshold {
            if request.failed_attempts >= threshold {
                self.escalation.escalate(&EscalationContext {
                    turn_count: request.turn_count,
                    failed_attempts: request.failed_attempts,
                    threshold,
                    message: request.message,
                });
            }
        }

        let messages = build_messages(request.history, request.message);
        let options = ChatOptions {
            max_tokens: request.limits.max_response_length,
        };
        debug!(
            turn_count = request.turn_count,
            message_count = messages.len(),
            max_tokens = ?options.max_tokens,
            "Forwarding turn to model"
        );
        let reply = model
            .chat(request.system_prompt, &messages, &options)
            .await?;

        let next_turn = request.turn_count.saturating_add(1);
        let (status, notice) = if next_turn >= max_turns {
            info!(turn_count = next_turn, max_turns, "Session reached its final turn");
            (
                SessionStatus::Ended,
                Some(format!("Reached maximum {max_turns} turns")),
            )
        } else {
            (SessionStatus::Active, None)
        };

        Ok(TurnOutcome {
            response: ChatMessage::assistant(reply),
            updates: SessionUpdates {
                turn_count: next_turn,
                failed_attempts: request.failed_attempts,
                status,
            },
            notice,
            processed: true,
        })
    }
}

/// Trims `history` to the most recent [`MAX_HISTORY_MESSAGES`] and appends the
/// new user message.
pub fn build_messages(history: &[ChatMessage], message: &str) -> Vec<ChatMessage> {
    let start = history.len().saturating_sub(MAX_HISTORY_MESSAGES);
    let mut messages = Vec::with_capacity(history.len() - start + 1);
    messages.extend_from_slice(&history[start..]);
    messages.push(ChatMessage::user(message));
    messages
}
