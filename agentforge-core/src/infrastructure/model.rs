//! Boundary to the language-model call.
//!
//! The runtime never talks to a provider directly; callers inject an
//! implementation of [`ChatModel`].

use crate::types::ChatMessage;
use async_trait::async_trait;
use thiserror::Error;

/// Per-call options forwarded to the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChatOptions {
    pub max_tokens: Option<u32>,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Produce the assistant reply for `messages` under `system_prompt`.
    async fn chat(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, ModelError>;
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("network error calling provider '{provider}': {source}")]
    Network {
        provider: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("provider '{provider}' is unavailable: {reason}")]
    Unavailable { provider: String, reason: String },
    #[error("provider '{provider}' returned invalid response: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

impl ModelError {
    pub fn network(provider: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            provider: provider.into(),
            source,
        }
    }

    pub fn unavailable(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_response(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Infrastructure failures are worth retrying; malformed replies are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelError::Network { source, .. } => {
                source.is_timeout()
                    || source.is_connect()
                    || source.status().is_none_or(|status| status.is_server_error())
            }
            ModelError::Unavailable { .. } => true,
            ModelError::InvalidResponse { .. } => false,
        }
    }
}
