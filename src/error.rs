//! Error taxonomy for the agent core.
//!
//! Only two failures terminate a conversation turn: an exhausted provider
//! transport and a credential failure. Everything else (schema errors,
//! denials, tool failures, stale process ids) is converted into conversation
//! content so the model can react to it.

use thiserror::Error;

/// Fatal errors surfaced to the caller of `Session::run_turn`.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The provider transport failed after its own retry policy was exhausted.
    #[error("provider transport failed ({provider}): {message}")]
    Transport { provider: String, message: String },

    /// Credential resolution failed: refresh exchange rejected or key invalid.
    #[error("credential error ({provider}): {message}")]
    Credential { provider: String, message: String },
}

impl AgentError {
    pub fn transport(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn credential(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Credential {
            provider: provider.into(),
            message: message.into(),
        }
    }
}
