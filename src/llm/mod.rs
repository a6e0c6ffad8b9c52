//! LLM client module for interacting with language models.
//!
//! This module provides a trait-based abstraction over LLM providers, with
//! the Anthropic Messages API as the primary implementation. Messages carry
//! optional tool-call blocks; a tool result is a `Role::Tool` message keyed
//! by the correlation id of the call it answers.

mod anthropic;
mod error;

pub use anthropic::AnthropicClient;
pub use error::{classify_http_status, LlmError, LlmErrorKind, RetryConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role in a chat conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// Carries the result of one tool call, matched by `tool_call_id`.
    Tool,
}

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// For `Role::Tool` messages: the id of the call this result answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// True only for the synthetic marker inserted by history compaction.
    /// Never set on genuine conversation content.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub condensed: bool,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            condensed: false,
        }
    }

    pub fn assistant(content: Option<String>, tool_calls: Option<Vec<ToolCall>>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
            condensed: false,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
            condensed: false,
        }
    }

    /// The synthetic placeholder that replaces a compacted middle range.
    pub fn condensed_summary(removed: usize) -> Self {
        Self {
            role: Role::User,
            content: Some(format!(
                "[context condensed: {removed} earlier messages were removed to keep the \
                 conversation within the provider's context window; the original task \
                 statement and the most recent turns are preserved verbatim]"
            )),
            tool_calls: None,
            tool_call_id: None,
            condensed: true,
        }
    }

    /// True when this assistant message requests at least one tool call.
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().map_or(false, |c| !c.is_empty())
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id; every call is answered by exactly one tool result.
    pub id: String,
    pub name: String,
    /// Argument object as produced by the model.
    pub arguments: Value,
}

/// Tool definition advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    /// Non-standard extension consumed locally by the approval gate.
    /// Stripped before transmission on endpoints that validate schemas
    /// strictly (see `AnthropicClient`).
    #[serde(rename = "x-risk-tier", skip_serializing_if = "Option::is_none")]
    pub risk_tier: Option<String>,
}

/// Response from one provider call.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

impl ChatResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    /// Accumulate another usage report into this one.
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

/// Trait for LLM clients.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one chat request: full history plus the advertised tool set.
    ///
    /// Implementations own their retry policy; an `Err` means retries are
    /// exhausted or the failure is not retryable.
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, LlmError>;
}
