//! Anthropic Messages API client with automatic retry for transient errors.
//!
//! Auth adaptation happens here: a static key is sent as `x-api-key`, while
//! an OAuth access token rides in a bearer `Authorization` header together
//! with the OAuth beta capability flag. The OAuth-authenticated endpoint
//! validates tool schemas strictly, so the local `x-risk-tier` extension is
//! stripped from tool definitions before transmission on that path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::error::{classify_http_status, LlmError, LlmErrorKind, RetryConfig};
use super::{ChatMessage, ChatResponse, LlmClient, Role, TokenUsage, ToolCall, ToolDefinition};
use crate::auth::{Credential, CredentialProvider};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// Capability flag required for OAuth-authenticated calls.
const OAUTH_BETA_FLAG: &str = "oauth-2025-04-20";
const MAX_OUTPUT_TOKENS: u64 = 8192;

/// Anthropic Messages API client.
pub struct AnthropicClient {
    client: Client,
    base_url: String,
    credentials: Arc<CredentialProvider>,
    retry_config: RetryConfig,
}

impl AnthropicClient {
    /// Create a new client with the default retry configuration.
    pub fn new(credentials: Arc<CredentialProvider>) -> Self {
        Self::with_retry_config(credentials, RetryConfig::default())
    }

    pub fn with_retry_config(
        credentials: Arc<CredentialProvider>,
        retry_config: RetryConfig,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            credentials,
            retry_config,
        }
    }

    /// Override the API base URL (used by tests against a local server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Convert the local history into Messages API form.
    ///
    /// The API requires user and assistant roles to alternate, and tool
    /// results travel as `tool_result` blocks inside user messages, so
    /// adjacent same-role messages are merged into one block list.
    fn convert_messages(messages: &[ChatMessage]) -> Vec<Value> {
        let mut wire: Vec<Value> = Vec::with_capacity(messages.len());

        for msg in messages {
            let (role, blocks) = match msg.role {
                Role::User => {
                    let text = msg.content.clone().unwrap_or_default();
                    ("user", vec![json!({ "type": "text", "text": text })])
                }
                Role::Assistant => {
                    let mut blocks = Vec::new();
                    if let Some(text) = msg.content.as_deref() {
                        if !text.is_empty() {
                            blocks.push(json!({ "type": "text", "text": text }));
                        }
                    }
                    if let Some(calls) = &msg.tool_calls {
                        for call in calls {
                            blocks.push(json!({
                                "type": "tool_use",
                                "id": call.id,
                                "name": call.name,
                                "input": call.arguments,
                            }));
                        }
                    }
                    ("assistant", blocks)
                }
                Role::Tool => {
                    let block = json!({
                        "type": "tool_result",
                        "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                        "content": msg.content.clone().unwrap_or_default(),
                    });
                    ("user", vec![block])
                }
            };

            if blocks.is_empty() {
                continue;
            }

            match wire.last_mut() {
                Some(last) if last["role"] == role => {
                    if let Some(arr) = last["content"].as_array_mut() {
                        arr.extend(blocks);
                    }
                }
                _ => wire.push(json!({ "role": role, "content": blocks })),
            }
        }

        wire
    }

    /// Serialize tool definitions, stripping non-standard extension fields
    /// when the endpoint validates schemas strictly.
    fn convert_tools(tools: &[ToolDefinition], strip_extensions: bool) -> Option<Vec<Value>> {
        if tools.is_empty() {
            return None;
        }
        let converted = tools
            .iter()
            .map(|tool| {
                if strip_extensions {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool.input_schema,
                    })
                } else {
                    serde_json::to_value(tool).unwrap_or_else(|_| {
                        json!({
                            "name": tool.name,
                            "description": tool.description,
                            "input_schema": tool.input_schema,
                        })
                    })
                }
            })
            .collect();
        Some(converted)
    }

    fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok().map(Duration::from_secs))
    }

    fn error_from_response(status: u16, body: &str, retry_after: Option<Duration>) -> LlmError {
        // Anthropic error envelope: {"type":"error","error":{"type":...,"message":...}}
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
            .unwrap_or_else(|| body.to_string());

        if status == 400 && message.contains("prompt is too long") {
            return LlmError::context_too_large(message);
        }

        match classify_http_status(status) {
            LlmErrorKind::RateLimited => LlmError::rate_limited(message, retry_after),
            LlmErrorKind::ServerError => LlmError::server_error(status, message),
            _ => LlmError::client_error(status, message),
        }
    }

    fn parse_response(body: &str) -> Result<ChatResponse, LlmError> {
        let data: Value = serde_json::from_str(body).map_err(|e| {
            LlmError::parse_error(format!("failed to decode response: {e}, body: {body}"))
        })?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();

        if let Some(blocks) = data["content"].as_array() {
            for block in blocks {
                match block["type"].as_str().unwrap_or_default() {
                    "text" => {
                        if let Some(t) = block["text"].as_str() {
                            text.push_str(t);
                        }
                    }
                    "tool_use" => {
                        tool_calls.push(ToolCall {
                            id: block["id"].as_str().unwrap_or_default().to_string(),
                            name: block["name"].as_str().unwrap_or_default().to_string(),
                            arguments: block["input"].clone(),
                        });
                    }
                    _ => {}
                }
            }
        }

        let usage = data.get("usage").map(|u| TokenUsage {
            input_tokens: u["input_tokens"].as_u64().unwrap_or(0),
            output_tokens: u["output_tokens"].as_u64().unwrap_or(0),
        });

        Ok(ChatResponse {
            content: if text.is_empty() { None } else { Some(text) },
            tool_calls,
            stop_reason: data["stop_reason"].as_str().map(str::to_string),
            usage,
        })
    }

    /// Execute a single request without retry.
    async fn execute_request(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, LlmError> {
        let credential = self
            .credentials
            .resolve()
            .await
            .map_err(|e| LlmError::credential(e.to_string()))?;

        let oauth = matches!(credential, Credential::OAuth { .. });

        let mut body = json!({
            "model": model,
            "max_tokens": MAX_OUTPUT_TOKENS,
            "messages": Self::convert_messages(messages),
        });
        if let Some(tool_defs) = Self::convert_tools(tools, oauth) {
            body["tools"] = json!(tool_defs);
        }

        let mut request = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json");

        request = match &credential {
            Credential::ApiKey(key) => request.header("x-api-key", key),
            Credential::OAuth { access_token, .. } => request
                .header("authorization", format!("Bearer {access_token}"))
                .header("anthropic-beta", OAUTH_BETA_FLAG),
        };

        let response = match request.json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                return Err(if e.is_timeout() {
                    LlmError::network_error(format!("request timeout: {e}"))
                } else if e.is_connect() {
                    LlmError::network_error(format!("connection failed: {e}"))
                } else {
                    LlmError::network_error(format!("request failed: {e}"))
                });
            }
        };

        let status = response.status();
        let retry_after = Self::parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(Self::error_from_response(status.as_u16(), &body, retry_after));
        }

        Self::parse_response(&body)
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, LlmError> {
        let start = Instant::now();
        let mut attempt = 0u32;
        let mut last_error: Option<LlmError> = None;

        loop {
            if start.elapsed() > self.retry_config.max_retry_duration {
                return Err(last_error
                    .unwrap_or_else(|| LlmError::network_error("max retry duration exceeded")));
            }

            match self.execute_request(model, messages, tools).await {
                Ok(response) => {
                    if attempt > 0 {
                        tracing::info!(
                            attempts = attempt + 1,
                            elapsed = ?start.elapsed(),
                            "provider request succeeded after retries"
                        );
                    }
                    return Ok(response);
                }
                Err(error) => {
                    let should_retry = self.retry_config.should_retry(&error)
                        && attempt < self.retry_config.max_retries;

                    if !should_retry {
                        tracing::error!(kind = %error.kind, attempts = attempt + 1, "provider request failed: {}", error.message);
                        return Err(error);
                    }

                    let delay = error.suggested_delay(attempt, &self.retry_config);
                    let remaining = self
                        .retry_config
                        .max_retry_duration
                        .saturating_sub(start.elapsed());
                    let actual_delay = delay.min(remaining);
                    if actual_delay.is_zero() {
                        return Err(error);
                    }

                    tracing::warn!(
                        kind = %error.kind,
                        attempt = attempt + 1,
                        delay = ?actual_delay,
                        "provider request failed, retrying: {}",
                        error.message
                    );
                    tokio::time::sleep(actual_delay).await;
                    attempt += 1;
                    last_error = Some(error);
                }
            }
        }
    }
}
