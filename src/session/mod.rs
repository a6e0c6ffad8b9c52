//! Conversation orchestrator.
//!
//! One `Session` owns the message history and drives the agentic loop:
//! send history to the provider, route any tool calls through the approval
//! gate, execute them, append the paired results, and repeat until the
//! provider answers with text only or the iteration ceiling is reached.
//!
//! Ownership is deliberate: the session is the only mutator of history, the
//! process table is the only owner of process state, and the credential
//! provider (behind the LLM client) is the only owner of the cached token.

pub mod profile;

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;

use crate::approval::ApprovalGate;
use crate::config::Config;
use crate::error::AgentError;
use crate::history::ContextWindow;
use crate::llm::{ChatMessage, LlmClient, LlmError, LlmErrorKind, TokenUsage, ToolCall};
use crate::process::ProcessTable;
use crate::settings::SharedSettingsStore;
use crate::tools::{Tool, ToolContext, ToolRegistry};

/// Terminal result of one `run_turn` call.
#[derive(Debug, Clone)]
pub struct FinalResponse {
    /// Final assistant text (may be empty when the ceiling cut the loop).
    pub text: String,
    /// True when the iteration ceiling stopped the loop. Always surfaced.
    pub ceiling_hit: bool,
    /// Provider round-trips consumed by this turn.
    pub turns_used: usize,
}

/// One conversation session: history, tools, gate, and loop state.
pub struct Session {
    llm: Arc<dyn LlmClient>,
    registry: ToolRegistry,
    gate: ApprovalGate,
    window: ContextWindow,
    tool_ctx: ToolContext,
    processes: Arc<ProcessTable>,
    settings: SharedSettingsStore,
    history: Vec<ChatMessage>,
    provider: String,
    model: String,
    max_iterations: usize,
    usage: TokenUsage,
}

impl Session {
    pub async fn new(
        config: &Config,
        llm: Arc<dyn LlmClient>,
        registry: ToolRegistry,
        gate: ApprovalGate,
        settings: SharedSettingsStore,
    ) -> Self {
        let ceiling = settings.message_ceiling(&config.provider).await;
        let processes = Arc::new(ProcessTable::new());
        Self {
            llm,
            registry,
            gate,
            window: ContextWindow::new(ceiling),
            tool_ctx: ToolContext {
                working_dir: config.working_dir.clone(),
                processes: processes.clone(),
            },
            processes,
            settings,
            history: Vec::new(),
            provider: config.provider.clone(),
            model: config.model.clone(),
            max_iterations: config.max_iterations,
            usage: TokenUsage::default(),
        }
    }

    /// The background process table, for session-end cleanup.
    pub fn processes(&self) -> Arc<ProcessTable> {
        self.processes.clone()
    }

    /// Read-only view of the conversation, for the UI layer.
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Accumulated token usage across all provider calls this session.
    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    /// Current per-provider message ceiling.
    pub fn context_ceiling(&self) -> usize {
        self.window.ceiling()
    }

    /// Drive one user turn to completion.
    ///
    /// Returns the terminal assistant text, or an error only for exhausted
    /// transport and credential failures. Tool-level problems are folded
    /// into the conversation and the loop continues.
    pub async fn run_turn(&mut self, user_input: &str) -> Result<FinalResponse, AgentError> {
        let hint = profile::classify(user_input);
        if let Some(mode) = hint.suggested_mode {
            // Suggestion only; the user changes modes through settings.
            tracing::info!(suggested = %mode, "user phrasing hints at an approval-mode preference");
        }

        self.history.push(ChatMessage::user(user_input));
        let tool_defs = self.registry.definitions();
        let mut last_text: Option<String> = None;

        for iteration in 0..self.max_iterations {
            self.window.compact(&mut self.history);

            let result = self.llm.chat(&self.model, &self.history, &tool_defs).await;
            let response = match result {
                Ok(response) => response,
                Err(error) => return Err(self.fatal_llm_error(error).await),
            };

            if let Some(usage) = response.usage {
                self.usage.add(usage);
            }
            if response.content.is_some() {
                last_text = response.content.clone();
            }

            let tool_calls = response.tool_calls;
            self.history.push(ChatMessage::assistant(
                response.content,
                if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls.clone())
                },
            ));

            if tool_calls.is_empty() {
                return Ok(FinalResponse {
                    text: last_text.unwrap_or_default(),
                    ceiling_hit: false,
                    turns_used: iteration + 1,
                });
            }

            tracing::debug!(
                iteration,
                count = tool_calls.len(),
                "executing tool calls for this turn"
            );

            // Every call gets exactly one result, appended in call order,
            // before the next provider round-trip.
            let results = self.execute_tool_calls(&tool_calls).await;
            for (call, result) in tool_calls.iter().zip(results) {
                self.history
                    .push(ChatMessage::tool_result(call.id.clone(), result));
            }
        }

        tracing::warn!(
            max_iterations = self.max_iterations,
            "iteration ceiling reached, stopping turn"
        );
        Ok(FinalResponse {
            text: last_text.unwrap_or_else(|| {
                format!(
                    "Stopped: the model kept requesting tools for {} consecutive provider calls",
                    self.max_iterations
                )
            }),
            ceiling_hit: true,
            turns_used: self.max_iterations,
        })
    }

    /// Gate every call, then run the approved ones concurrently.
    ///
    /// Returned results are index-aligned with `calls`; execution order
    /// across independent calls is not observable.
    async fn execute_tool_calls(&self, calls: &[ToolCall]) -> Vec<String> {
        enum Plan {
            /// Result known without execution (denial or schema problem).
            Resolved(String),
            Execute(Arc<dyn Tool>, Value, String),
        }

        let mut plans = Vec::with_capacity(calls.len());
        for call in calls {
            let Some(tool) = self.registry.get(&call.name) else {
                plans.push(Plan::Resolved(format!(
                    "Error: unknown tool '{}'",
                    call.name
                )));
                continue;
            };

            if !call.arguments.is_object() {
                plans.push(Plan::Resolved(format!(
                    "Error: arguments for '{}' must be a JSON object, got: {}",
                    call.name, call.arguments
                )));
                continue;
            }

            let decision = self.gate.decide(
                &call.name,
                &call.arguments,
                tool.risk(),
                tool.command_argument(),
            );
            if !decision.allowed() {
                tracing::info!(tool = %call.name, "tool call denied by user");
                plans.push(Plan::Resolved(format!(
                    "Tool call denied by user: {} was not executed",
                    call.name
                )));
                continue;
            }

            plans.push(Plan::Execute(
                tool,
                call.arguments.clone(),
                call.name.clone(),
            ));
        }

        let futures = plans.into_iter().map(|plan| async move {
            match plan {
                Plan::Resolved(text) => text,
                Plan::Execute(tool, args, name) => {
                    match tool.execute(args, &self.tool_ctx).await {
                        Ok(result) => result,
                        Err(error) => {
                            tracing::warn!(tool = %name, "tool execution failed: {error:#}");
                            format!("Error executing {name}: {error:#}")
                        }
                    }
                }
            }
        });

        join_all(futures).await
    }

    /// Convert a terminal transport failure into the session error taxonomy.
    async fn fatal_llm_error(&mut self, error: LlmError) -> AgentError {
        match error.kind {
            LlmErrorKind::Credential => AgentError::credential(&self.provider, error.message),
            LlmErrorKind::ContextTooLarge => {
                // Lower the ceiling for the next turn; never retry mid-call.
                let lowered = self.window.lower();
                if let Err(e) = self
                    .settings
                    .set_message_ceiling(&self.provider, lowered)
                    .await
                {
                    tracing::warn!("failed to persist lowered message ceiling: {e}");
                }
                AgentError::transport(
                    &self.provider,
                    format!(
                        "{} (message ceiling lowered to {lowered}; compaction will apply on the next turn)",
                        error.message
                    ),
                )
            }
            _ => AgentError::transport(&self.provider, error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{ApprovalMode, ApprovalPrompt, ApprovalRequest};
    use crate::llm::{ChatResponse, Role, ToolDefinition};
    use crate::settings::SettingsStore;
    use crate::tools::RiskTier;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Provider stub that replays a scripted response sequence and records
    /// the history snapshot of every request it receives.
    struct ScriptedClient {
        responses: Mutex<VecDeque<Result<ChatResponse, LlmError>>>,
        requests: Mutex<Vec<Vec<ChatMessage>>>,
        /// When the script runs dry, keep returning this response.
        fallback: Option<ChatResponse>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<Result<ChatResponse, LlmError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().collect()),
                requests: Mutex::new(Vec::new()),
                fallback: None,
            }
        }

        fn looping(fallback: ChatResponse) -> Self {
            Self {
                responses: Mutex::new(VecDeque::new()),
                requests: Mutex::new(Vec::new()),
                fallback: Some(fallback),
            }
        }

        fn requests(&self) -> Vec<Vec<ChatMessage>> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn chat(
            &self,
            _model: &str,
            messages: &[ChatMessage],
            _tools: &[ToolDefinition],
        ) -> Result<ChatResponse, LlmError> {
            self.requests.lock().unwrap().push(messages.to_vec());
            if let Some(next) = self.responses.lock().unwrap().pop_front() {
                return next;
            }
            match &self.fallback {
                Some(fallback) => Ok(fallback.clone()),
                None => panic!("scripted provider ran out of responses"),
            }
        }
    }

    fn text_response(text: &str) -> ChatResponse {
        ChatResponse {
            content: Some(text.to_string()),
            tool_calls: Vec::new(),
            stop_reason: Some("end_turn".into()),
            usage: Some(TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            }),
        }
    }

    fn tool_response(calls: Vec<(&str, &str, Value)>) -> ChatResponse {
        ChatResponse {
            content: None,
            tool_calls: calls
                .into_iter()
                .map(|(id, name, arguments)| ToolCall {
                    id: id.into(),
                    name: name.into(),
                    arguments,
                })
                .collect(),
            stop_reason: Some("tool_use".into()),
            usage: None,
        }
    }

    struct AlwaysApprove;
    impl ApprovalPrompt for AlwaysApprove {
        fn ask(&self, _request: &ApprovalRequest<'_>) -> bool {
            true
        }
    }

    struct AlwaysDeny;
    impl ApprovalPrompt for AlwaysDeny {
        fn ask(&self, _request: &ApprovalRequest<'_>) -> bool {
            false
        }
    }

    /// Minimal tool that echoes its `text` argument.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echo text back"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        fn risk(&self) -> RiskTier {
            RiskTier::Safe
        }
        async fn execute(&self, args: Value, _ctx: &ToolContext) -> anyhow::Result<String> {
            Ok(format!("echo: {}", args["text"].as_str().unwrap_or("")))
        }
    }

    /// Tool that always fails, for the error-capture path.
    struct BrokenTool;

    #[async_trait]
    impl Tool for BrokenTool {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        fn risk(&self) -> RiskTier {
            RiskTier::Medium
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> anyhow::Result<String> {
            Err(anyhow::anyhow!("disk on fire"))
        }
    }

    fn test_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(BrokenTool));
        registry
    }

    async fn test_session(
        llm: Arc<dyn LlmClient>,
        mode: ApprovalMode,
        approve: bool,
        max_iterations: usize,
    ) -> (Session, Arc<SettingsStore>, tempfile::TempDir) {
        let temp = tempfile::tempdir().unwrap();
        let config = Config {
            working_dir: temp.path().to_path_buf(),
            provider: "anthropic".into(),
            model: "claude-test".into(),
            max_iterations,
        };
        let settings = Arc::new(SettingsStore::new(&temp.path().to_path_buf()).await);
        let prompt: Box<dyn ApprovalPrompt> = if approve {
            Box::new(AlwaysApprove)
        } else {
            Box::new(AlwaysDeny)
        };
        let gate = ApprovalGate::new(mode, prompt);
        let session = Session::new(&config, llm, test_registry(), gate, settings.clone()).await;
        (session, settings, temp)
    }

    /// Every tool call gets exactly one result before the next provider call.
    #[tokio::test]
    async fn test_tool_calls_are_paired_before_next_provider_call() {
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(tool_response(vec![
                ("c1", "echo", json!({"text": "one"})),
                ("c2", "echo", json!({"text": "two"})),
            ])),
            Ok(text_response("all done")),
        ]));
        let (mut session, _settings, _temp) =
            test_session(client.clone(), ApprovalMode::Balanced, true, 10).await;

        let response = session.run_turn("do two things").await.unwrap();
        assert_eq!(response.text, "all done");
        assert!(!response.ceiling_hit);
        assert_eq!(response.turns_used, 2);

        // The second provider call must already contain both results.
        let requests = client.requests();
        assert_eq!(requests.len(), 2);
        let second = &requests[1];
        let result_ids: Vec<&str> = second
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(result_ids, vec!["c1", "c2"]);

        // In the final history, every call id appears as exactly one result.
        for id in ["c1", "c2"] {
            let count = session
                .history()
                .iter()
                .filter(|m| m.tool_call_id.as_deref() == Some(id))
                .count();
            assert_eq!(count, 1, "call {id} should have exactly one result");
        }
    }

    #[tokio::test]
    async fn test_denied_call_becomes_denial_notice_and_loop_continues() {
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(tool_response(vec![("c1", "broken", json!({}))])),
            Ok(text_response("understood")),
        ]));
        let (mut session, _settings, _temp) =
            test_session(client, ApprovalMode::Balanced, false, 10).await;

        let response = session.run_turn("try something risky").await.unwrap();
        assert_eq!(response.text, "understood");

        let denial = session
            .history()
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("c1"))
            .unwrap();
        assert!(denial.content.as_deref().unwrap().contains("denied by user"));
    }

    #[tokio::test]
    async fn test_unknown_tool_and_bad_arguments_are_schema_errors() {
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(tool_response(vec![
                ("c1", "no_such_tool", json!({})),
                ("c2", "echo", json!("not an object")),
            ])),
            Ok(text_response("recovered")),
        ]));
        let (mut session, _settings, _temp) =
            test_session(client, ApprovalMode::Balanced, true, 10).await;

        let response = session.run_turn("confuse the registry").await.unwrap();
        assert_eq!(response.text, "recovered");

        let history = session.history();
        let r1 = history
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("c1"))
            .unwrap();
        assert!(r1.content.as_deref().unwrap().contains("unknown tool"));
        let r2 = history
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("c2"))
            .unwrap();
        assert!(r2.content.as_deref().unwrap().contains("JSON object"));
    }

    #[tokio::test]
    async fn test_tool_failure_is_captured_not_fatal() {
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(tool_response(vec![("c1", "broken", json!({}))])),
            Ok(text_response("noted the failure")),
        ]));
        let (mut session, _settings, _temp) =
            test_session(client, ApprovalMode::Balanced, true, 10).await;

        let response = session.run_turn("run the broken tool").await.unwrap();
        assert_eq!(response.text, "noted the failure");

        let result = session
            .history()
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("c1"))
            .unwrap();
        assert!(result.content.as_deref().unwrap().contains("disk on fire"));
    }

    /// A provider that always wants another tool call stops at the ceiling.
    #[tokio::test]
    async fn test_iteration_ceiling_is_flagged() {
        let client = Arc::new(ScriptedClient::looping(tool_response(vec![(
            "loop",
            "echo",
            json!({"text": "again"}),
        )])));
        let (mut session, _settings, _temp) =
            test_session(client.clone(), ApprovalMode::Balanced, true, 4).await;

        let response = session.run_turn("never finish").await.unwrap();
        assert!(response.ceiling_hit);
        assert_eq!(response.turns_used, 4);
        assert_eq!(client.requests().len(), 4);
    }

    #[tokio::test]
    async fn test_transport_error_is_fatal_and_contextual() {
        let client = Arc::new(ScriptedClient::new(vec![Err(LlmError::server_error(
            503,
            "upstream overloaded",
        ))]));
        let (mut session, _settings, _temp) =
            test_session(client, ApprovalMode::Balanced, true, 10).await;

        let err = session.run_turn("hello").await.unwrap_err();
        match err {
            AgentError::Transport { provider, message } => {
                assert_eq!(provider, "anthropic");
                assert!(message.contains("upstream overloaded"));
            }
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_credential_error_maps_to_credential_variant() {
        let client = Arc::new(ScriptedClient::new(vec![Err(LlmError::credential(
            "refresh rejected",
        ))]));
        let (mut session, _settings, _temp) =
            test_session(client, ApprovalMode::Balanced, true, 10).await;

        let err = session.run_turn("hello").await.unwrap_err();
        assert!(matches!(err, AgentError::Credential { .. }));
    }

    /// A context-size rejection lowers the ceiling for the next turn and is
    /// surfaced, never retried mid-call.
    #[tokio::test]
    async fn test_context_overflow_lowers_ceiling() {
        let client = Arc::new(ScriptedClient::new(vec![Err(LlmError::context_too_large(
            "prompt is too long",
        ))]));
        let (mut session, settings, _temp) =
            test_session(client, ApprovalMode::Balanced, true, 10).await;

        let before = session.context_ceiling();
        let err = session.run_turn("hello").await.unwrap_err();
        assert!(matches!(err, AgentError::Transport { .. }));
        assert_eq!(session.context_ceiling(), before / 2);
        // The lowered ceiling is persisted for the provider.
        assert_eq!(settings.message_ceiling("anthropic").await, before / 2);
    }

    /// Long multi-turn conversations stay within the ceiling via compaction
    /// while keeping call/result pairs intact.
    #[tokio::test]
    async fn test_history_stays_bounded_across_turns() {
        let client = Arc::new(ScriptedClient::looping(text_response("ok")));
        let (mut session, _settings, _temp) =
            test_session(client, ApprovalMode::Balanced, true, 10).await;
        session.window = ContextWindow::new(8);

        for i in 0..20 {
            session.run_turn(&format!("message {i}")).await.unwrap();
        }
        // Ceiling 8 plus at most the two messages appended after the final
        // pre-call compaction.
        assert!(session.history().len() <= 10);
        assert_eq!(
            session
                .history()
                .iter()
                .filter(|m| m.condensed)
                .count(),
            1
        );
    }
}
