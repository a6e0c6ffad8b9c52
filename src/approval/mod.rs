//! Risk-classified approval gate.
//!
//! Every tool call the model requests passes through here before execution.
//! The gate combines three inputs: the tool's static risk tier, the session
//! approval mode, and (for shell tools) the dangerous-command analysis. It
//! never inspects tool semantics beyond that.

pub mod command_risk;

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::RiskTier;

/// Session-wide approval posture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    /// Every tool call requires an explicit per-call decision.
    Paranoid,
    /// Safe tools auto-approved; medium/high ask every time.
    #[default]
    Balanced,
    /// Safe tools auto-approved; medium/high ask once per tool name and the
    /// decision is remembered for the rest of the session.
    Trusting,
}

impl ApprovalMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paranoid" => Some(Self::Paranoid),
            "balanced" => Some(Self::Balanced),
            "trusting" => Some(Self::Trusting),
            _ => None,
        }
    }
}

impl std::fmt::Display for ApprovalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalMode::Paranoid => write!(f, "paranoid"),
            ApprovalMode::Balanced => write!(f, "balanced"),
            ApprovalMode::Trusting => write!(f, "trusting"),
        }
    }
}

/// Outcome of one gate decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    AutoApproved,
    ApprovedByUser,
    DeniedByUser,
}

impl ApprovalDecision {
    pub fn allowed(&self) -> bool {
        !matches!(self, ApprovalDecision::DeniedByUser)
    }
}

/// What the UI layer sees when a decision is needed.
#[derive(Debug)]
pub struct ApprovalRequest<'a> {
    pub tool_name: &'a str,
    pub arguments: &'a Value,
    pub risk: RiskTier,
    /// Dangerous-command warnings, when the escalation rule fired.
    pub warnings: &'a [String],
}

/// Synchronous UI callback for approval decisions.
pub trait ApprovalPrompt: Send + Sync {
    /// Return true to approve the call.
    fn ask(&self, request: &ApprovalRequest<'_>) -> bool;
}

/// The gate. Owns the remembered-decision map; reset only at session end.
pub struct ApprovalGate {
    mode: ApprovalMode,
    prompt: Box<dyn ApprovalPrompt>,
    remembered: Mutex<HashMap<String, ApprovalDecision>>,
}

impl ApprovalGate {
    pub fn new(mode: ApprovalMode, prompt: Box<dyn ApprovalPrompt>) -> Self {
        Self {
            mode,
            prompt,
            remembered: Mutex::new(HashMap::new()),
        }
    }

    pub fn mode(&self) -> ApprovalMode {
        self.mode
    }

    /// Decide whether one tool call may proceed.
    ///
    /// `command_argument` names the argument holding a shell command for
    /// shell-execution tools; its value is run through the dangerous-command
    /// analysis and a match forces a per-call decision that is never
    /// remembered, regardless of mode.
    pub fn decide(
        &self,
        tool_name: &str,
        arguments: &Value,
        risk: RiskTier,
        command_argument: Option<&str>,
    ) -> ApprovalDecision {
        if let Some(arg_key) = command_argument {
            if let Some(command) = arguments.get(arg_key).and_then(Value::as_str) {
                let assessment = command_risk::assess_command(command);
                if assessment.escalate {
                    tracing::info!(
                        tool = tool_name,
                        warnings = ?assessment.warnings,
                        "dangerous command pattern, forcing per-call approval"
                    );
                    return self.ask_user(tool_name, arguments, risk, &assessment.warnings);
                }
            }
        }

        match self.mode {
            ApprovalMode::Paranoid => self.ask_user(tool_name, arguments, risk, &[]),
            ApprovalMode::Balanced => {
                if risk == RiskTier::Safe {
                    ApprovalDecision::AutoApproved
                } else {
                    self.ask_user(tool_name, arguments, risk, &[])
                }
            }
            ApprovalMode::Trusting => {
                if risk == RiskTier::Safe {
                    return ApprovalDecision::AutoApproved;
                }
                if let Some(decision) = self
                    .remembered
                    .lock()
                    .expect("remembered decisions lock poisoned")
                    .get(tool_name)
                {
                    tracing::debug!(tool = tool_name, "reusing remembered approval decision");
                    return *decision;
                }
                let decision = self.ask_user(tool_name, arguments, risk, &[]);
                self.remembered
                    .lock()
                    .expect("remembered decisions lock poisoned")
                    .insert(tool_name.to_string(), decision);
                decision
            }
        }
    }

    fn ask_user(
        &self,
        tool_name: &str,
        arguments: &Value,
        risk: RiskTier,
        warnings: &[String],
    ) -> ApprovalDecision {
        let request = ApprovalRequest {
            tool_name,
            arguments,
            risk,
            warnings,
        };
        if self.prompt.ask(&request) {
            ApprovalDecision::ApprovedByUser
        } else {
            ApprovalDecision::DeniedByUser
        }
    }
}
