//! Local tools the model can drive.
//!
//! Each tool declares a name, an input schema, and a static risk tier; the
//! registry maps tool names to boxed implementations and is built once at
//! startup. Risk is a field on the tool itself, not a side table keyed by
//! name matching.

pub mod file_ops;
pub mod git;
pub mod search;
pub mod terminal;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::ToolDefinition;
use crate::process::ProcessTable;

/// Static risk classification, used by the approval gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Safe,
    Medium,
    High,
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskTier::Safe => write!(f, "safe"),
            RiskTier::Medium => write!(f, "medium"),
            RiskTier::High => write!(f, "high"),
        }
    }
}

/// Execution context passed to every tool call.
pub struct ToolContext {
    /// Directory relative paths resolve against.
    pub working_dir: PathBuf,
    /// Background process table, shared with the session.
    pub processes: Arc<ProcessTable>,
}

/// Contract every registered tool satisfies.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    fn risk(&self) -> RiskTier;

    /// Name of the argument carrying a shell command string, if any. The
    /// approval gate runs its dangerous-command analysis on that argument.
    fn command_argument(&self) -> Option<&str> {
        None
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String>;
}

/// Resolve a path: absolute paths pass through, relative paths join the
/// working directory.
pub(crate) fn resolve_path(path_str: &str, working_dir: &Path) -> PathBuf {
    let path = Path::new(path_str);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        working_dir.join(path)
    }
}

/// Name → implementation lookup table, built once at startup.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// The fixed tool set: file I/O, search, shell execution (sync and
    /// background), and version control.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(file_ops::ReadFile));
        registry.register(Arc::new(file_ops::WriteFile));
        registry.register(Arc::new(file_ops::ListDir));
        registry.register(Arc::new(search::SearchFiles));
        registry.register(Arc::new(terminal::RunCommand));
        registry.register(Arc::new(terminal::RunBackground));
        registry.register(Arc::new(terminal::CheckProcess));
        registry.register(Arc::new(terminal::ProcessOutput));
        registry.register(Arc::new(terminal::KillProcess));
        registry.register(Arc::new(terminal::ListProcesses));
        registry.register(Arc::new(git::GitStatus));
        registry.register(Arc::new(git::GitDiff));
        registry.register(Arc::new(git::GitCommit));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions advertised to the provider, carrying the local risk
    /// annotation. Sorted by name so payloads are reproducible.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.parameters_schema(),
                risk_tier: Some(tool.risk().to_string()),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_contents() {
        let registry = ToolRegistry::builtin();
        for name in [
            "read_file",
            "write_file",
            "list_dir",
            "search_files",
            "run_command",
            "run_background",
            "check_process",
            "process_output",
            "kill_process",
            "list_processes",
            "git_status",
            "git_diff",
            "git_commit",
        ] {
            assert!(registry.get(name).is_some(), "missing tool {name}");
        }
        assert!(registry.get("no_such_tool").is_none());
    }

    #[test]
    fn test_risk_is_a_pure_function_of_the_tool() {
        let registry = ToolRegistry::builtin();
        assert_eq!(registry.get("read_file").unwrap().risk(), RiskTier::Safe);
        assert_eq!(registry.get("write_file").unwrap().risk(), RiskTier::Medium);
        assert_eq!(registry.get("run_command").unwrap().risk(), RiskTier::High);
        assert_eq!(registry.get("git_status").unwrap().risk(), RiskTier::Safe);
        assert_eq!(registry.get("git_commit").unwrap().risk(), RiskTier::Medium);
    }

    #[test]
    fn test_definitions_are_sorted_and_annotated() {
        let registry = ToolRegistry::builtin();
        let defs = registry.definitions();
        assert_eq!(defs.len(), registry.len());
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(defs.iter().all(|d| d.risk_tier.is_some()));
    }

    #[test]
    fn test_shell_tools_expose_command_argument() {
        let registry = ToolRegistry::builtin();
        assert_eq!(
            registry.get("run_command").unwrap().command_argument(),
            Some("command")
        );
        assert_eq!(
            registry.get("run_background").unwrap().command_argument(),
            Some("command")
        );
        assert_eq!(registry.get("read_file").unwrap().command_argument(), None);
    }

    #[test]
    fn test_resolve_path() {
        let dir = Path::new("/work");
        assert_eq!(resolve_path("/etc/hosts", dir), PathBuf::from("/etc/hosts"));
        assert_eq!(resolve_path("src/main.rs", dir), PathBuf::from("/work/src/main.rs"));
    }
}
