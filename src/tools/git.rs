//! Version control tools, driving the git CLI.

use std::path::Path;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use super::{RiskTier, Tool, ToolContext};

/// Run git with the given arguments and return stdout, or a combined error.
async fn run_git(working_dir: &Path, args: &[&str]) -> anyhow::Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(working_dir)
        .output()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run git: {}", e))?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if output.status.success() {
        Ok(stdout)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(anyhow::anyhow!(
            "git {} failed: {}",
            args.first().unwrap_or(&""),
            if stderr.trim().is_empty() {
                stdout.trim()
            } else {
                stderr.trim()
            }
        ))
    }
}

/// Working-tree status summary.
pub struct GitStatus;

#[async_trait]
impl Tool for GitStatus {
    fn name(&self) -> &str {
        "git_status"
    }

    fn description(&self) -> &str {
        "Show the current branch and a short status of the working tree."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn risk(&self) -> RiskTier {
        RiskTier::Safe
    }

    async fn execute(&self, _args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let branch = run_git(&ctx.working_dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        let status = run_git(&ctx.working_dir, &["status", "--porcelain"]).await?;

        let mut result = format!("On branch {}", branch.trim());
        if status.trim().is_empty() {
            result.push_str("\nWorking tree clean");
        } else {
            result.push('\n');
            result.push_str(status.trim_end());
        }
        Ok(result)
    }
}

/// Diff of unstaged or staged changes.
pub struct GitDiff;

#[async_trait]
impl Tool for GitDiff {
    fn name(&self) -> &str {
        "git_diff"
    }

    fn description(&self) -> &str {
        "Show changes in the working tree. Set staged=true for the index, and path to restrict the diff."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "staged": {
                    "type": "boolean",
                    "description": "Diff the index instead of the working tree (default: false)."
                },
                "path": {
                    "type": "string",
                    "description": "Optional: restrict the diff to this path."
                }
            }
        })
    }

    fn risk(&self) -> RiskTier {
        RiskTier::Safe
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let mut git_args = vec!["diff"];
        if args["staged"].as_bool().unwrap_or(false) {
            git_args.push("--staged");
        }
        if let Some(path) = args["path"].as_str() {
            git_args.push("--");
            git_args.push(path);
        }

        let diff = run_git(&ctx.working_dir, &git_args).await?;
        if diff.trim().is_empty() {
            Ok("No changes".to_string())
        } else {
            Ok(diff)
        }
    }
}

/// Create a commit from the current changes.
pub struct GitCommit;

#[async_trait]
impl Tool for GitCommit {
    fn name(&self) -> &str {
        "git_commit"
    }

    fn description(&self) -> &str {
        "Create a git commit with the given message. Stages all tracked changes first unless stage_all is false."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "Commit message."
                },
                "stage_all": {
                    "type": "boolean",
                    "description": "Stage all changes before committing (default: true)."
                }
            },
            "required": ["message"]
        })
    }

    fn risk(&self) -> RiskTier {
        RiskTier::Medium
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let message = args["message"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'message' argument"))?;
        if message.trim().is_empty() {
            return Err(anyhow::anyhow!("Commit message must not be empty"));
        }

        if args["stage_all"].as_bool().unwrap_or(true) {
            run_git(&ctx.working_dir, &["add", "-A"]).await?;
        }

        let result = run_git(&ctx.working_dir, &["commit", "-m", message]).await?;
        Ok(result.trim_end().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessTable;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn ctx(dir: &std::path::Path) -> ToolContext {
        ToolContext {
            working_dir: dir.to_path_buf(),
            processes: Arc::new(ProcessTable::new()),
        }
    }

    async fn init_repo(dir: &std::path::Path) {
        for args in [
            vec!["init", "-q"],
            vec!["config", "user.email", "test@example.com"],
            vec!["config", "user.name", "Test"],
        ] {
            run_git(dir, &args).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_status_diff_commit_flow() {
        let temp = tempdir().unwrap();
        init_repo(temp.path()).await;
        let ctx = ctx(temp.path());

        std::fs::write(temp.path().join("hello.txt"), "hi\n").unwrap();

        let status = GitStatus.execute(json!({}), &ctx).await.unwrap();
        assert!(status.contains("hello.txt"));

        let committed = GitCommit
            .execute(json!({"message": "add hello"}), &ctx)
            .await
            .unwrap();
        assert!(committed.contains("add hello"));

        let status = GitStatus.execute(json!({}), &ctx).await.unwrap();
        assert!(status.contains("Working tree clean"));

        // Modify and check the diff path.
        std::fs::write(temp.path().join("hello.txt"), "hi there\n").unwrap();
        let diff = GitDiff.execute(json!({}), &ctx).await.unwrap();
        assert!(diff.contains("+hi there"));
    }

    #[tokio::test]
    async fn test_commit_requires_message() {
        let temp = tempdir().unwrap();
        init_repo(temp.path()).await;
        let ctx = ctx(temp.path());

        let err = GitCommit.execute(json!({}), &ctx).await.unwrap_err();
        assert!(err.to_string().contains("message"));

        let err = GitCommit
            .execute(json!({"message": "  "}), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[tokio::test]
    async fn test_outside_a_repository_is_a_tool_error() {
        let temp = tempdir().unwrap();
        let ctx = ctx(temp.path());
        let err = GitStatus.execute(json!({}), &ctx).await.unwrap_err();
        assert!(err.to_string().contains("git"));
    }
}
