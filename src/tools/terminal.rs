//! Shell command execution, synchronous and background.
//!
//! `run_command` blocks the turn until the command finishes (with a
//! timeout); the `run_background` family hands the command to the process
//! table and returns immediately with a handle the model can poll.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{RiskTier, Tool, ToolContext};

const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_OUTPUT_CHARS: usize = 10_000;
const MAX_OUTPUT_CHARS_LIMIT: usize = 50_000;

/// Sanitize command output for model consumption: reject mostly-binary
/// buffers and strip control characters that are not line structure.
fn sanitize_output(bytes: &[u8]) -> String {
    let non_printable = bytes
        .iter()
        .filter(|&&b| b < 0x20 && b != b'\n' && b != b'\r' && b != b'\t')
        .count();

    if bytes.len() > 100 && non_printable > bytes.len() / 10 {
        return format!(
            "[binary output: {} bytes, {}% non-printable]",
            bytes.len(),
            non_printable * 100 / bytes.len()
        );
    }

    String::from_utf8_lossy(bytes)
        .chars()
        .filter(|&c| c == '\n' || c == '\r' || c == '\t' || (c >= ' ' && c != '\u{FFFD}'))
        .collect()
}

fn parse_timeout(args: &Value) -> Duration {
    args.get("timeout_secs")
        .and_then(Value::as_u64)
        .map(|secs| Duration::from_secs(secs.max(1)))
        .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
}

fn parse_max_output_chars(args: &Value) -> usize {
    args.get("max_output_chars")
        .and_then(Value::as_u64)
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_MAX_OUTPUT_CHARS)
        .clamp(1, MAX_OUTPUT_CHARS_LIMIT)
}

/// Run a shell command and wait for it to finish.
pub struct RunCommand;

#[async_trait]
impl Tool for RunCommand {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the working directory and wait for completion. Use for builds, tests, and quick inspections. For long-running commands use run_background instead."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute."
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Timeout in seconds (default: 60)."
                },
                "stdin": {
                    "type": "string",
                    "description": "Optional text to pass on stdin."
                },
                "max_output_chars": {
                    "type": "integer",
                    "description": "Maximum output characters to return (default: 10000)."
                }
            },
            "required": ["command"]
        })
    }

    fn risk(&self) -> RiskTier {
        RiskTier::High
    }

    fn command_argument(&self) -> Option<&str> {
        Some("command")
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let command = args["command"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'command' argument"))?;
        let timeout = parse_timeout(&args);
        let max_output_chars = parse_max_output_chars(&args);
        let stdin_text = args["stdin"].as_str().map(str::to_string);

        tracing::info!(cwd = %ctx.working_dir.display(), command, "executing command");

        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&ctx.working_dir)
            .stdin(if stdin_text.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to execute command: {}", e))?;

        if let Some(input) = stdin_text {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(input.as_bytes())
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to write to stdin: {}", e))?;
            }
        }

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(anyhow::anyhow!("Failed to execute command: {}", e)),
            Err(_) => {
                return Err(anyhow::anyhow!(
                    "Command timed out after {} seconds",
                    timeout.as_secs()
                ))
            }
        };

        let stdout = sanitize_output(&output.stdout);
        let stderr = sanitize_output(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);

        let mut result = format!("Exit code: {exit_code}\n");
        if !stdout.is_empty() {
            result.push_str("\n--- stdout ---\n");
            result.push_str(&stdout);
        }
        if !stderr.is_empty() {
            result.push_str("\n--- stderr ---\n");
            result.push_str(&stderr);
        }

        if result.len() > max_output_chars {
            result.truncate(max_output_chars);
            result.push_str("\n... [output truncated]");
        }

        Ok(result)
    }
}

/// Start a command in the background and return a handle immediately.
pub struct RunBackground;

#[async_trait]
impl Tool for RunBackground {
    fn name(&self) -> &str {
        "run_background"
    }

    fn description(&self) -> &str {
        "Start a long-running shell command in the background. Returns a process id immediately; use check_process and process_output to follow it, kill_process to stop it."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to run in the background."
                }
            },
            "required": ["command"]
        })
    }

    fn risk(&self) -> RiskTier {
        RiskTier::Medium
    }

    fn command_argument(&self) -> Option<&str> {
        Some("command")
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let command = args["command"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'command' argument"))?;
        let id = ctx.processes.spawn(command).await?;
        Ok(format!("Started background process {id}"))
    }
}

/// Poll the liveness of a background process.
pub struct CheckProcess;

#[async_trait]
impl Tool for CheckProcess {
    fn name(&self) -> &str {
        "check_process"
    }

    fn description(&self) -> &str {
        "Check the status of a background process: running, exited(code), or killed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "process_id": {
                    "type": "string",
                    "description": "Id returned by run_background."
                }
            },
            "required": ["process_id"]
        })
    }

    fn risk(&self) -> RiskTier {
        RiskTier::Safe
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let id = args["process_id"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'process_id' argument"))?;
        let status = ctx.processes.status(id).await?;
        Ok(format!("Process {id}: {status}"))
    }
}

/// Fetch captured output from a background process.
pub struct ProcessOutput;

#[async_trait]
impl Tool for ProcessOutput {
    fn name(&self) -> &str {
        "process_output"
    }

    fn description(&self) -> &str {
        "Return the captured output of a background process. Safe to call while it is still running; returns the output so far."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "process_id": {
                    "type": "string",
                    "description": "Id returned by run_background."
                },
                "tail_lines": {
                    "type": "integer",
                    "description": "Optional: return only the most recent N lines."
                }
            },
            "required": ["process_id"]
        })
    }

    fn risk(&self) -> RiskTier {
        RiskTier::Safe
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let id = args["process_id"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'process_id' argument"))?;
        let tail_lines = args["tail_lines"].as_u64().map(|n| n as usize);
        let output = ctx.processes.output(id, tail_lines).await?;
        if output.is_empty() {
            Ok(format!("Process {id} has produced no output yet"))
        } else {
            Ok(output)
        }
    }
}

/// Terminate a background process.
pub struct KillProcess;

#[async_trait]
impl Tool for KillProcess {
    fn name(&self) -> &str {
        "kill_process"
    }

    fn description(&self) -> &str {
        "Send a termination signal to a background process."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "process_id": {
                    "type": "string",
                    "description": "Id returned by run_background."
                }
            },
            "required": ["process_id"]
        })
    }

    fn risk(&self) -> RiskTier {
        RiskTier::Medium
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let id = args["process_id"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'process_id' argument"))?;
        ctx.processes.interrupt(id).await?;
        Ok(format!("Sent termination signal to process {id}"))
    }
}

/// List every process the table knows about.
pub struct ListProcesses;

#[async_trait]
impl Tool for ListProcesses {
    fn name(&self) -> &str {
        "list_processes"
    }

    fn description(&self) -> &str {
        "List all background processes started this session, with their status."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn risk(&self) -> RiskTier {
        RiskTier::Safe
    }

    async fn execute(&self, _args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let infos = ctx.processes.list().await;
        if infos.is_empty() {
            return Ok("No background processes".to_string());
        }
        let rows: Vec<String> = infos
            .iter()
            .map(|info| format!("{}  {}  {}", info.id, info.status, info.command))
            .collect();
        Ok(rows.join("\n"))
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

    #[tokio::test]
    async fn test_run_command_captures_exit_and_output() {
        let temp = tempdir().unwrap();
        let ctx = ctx(temp.path());

        let out = RunCommand
            .execute(json!({"command": "echo hello; echo oops >&2; exit 2"}), &ctx)
            .await
            .unwrap();
        assert!(out.contains("Exit code: 2"));
        assert!(out.contains("hello"));
        assert!(out.contains("oops"));
    }

    #[tokio::test]
    async fn test_run_command_times_out() {
        let temp = tempdir().unwrap();
        let ctx = ctx(temp.path());

        let err = RunCommand
            .execute(json!({"command": "sleep 10", "timeout_secs": 1}), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_run_command_respects_working_dir_and_stdin() {
        let temp = tempdir().unwrap();
        let ctx = ctx(temp.path());

        let out = RunCommand
            .execute(json!({"command": "pwd"}), &ctx)
            .await
            .unwrap();
        assert!(out.contains(&temp.path().file_name().unwrap().to_string_lossy().to_string()));

        let out = RunCommand
            .execute(json!({"command": "cat", "stdin": "piped text"}), &ctx)
            .await
            .unwrap();
        assert!(out.contains("piped text"));
    }

    #[tokio::test]
    async fn test_output_truncation() {
        let temp = tempdir().unwrap();
        let ctx = ctx(temp.path());

        let out = RunCommand
            .execute(
                json!({"command": "yes x | head -2000", "max_output_chars": 200}),
                &ctx,
            )
            .await
            .unwrap();
        assert!(out.len() <= 200 + "\n... [output truncated]".len());
        assert!(out.ends_with("[output truncated]"));
    }

    #[tokio::test]
    async fn test_background_round_trip_through_tools() {
        let temp = tempdir().unwrap();
        let ctx = ctx(temp.path());

        let started = RunBackground
            .execute(json!({"command": "echo bg; sleep 5"}), &ctx)
            .await
            .unwrap();
        let id = started.rsplit(' ').next().unwrap().to_string();

        let status = CheckProcess
            .execute(json!({"process_id": id}), &ctx)
            .await
            .unwrap();
        assert!(status.contains("running"));

        KillProcess
            .execute(json!({"process_id": id}), &ctx)
            .await
            .unwrap();
        let status = CheckProcess
            .execute(json!({"process_id": id}), &ctx)
            .await
            .unwrap();
        assert!(status.contains("killed"));

        let listing = ListProcesses.execute(json!({}), &ctx).await.unwrap();
        assert!(listing.contains(&id));
    }

    #[tokio::test]
    async fn test_unknown_process_is_a_tool_error() {
        let temp = tempdir().unwrap();
        let ctx = ctx(temp.path());
        let err = CheckProcess
            .execute(json!({"process_id": "stale"}), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown process id"));
    }

    #[test]
    fn test_sanitize_output_flags_binary() {
        let mut binary = vec![0u8; 200];
        binary.extend_from_slice(b"some text");
        let sanitized = sanitize_output(&binary);
        assert!(sanitized.contains("binary output"));

        let text = sanitize_output("plain\ttext\nline".as_bytes());
        assert_eq!(text, "plain\ttext\nline");
    }
}
