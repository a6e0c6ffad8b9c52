//! File operation tools: read, write, list.
//!
//! Paths can be absolute or relative to the session working directory.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{resolve_path, RiskTier, Tool, ToolContext};

/// Read the contents of a file.
pub struct ReadFile;

#[async_trait]
impl Tool for ReadFile {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Returns the file content as text, optionally restricted to a line range. Use this to inspect files before editing them."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, absolute or relative to the working directory."
                },
                "start_line": {
                    "type": "integer",
                    "description": "Optional: start reading from this line number (1-indexed)."
                },
                "end_line": {
                    "type": "integer",
                    "description": "Optional: stop reading at this line number (inclusive)."
                }
            },
            "required": ["path"]
        })
    }

    fn risk(&self) -> RiskTier {
        RiskTier::Safe
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let path = args["path"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'path' argument"))?;
        let full_path = resolve_path(path, &ctx.working_dir);

        if !full_path.exists() {
            return Err(anyhow::anyhow!("File not found: {}", path));
        }

        let content = tokio::fs::read_to_string(&full_path).await?;

        let start_line = args["start_line"].as_u64().map(|n| n as usize);
        let end_line = args["end_line"].as_u64().map(|n| n as usize);
        if start_line.is_none() && end_line.is_none() {
            return Ok(content);
        }

        let lines: Vec<&str> = content.lines().collect();
        let total = lines.len();
        let start = start_line.unwrap_or(1).saturating_sub(1).min(total);
        let end = end_line.unwrap_or(total).min(total).max(start);

        Ok(lines[start..end].join("\n"))
    }
}

/// Write content to a file, creating parent directories as needed.
pub struct WriteFile;

#[async_trait]
impl Tool for WriteFile {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write text content to a file, replacing any existing content. Parent directories are created if missing."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, absolute or relative to the working directory."
                },
                "content": {
                    "type": "string",
                    "description": "Full text content to write."
                }
            },
            "required": ["path", "content"]
        })
    }

    fn risk(&self) -> RiskTier {
        RiskTier::Medium
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let path = args["path"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'path' argument"))?;
        let content = args["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'content' argument"))?;

        let full_path = resolve_path(path, &ctx.working_dir);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full_path, content).await?;

        tracing::debug!(path = %full_path.display(), bytes = content.len(), "wrote file");
        Ok(format!("Wrote {} bytes to {}", content.len(), path))
    }
}

/// List the entries of a directory.
pub struct ListDir;

#[async_trait]
impl Tool for ListDir {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a directory. Directories are marked with a trailing slash."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory path, absolute or relative to the working directory. Defaults to the working directory."
                }
            }
        })
    }

    fn risk(&self) -> RiskTier {
        RiskTier::Safe
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let path = args["path"].as_str().unwrap_or(".");
        let full_path = resolve_path(path, &ctx.working_dir);

        let mut read_dir = tokio::fs::read_dir(&full_path)
            .await
            .map_err(|e| anyhow::anyhow!("Cannot list {}: {}", path, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
        }
        entries.sort();

        if entries.is_empty() {
            Ok(format!("{path} is empty"))
        } else {
            Ok(entries.join("\n"))
        }
    }
}
