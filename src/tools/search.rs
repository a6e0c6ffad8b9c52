//! Content search over the working tree.

use std::path::PathBuf;

use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::{json, Value};
use walkdir::WalkDir;

use super::{resolve_path, RiskTier, Tool, ToolContext};

const DEFAULT_MAX_RESULTS: usize = 50;
/// Directories that are never worth searching.
const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules", ".pairterm"];

/// Search file contents with a regular expression.
pub struct SearchFiles;

#[async_trait]
impl Tool for SearchFiles {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search file contents under a directory with a regular expression. Returns matching lines as path:line:text. Binary files and build directories are skipped."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for."
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search, absolute or relative to the working directory. Defaults to the working directory."
                },
                "case_insensitive": {
                    "type": "boolean",
                    "description": "Match case-insensitively (default: false)."
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of matching lines to return (default: 50)."
                }
            },
            "required": ["pattern"]
        })
    }

    fn risk(&self) -> RiskTier {
        RiskTier::Safe
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let pattern = args["pattern"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'pattern' argument"))?
            .to_string();
        let case_insensitive = args["case_insensitive"].as_bool().unwrap_or(false);
        let max_results = args["max_results"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .clamp(1, 500);

        let root = args["path"]
            .as_str()
            .map(|p| resolve_path(p, &ctx.working_dir))
            .unwrap_or_else(|| ctx.working_dir.clone());

        let regex = RegexBuilder::new(&pattern)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| anyhow::anyhow!("Invalid pattern: {}", e))?;

        // The directory walk is blocking; keep it off the async executor.
        let matches =
            tokio::task::spawn_blocking(move || search_tree(&root, &regex, max_results)).await?;

        if matches.is_empty() {
            Ok("No matches found".to_string())
        } else {
            Ok(matches.join("\n"))
        }
    }
}

fn search_tree(root: &PathBuf, regex: &regex::Regex, max_results: usize) -> Vec<String> {
    let mut results = Vec::new();

    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        entry
            .file_name()
            .to_str()
            .map(|name| !SKIPPED_DIRS.contains(&name))
            .unwrap_or(true)
    });

    for entry in walker.flatten() {
        if results.len() >= max_results {
            break;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        // Skip files that are not valid UTF-8 text.
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        let display = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .display()
            .to_string();
        for (line_no, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                results.push(format!("{display}:{}:{}", line_no + 1, line.trim_end()));
                if results.len() >= max_results {
                    break;
                }
            }
        }
    }

    results
}
