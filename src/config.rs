//! Process-level configuration, read once from the environment at startup.

use std::path::PathBuf;

/// Default hard ceiling on provider round-trips within one `run_turn`.
pub const DEFAULT_MAX_ITERATIONS: usize = 25;

/// Runtime configuration for one agent process.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory tools resolve relative paths against.
    pub working_dir: PathBuf,
    /// Provider key used for settings lookup and error context.
    pub provider: String,
    /// Model identifier sent to the provider.
    pub model: String,
    /// Hard ceiling on provider round-trips per user turn.
    pub max_iterations: usize,
}

impl Config {
    pub fn from_env() -> Self {
        let working_dir = std::env::var("PAIRTERM_WORKING_DIR")
            .map(PathBuf::from)
            .ok()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        let model = std::env::var("PAIRTERM_MODEL")
            .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string());

        let max_iterations = std::env::var("PAIRTERM_MAX_ITERATIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_MAX_ITERATIONS);

        Self {
            working_dir,
            provider: "anthropic".to_string(),
            model,
            max_iterations,
        }
    }
}
