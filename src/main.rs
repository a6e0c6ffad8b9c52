//! Terminal entry point: wires configuration, credentials, and the session,
//! then runs a minimal read-eval loop over stdin.

use std::io::{BufRead, Write};
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use pairterm::approval::{ApprovalGate, ApprovalPrompt, ApprovalRequest};
use pairterm::auth::{CredentialProvider, HttpTokenRefresher};
use pairterm::config::Config;
use pairterm::llm::AnthropicClient;
use pairterm::session::Session;
use pairterm::settings::{ProviderSettings, SettingsStore};
use pairterm::tools::ToolRegistry;
use pairterm::AgentError;

/// Blocking terminal prompt for approval decisions.
struct TerminalPrompt;

impl ApprovalPrompt for TerminalPrompt {
    fn ask(&self, request: &ApprovalRequest<'_>) -> bool {
        let mut stdout = std::io::stdout();
        let _ = writeln!(
            stdout,
            "\n[approval] {} ({} risk)\n  args: {}",
            request.tool_name, request.risk, request.arguments
        );
        for warning in request.warnings {
            let _ = writeln!(stdout, "  warning: {warning}");
        }
        let _ = write!(stdout, "  allow? [y/N] ");
        let _ = stdout.flush();

        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim(), "y" | "Y" | "yes")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pairterm=info")),
        )
        .init();

    let config = Config::from_env();
    let settings = Arc::new(SettingsStore::new(&config.working_dir).await);

    // Prefer a stored OAuth pair; fall back to a static API key.
    let provider_settings = settings.provider_settings(&config.provider).await;
    let credentials = match provider_settings {
        Some(ProviderSettings {
            oauth: Some(tokens),
            ..
        }) => {
            let token_url = std::env::var("PAIRTERM_OAUTH_TOKEN_URL")
                .unwrap_or_else(|_| "https://console.anthropic.com/v1/oauth/token".to_string());
            let client_id = std::env::var("PAIRTERM_OAUTH_CLIENT_ID").unwrap_or_default();
            Arc::new(CredentialProvider::oauth(
                config.provider.clone(),
                tokens,
                Box::new(HttpTokenRefresher::new(token_url, client_id)),
                Some(settings.clone()),
            ))
        }
        Some(ProviderSettings {
            api_key: Some(key), ..
        }) => Arc::new(CredentialProvider::api_key(config.provider.clone(), key)),
        _ => {
            anyhow::bail!(
                "no credentials for provider '{}': set ANTHROPIC_API_KEY or store an OAuth token pair",
                config.provider
            );
        }
    };

    let llm = Arc::new(AnthropicClient::new(credentials));
    let mode = settings.approval_mode().await;
    let gate = ApprovalGate::new(mode, Box::new(TerminalPrompt));

    let mut session = Session::new(
        &config,
        llm,
        ToolRegistry::builtin(),
        gate,
        settings.clone(),
    )
    .await;

    println!(
        "pairterm ready (model {}, approval mode {}). Type a task, or 'exit' to quit.",
        config.model, mode
    );

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "exit" | "quit") {
            break;
        }

        match session.run_turn(input).await {
            Ok(response) => {
                println!("{}", response.text);
                if response.ceiling_hit {
                    println!(
                        "(stopped at the iteration ceiling after {} provider calls)",
                        response.turns_used
                    );
                }
            }
            Err(err @ AgentError::Credential { .. }) => {
                eprintln!("fatal: {err}");
                break;
            }
            Err(err) => {
                eprintln!("error: {err}");
            }
        }
    }

    // Kill surviving background processes and release their handles.
    session.processes().shutdown().await;
    let usage = session.usage();
    tracing::info!(
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        "session finished"
    );
    Ok(())
}
