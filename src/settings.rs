//! Persisted settings storage.
//!
//! Persists user-configurable settings to disk at
//! `{working_dir}/.pairterm/settings.json`. Environment variables are used
//! as initial defaults when no settings file exists. The store holds the
//! session approval mode, per-provider message ceilings, and credential
//! records; other components consume typed records and never touch the file
//! format.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::approval::ApprovalMode;

/// Default per-provider message ceiling before compaction kicks in.
pub const DEFAULT_MESSAGE_CEILING: usize = 40;
/// Message-count floor: the ceiling is never lowered below this.
pub const MIN_MESSAGE_CEILING: usize = 8;

/// Stored OAuth token pair for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Per-provider settings: context ceiling and credential material.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_ceiling: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthTokens>,
}

/// Global application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub approval_mode: ApprovalMode,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub providers: HashMap<String, ProviderSettings>,
}

/// In-memory store for settings with disk persistence.
#[derive(Debug)]
pub struct SettingsStore {
    settings: RwLock<Settings>,
    storage_path: PathBuf,
}

impl SettingsStore {
    /// Create a new settings store, loading from disk if available.
    ///
    /// If no settings file exists, environment variables seed the defaults:
    /// - `ANTHROPIC_API_KEY` - static key for the `anthropic` provider
    /// - `PAIRTERM_APPROVAL_MODE` - `paranoid` / `balanced` / `trusting`
    pub async fn new(working_dir: &PathBuf) -> Self {
        let storage_path = working_dir.join(".pairterm/settings.json");

        let settings = if storage_path.exists() {
            match Self::load_from_path(&storage_path) {
                Ok(s) => {
                    tracing::info!("Loaded settings from {}", storage_path.display());
                    s
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to load settings from {}: {}, using defaults",
                        storage_path.display(),
                        e
                    );
                    Self::defaults_from_env()
                }
            }
        } else {
            tracing::info!(
                "No settings file found at {}, using environment defaults",
                storage_path.display()
            );
            Self::defaults_from_env()
        };

        Self {
            settings: RwLock::new(settings),
            storage_path,
        }
    }

    fn defaults_from_env() -> Settings {
        let mut settings = Settings::default();
        if let Ok(mode) = std::env::var("PAIRTERM_APPROVAL_MODE") {
            if let Some(parsed) = ApprovalMode::parse(&mode) {
                settings.approval_mode = parsed;
            }
        }
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            if !key.trim().is_empty() {
                settings.providers.entry("anthropic".to_string()).or_default().api_key =
                    Some(key);
            }
        }
        settings
    }

    fn load_from_path(path: &PathBuf) -> Result<Settings, std::io::Error> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    async fn save_to_disk(&self) -> Result<(), std::io::Error> {
        let settings = self.settings.read().await;

        if let Some(parent) = self.storage_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(&*settings)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        std::fs::write(&self.storage_path, contents)?;
        tracing::debug!("Saved settings to {}", self.storage_path.display());
        Ok(())
    }

    /// Get a clone of the current settings.
    pub async fn get(&self) -> Settings {
        self.settings.read().await.clone()
    }

    pub async fn approval_mode(&self) -> ApprovalMode {
        self.settings.read().await.approval_mode
    }

    pub async fn set_approval_mode(&self, mode: ApprovalMode) -> Result<(), std::io::Error> {
        {
            let mut settings = self.settings.write().await;
            settings.approval_mode = mode;
        }
        self.save_to_disk().await
    }

    /// Effective message ceiling for a provider.
    pub async fn message_ceiling(&self, provider: &str) -> usize {
        self.settings
            .read()
            .await
            .providers
            .get(provider)
            .and_then(|p| p.message_ceiling)
            .unwrap_or(DEFAULT_MESSAGE_CEILING)
            .max(MIN_MESSAGE_CEILING)
    }

    /// Persist a lowered (or raised) ceiling for a provider.
    pub async fn set_message_ceiling(
        &self,
        provider: &str,
        ceiling: usize,
    ) -> Result<(), std::io::Error> {
        {
            let mut settings = self.settings.write().await;
            settings
                .providers
                .entry(provider.to_string())
                .or_default()
                .message_ceiling = Some(ceiling.max(MIN_MESSAGE_CEILING));
        }
        self.save_to_disk().await
    }

    /// Credential record for a provider, if any is stored.
    pub async fn provider_settings(&self, provider: &str) -> Option<ProviderSettings> {
        self.settings.read().await.providers.get(provider).cloned()
    }

    /// Persist a refreshed OAuth token pair for a provider.
    pub async fn store_oauth_tokens(
        &self,
        provider: &str,
        tokens: OAuthTokens,
    ) -> Result<(), std::io::Error> {
        {
            let mut settings = self.settings.write().await;
            settings
                .providers
                .entry(provider.to_string())
                .or_default()
                .oauth = Some(tokens);
        }
        self.save_to_disk().await
    }
}

/// Shared settings store wrapped in Arc for concurrent access.
pub type SharedSettingsStore = Arc<SettingsStore>;
