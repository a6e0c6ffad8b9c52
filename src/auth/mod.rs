//! Provider credential lifecycle.
//!
//! A session authenticates with either a static API key or an OAuth token
//! pair. This module owns the cached access token: `resolve()` returns a
//! currently-valid credential for the next provider call, refreshing an
//! OAuth token before it expires. The refreshed value is persisted through
//! the settings store and is the only value ever transmitted afterwards.

pub mod login;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::AgentError;
use crate::settings::{OAuthTokens, SharedSettingsStore};

/// Refresh this long before the recorded expiry instant.
const REFRESH_SAFETY_MARGIN_SECS: i64 = 5 * 60;

/// A usable bearer credential for one outbound provider call.
#[derive(Debug, Clone)]
pub enum Credential {
    ApiKey(String),
    OAuth {
        access_token: String,
        refresh_token: String,
        expires_at: DateTime<Utc>,
    },
}

/// Result of a refresh-token exchange.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    /// Some providers rotate the refresh token on every exchange.
    pub refresh_token: Option<String>,
    pub expires_in_secs: u64,
}

/// The refresh-token exchange, behind a trait so the provider can be
/// exercised without a network.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> anyhow::Result<TokenGrant>;
}

/// Refresher that talks to a real OAuth token endpoint.
pub struct HttpTokenRefresher {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
}

impl HttpTokenRefresher {
    pub fn new(token_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token_url: token_url.into(),
            client_id: client_id.into(),
        }
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> anyhow::Result<TokenGrant> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
        ];

        let resp = self
            .client
            .post(&self.token_url)
            .form(&params)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("refresh request failed: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("token refresh rejected (HTTP {status}): {body}");
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("failed to parse refresh response: {e}"))?;

        let access_token = data["access_token"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("no access_token in refresh response"))?
            .to_string();

        Ok(TokenGrant {
            access_token,
            refresh_token: data["refresh_token"].as_str().map(str::to_string),
            expires_in_secs: data["expires_in"].as_u64().unwrap_or(3600),
        })
    }
}

/// Sole owner of the cached credential for one provider.
pub struct CredentialProvider {
    provider: String,
    credential: RwLock<Credential>,
    refresher: Option<Box<dyn TokenRefresher>>,
    settings: Option<SharedSettingsStore>,
    safety_margin: chrono::Duration,
}

impl CredentialProvider {
    /// Static-key provider: `resolve()` is a pure return.
    pub fn api_key(provider: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            credential: RwLock::new(Credential::ApiKey(key.into())),
            refresher: None,
            settings: None,
            safety_margin: chrono::Duration::seconds(REFRESH_SAFETY_MARGIN_SECS),
        }
    }

    /// OAuth provider with a refresher and settings persistence.
    pub fn oauth(
        provider: impl Into<String>,
        tokens: OAuthTokens,
        refresher: Box<dyn TokenRefresher>,
        settings: Option<SharedSettingsStore>,
    ) -> Self {
        Self {
            provider: provider.into(),
            credential: RwLock::new(Credential::OAuth {
                access_token: tokens.access_token,
                refresh_token: tokens.refresh_token,
                expires_at: tokens.expires_at,
            }),
            refresher: Some(refresher),
            settings,
            safety_margin: chrono::Duration::seconds(REFRESH_SAFETY_MARGIN_SECS),
        }
    }

    #[cfg(test)]
    fn with_safety_margin(mut self, margin: chrono::Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    fn is_fresh(&self, expires_at: &DateTime<Utc>) -> bool {
        *expires_at - Utc::now() > self.safety_margin
    }

    /// Produce a valid credential for the next provider call.
    ///
    /// For OAuth, a token inside the safety margin is refreshed first; a
    /// failed refresh propagates as a credential error and never falls back
    /// to the stale token.
    pub async fn resolve(&self) -> Result<Credential, AgentError> {
        {
            let guard = self.credential.read().await;
            match &*guard {
                Credential::ApiKey(_) => return Ok(guard.clone()),
                Credential::OAuth { expires_at, .. } if self.is_fresh(expires_at) => {
                    return Ok(guard.clone());
                }
                Credential::OAuth { .. } => {}
            }
        }

        // Token is expired or inside the margin. Take the write lock and
        // re-check so concurrent callers trigger at most one refresh.
        let mut guard = self.credential.write().await;
        match &mut *guard {
            Credential::ApiKey(key) => Ok(Credential::ApiKey(key.clone())),
            Credential::OAuth {
                access_token,
                refresh_token,
                expires_at,
            } => {
                if self.is_fresh(expires_at) {
                    return Ok(Credential::OAuth {
                        access_token: access_token.clone(),
                        refresh_token: refresh_token.clone(),
                        expires_at: *expires_at,
                    });
                }

                let refresher = self.refresher.as_ref().ok_or_else(|| {
                    AgentError::credential(
                        &self.provider,
                        "access token expired and no refresher is configured",
                    )
                })?;

                let grant = refresher
                    .refresh(refresh_token)
                    .await
                    .map_err(|e| AgentError::credential(&self.provider, e.to_string()))?;

                // Mutate in place: the stale value is never handed out again.
                *access_token = grant.access_token;
                if let Some(rotated) = grant.refresh_token {
                    *refresh_token = rotated;
                }
                *expires_at = Utc::now() + chrono::Duration::seconds(grant.expires_in_secs as i64);

                tracing::info!(provider = %self.provider, expires_at = %expires_at, "OAuth token refreshed");

                let tokens = OAuthTokens {
                    access_token: access_token.clone(),
                    refresh_token: refresh_token.clone(),
                    expires_at: *expires_at,
                };
                if let Some(settings) = &self.settings {
                    if let Err(e) = settings
                        .store_oauth_tokens(&self.provider, tokens.clone())
                        .await
                    {
                        tracing::warn!(provider = %self.provider, "failed to persist refreshed tokens: {e}");
                    }
                }

                Ok(Credential::OAuth {
                    access_token: tokens.access_token,
                    refresh_token: tokens.refresh_token,
                    expires_at: tokens.expires_at,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct CountingRefresher {
        calls: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, refresh_token: &str) -> anyhow::Result<TokenGrant> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("refresh rejected by server");
            }
            assert_eq!(refresh_token, "rt-old");
            Ok(TokenGrant {
                access_token: "at-new".into(),
                refresh_token: Some("rt-new".into()),
                expires_in_secs: 3600,
            })
        }
    }

    fn oauth_provider(expires_in_secs: i64, fail: bool) -> (CredentialProvider, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let provider = CredentialProvider::oauth(
            "anthropic",
            OAuthTokens {
                access_token: "at-old".into(),
                refresh_token: "rt-old".into(),
                expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
            },
            Box::new(CountingRefresher {
                calls: calls.clone(),
                fail,
            }),
            None,
        );
        (provider, calls)
    }

    #[tokio::test]
    async fn test_api_key_resolve_is_pure() {
        let provider = CredentialProvider::api_key("anthropic", "sk-123");
        match provider.resolve().await.unwrap() {
            Credential::ApiKey(k) => assert_eq!(k, "sk-123"),
            other => panic!("expected api key, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fresh_token_skips_refresh() {
        // Expires in one hour, well outside the five minute margin.
        let (provider, calls) = oauth_provider(3600, false);
        match provider.resolve().await.unwrap() {
            Credential::OAuth { access_token, .. } => assert_eq!(access_token, "at-old"),
            other => panic!("expected oauth, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_token_inside_margin_refreshes_exactly_once() {
        // Expires in one minute, inside the margin.
        let (provider, calls) = oauth_provider(60, false);
        match provider.resolve().await.unwrap() {
            Credential::OAuth {
                access_token,
                refresh_token,
                ..
            } => {
                assert_eq!(access_token, "at-new");
                assert_eq!(refresh_token, "rt-new");
            }
            other => panic!("expected oauth, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // The refreshed token is now fresh: no second refresh.
        provider.resolve().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_token_refreshes() {
        let (provider, calls) = oauth_provider(-100, false);
        provider.resolve().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_is_fatal_not_stale_fallback() {
        let (provider, _calls) = oauth_provider(60, true);
        let err = provider.resolve().await.unwrap_err();
        assert!(matches!(err, AgentError::Credential { .. }));
    }

    #[tokio::test]
    async fn test_zero_margin_treats_distant_expiry_as_fresh() {
        let calls = Arc::new(AtomicU32::new(0));
        let provider = CredentialProvider::oauth(
            "anthropic",
            OAuthTokens {
                access_token: "at-old".into(),
                refresh_token: "rt-old".into(),
                expires_at: Utc::now() + chrono::Duration::seconds(30),
            },
            Box::new(CountingRefresher {
                calls: calls.clone(),
                fail: false,
            }),
            None,
        )
        .with_safety_margin(chrono::Duration::zero());

        provider.resolve().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
