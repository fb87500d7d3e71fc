//! Token acquisition for the remote FHIR service.
//!
//! Three strategies: no auth (local/test servers), a static bearer token,
//! and OAuth2 client credentials with an in-process cache. Tokens are
//! cached slightly short of their reported lifetime so a token is never
//! presented in its final seconds.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use msc_fhir_gateway::error::{GatewayError, GatewayResult};

/// Margin subtracted from a token's lifetime before it is considered stale.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Supplies the bearer token for outbound requests.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns the current token, or `None` when requests go unauthenticated.
    async fn access_token(&self) -> GatewayResult<Option<String>>;
}

/// No authentication.
#[derive(Debug, Default)]
pub struct NoAuth;

#[async_trait]
impl TokenProvider for NoAuth {
    async fn access_token(&self) -> GatewayResult<Option<String>> {
        Ok(None)
    }
}

/// A fixed token supplied through configuration.
#[derive(Debug)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> GatewayResult<Option<String>> {
        Ok(Some(self.token.clone()))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expiry")]
    expires_in: u64,
}

fn default_expiry() -> u64 {
    3600
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// OAuth2 client-credentials flow with token caching.
pub struct ClientCredentialsProvider {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    cache: RwLock<Option<CachedToken>>,
}

impl ClientCredentialsProvider {
    pub fn new(
        http: reqwest::Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: scope.into(),
            cache: RwLock::new(None),
        }
    }

    async fn fetch_token(&self) -> GatewayResult<CachedToken> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", self.scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| GatewayError::Authentication {
                message: format!("token request failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Authentication {
                message: format!("token endpoint returned HTTP {}", status.as_u16()),
            });
        }

        let token: TokenResponse =
            response
                .json()
                .await
                .map_err(|e| GatewayError::Authentication {
                    message: format!("malformed token response: {}", e),
                })?;

        let lifetime = Duration::from_secs(token.expires_in)
            .saturating_sub(EXPIRY_MARGIN)
            .max(Duration::from_secs(1));
        debug!(expires_in = token.expires_in, "acquired access token");

        Ok(CachedToken {
            token: token.access_token,
            expires_at: Instant::now() + lifetime,
        })
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialsProvider {
    async fn access_token(&self) -> GatewayResult<Option<String>> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if Instant::now() < cached.expires_at {
                    return Ok(Some(cached.token.clone()));
                }
            }
        }

        let mut cache = self.cache.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some(cached) = cache.as_ref() {
            if Instant::now() < cached.expires_at {
                return Ok(Some(cached.token.clone()));
            }
        }

        let fresh = self.fetch_token().await?;
        let token = fresh.token.clone();
        *cache = Some(fresh);
        Ok(Some(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_auth_yields_nothing() {
        assert_eq!(NoAuth.access_token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_static_token() {
        let provider = StaticTokenProvider::new("abc123");
        assert_eq!(
            provider.access_token().await.unwrap().as_deref(),
            Some("abc123")
        );
    }

    #[test]
    fn test_token_response_default_expiry() {
        let parsed: TokenResponse =
            serde_json::from_str(r#"{"access_token": "t"}"#).unwrap();
        assert_eq!(parsed.expires_in, 3600);
    }
}
