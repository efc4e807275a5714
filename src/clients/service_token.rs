//! Service-to-service bearer tokens (OAuth2 client credentials)

use crate::cache::keys::auth::ServiceTokenKey;
use crate::cache::CacheClient;
use crate::config::IdentityConfig;
use crate::logging::mask_token;
use crate::middleware::logging::log_external_call;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Seconds shaved off `expires_in` so a cached token is never used at the edge
const EXPIRY_MARGIN_SECS: u64 = 60;
const DEFAULT_EXPIRES_IN_SECS: u64 = 300;

#[derive(Debug, Clone, Error)]
pub enum TokenError {
    #[error("identity provider is not configured")]
    NotConfigured,

    #[error("token request failed: {0}")]
    Request(String),

    #[error("token request timed out")]
    Timeout,

    #[error("identity provider rejected the client credentials (HTTP {status})")]
    Rejected { status: u16 },

    #[error("malformed token response: {0}")]
    Malformed(String),
}

impl From<TokenError> for crate::error::AppError {
    fn from(err: TokenError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError};
        AppError::new(AppErrorKind::External(ExternalError::IdentityProvider {
            message: err.to_string(),
        }))
    }
}

#[async_trait]
pub trait ServiceTokenProvider: Send + Sync {
    /// A bearer token valid for at least the next minute
    async fn token(&self) -> Result<String, TokenError>;

    /// Drop the cached token, e.g. after the receiver answered 401
    async fn invalidate(&self);
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

/// Cache lifetime for a token that expires in `expires_in` seconds
pub fn cache_ttl(expires_in: Option<u64>) -> Option<Duration> {
    let secs = expires_in
        .unwrap_or(DEFAULT_EXPIRES_IN_SECS)
        .saturating_sub(EXPIRY_MARGIN_SECS);
    (secs > 0).then(|| Duration::from_secs(secs))
}

pub struct ClientCredentialsTokenProvider {
    http: reqwest::Client,
    config: IdentityConfig,
    cache: CacheClient,
}

impl ClientCredentialsTokenProvider {
    pub fn new(config: IdentityConfig, cache: CacheClient) -> Result<Self, TokenError> {
        if !config.is_configured() {
            return Err(TokenError::NotConfigured);
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .build()
            .map_err(|e| TokenError::Request(e.to_string()))?;

        Ok(Self {
            http,
            config,
            cache,
        })
    }

    fn cache_key(&self) -> String {
        ServiceTokenKey::new(&self.config.client_id).to_string()
    }

    async fn request_token(&self) -> Result<(String, Option<u64>), TokenError> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        let started = Instant::now();
        let result = self
            .http
            .post(self.config.token_endpoint())
            .form(&form)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                log_external_call("identity", "client_credentials", started, false);
                return Err(if e.is_timeout() {
                    TokenError::Timeout
                } else {
                    TokenError::Request(e.to_string())
                });
            }
        };

        let status = response.status();
        log_external_call("identity", "client_credentials", started, status.is_success());
        if !status.is_success() {
            return Err(TokenError::Rejected {
                status: status.as_u16(),
            });
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| TokenError::Malformed(e.to_string()))?;
        let token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| TokenError::Malformed("missing access_token".to_string()))?;

        Ok((token, body.expires_in))
    }
}

#[async_trait]
impl ServiceTokenProvider for ClientCredentialsTokenProvider {
    async fn token(&self) -> Result<String, TokenError> {
        let key = self.cache_key();
        if let Some(token) = self.cache.get::<String>(&key).await {
            return Ok(token);
        }

        let (token, expires_in) = self.request_token().await?;
        debug!(token = %mask_token(&token), expires_in = ?expires_in, "service token issued");

        if let Some(ttl) = cache_ttl(expires_in) {
            self.cache.set(&key, &token, Some(ttl)).await;
        }
        Ok(token)
    }

    async fn invalidate(&self) {
        self.cache.remove(&self.cache_key()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use axum::{routing::post, Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn ttl_leaves_a_minute_of_margin() {
        assert_eq!(cache_ttl(Some(300)), Some(Duration::from_secs(240)));
        assert_eq!(cache_ttl(None), Some(Duration::from_secs(240)));
        assert_eq!(cache_ttl(Some(45)), None);
    }

    #[test]
    fn unconfigured_identity_is_rejected() {
        let cache = CacheClient::new(Arc::new(InMemoryCache::new()), Duration::from_secs(60));
        let config = IdentityConfig {
            authority: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            request_timeout: 5,
        };
        assert!(matches!(
            ClientCredentialsTokenProvider::new(config, cache),
            Err(TokenError::NotConfigured)
        ));
    }

    async fn spawn_identity(calls: Arc<AtomicUsize>) -> String {
        let app = Router::new().route(
            "/realms/shop/protocol/openid-connect/token",
            post(move || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Json(serde_json::json!({
                        "access_token": format!("token-{}", n),
                        "expires_in": 300,
                        "token_type": "Bearer",
                    }))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/realms/shop", addr)
    }

    #[tokio::test]
    async fn token_is_cached_until_invalidated() {
        let calls = Arc::new(AtomicUsize::new(0));
        let authority = spawn_identity(calls.clone()).await;
        let cache = CacheClient::new(Arc::new(InMemoryCache::new()), Duration::from_secs(60));
        let provider = ClientCredentialsTokenProvider::new(
            IdentityConfig {
                authority,
                client_id: "payment-service".to_string(),
                client_secret: "s3cret".to_string(),
                request_timeout: 5,
            },
            cache,
        )
        .unwrap();

        assert_eq!(provider.token().await.unwrap(), "token-1");
        assert_eq!(provider.token().await.unwrap(), "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        provider.invalidate().await;
        assert_eq!(provider.token().await.unwrap(), "token-2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
