use crate::payments::error::{PaymentError, PaymentResult};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

/// Thin HTTP wrapper shared by gateway adapters.
///
/// One attempt per call. Failures are classified into [`PaymentError`] so the
/// orchestrator can decide whether the outcome is retryable.
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    provider: &'static str,
    timeout: Duration,
}

impl PaymentHttpClient {
    pub fn new(provider: &'static str, timeout: Duration) -> PaymentResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self {
            client,
            provider,
            timeout,
        })
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        bearer_token: Option<&str>,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<T> {
        let mut request = self.client.request(method, url);

        if let Some(token) = bearer_token {
            request = request.bearer_auth(token);
        }
        for (k, v) in additional_headers {
            request = request.header(*k, *v);
        }
        if let Some(payload) = body {
            request = request.json(payload);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        self.decode(response).await
    }

    /// `application/x-www-form-urlencoded` POST, used by card checkout APIs
    pub async fn post_form<T: DeserializeOwned>(
        &self,
        url: &str,
        bearer_token: Option<&str>,
        form: &[(String, String)],
    ) -> PaymentResult<T> {
        let mut request = self.client.post(url).form(form);
        if let Some(token) = bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        self.decode(response).await
    }

    fn transport_error(&self, err: reqwest::Error) -> PaymentError {
        if err.is_timeout() {
            PaymentError::Timeout {
                provider: self.provider.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            PaymentError::NetworkError {
                message: format!("{} request failed: {}", self.provider, err),
            }
        }
    }

    async fn decode<T: DeserializeOwned>(&self, response: Response) -> PaymentResult<T> {
        let status = response.status();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;

        if status.is_success() {
            return serde_json::from_str::<T>(&text).map_err(|e| {
                PaymentError::MalformedResponse {
                    provider: self.provider.to_string(),
                    message: format!("invalid provider JSON response: {}", e),
                }
            });
        }

        warn!(
            provider = self.provider,
            status = %status,
            "provider returned non-success status"
        );
        Err(classify_status(self.provider, status, &text))
    }
}

/// Map a non-2xx gateway response onto a [`PaymentError`]
pub fn classify_status(provider: &str, status: StatusCode, body: &str) -> PaymentError {
    match status.as_u16() {
        429 => PaymentError::RateLimitError {
            message: format!("{} rate limit exceeded", provider),
            retry_after_seconds: None,
        },
        401 | 403 => PaymentError::AuthenticationError {
            provider: provider.to_string(),
            message: format!("HTTP {}", status),
        },
        _ => PaymentError::ProviderError {
            provider: provider.to_string(),
            message: format!("HTTP {}: {}", status, truncate(body, 256)),
            provider_code: Some(status.as_u16().to_string()),
            retryable: status.is_server_error(),
        },
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable_client_errors_are_not() {
        let err = classify_status("bkash", StatusCode::BAD_GATEWAY, "upstream down");
        assert!(err.is_retryable());

        let err = classify_status("card", StatusCode::NOT_FOUND, "no such session");
        assert!(!err.is_retryable());
        match err {
            PaymentError::ProviderError { provider_code, .. } => {
                assert_eq!(provider_code.as_deref(), Some("404"))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn auth_and_rate_limit_statuses_are_distinguished() {
        assert!(matches!(
            classify_status("card", StatusCode::UNAUTHORIZED, ""),
            PaymentError::AuthenticationError { .. }
        ));
        assert!(matches!(
            classify_status("card", StatusCode::TOO_MANY_REQUESTS, ""),
            PaymentError::RateLimitError { .. }
        ));
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(1000);
        match classify_status("card", StatusCode::BAD_REQUEST, &body) {
            PaymentError::ProviderError { message, .. } => assert!(message.len() < 300),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
