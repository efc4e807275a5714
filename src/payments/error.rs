use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid amount {amount}: {reason}")]
    InvalidAmount { amount: String, reason: String },

    #[error("Unsupported provider: {provider}")]
    UnsupportedProvider { provider: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Provider {provider} timed out after {timeout_secs}s")]
    Timeout { provider: String, timeout_secs: u64 },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Authentication with {provider} failed: {message}")]
    AuthenticationError { provider: String, message: String },

    #[error("Malformed response from {provider}: {message}")]
    MalformedResponse { provider: String, message: String },

    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::InvalidAmount { .. } => false,
            PaymentError::UnsupportedProvider { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::Timeout { .. } => true,
            PaymentError::RateLimitError { .. } => true,
            PaymentError::AuthenticationError { .. } => true,
            PaymentError::MalformedResponse { .. } => true,
            PaymentError::ProviderError { retryable, .. } => *retryable,
        }
    }

    /// Input problems the caller must fix, as opposed to gateway trouble
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            PaymentError::ValidationError { .. }
                | PaymentError::InvalidAmount { .. }
                | PaymentError::UnsupportedProvider { .. }
        )
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. }
            | PaymentError::InvalidAmount { .. }
            | PaymentError::UnsupportedProvider { .. } => 400,
            PaymentError::RateLimitError { .. } => 429,
            PaymentError::Timeout { .. } => 504,
            PaymentError::NetworkError { .. }
            | PaymentError::AuthenticationError { .. }
            | PaymentError::MalformedResponse { .. }
            | PaymentError::ProviderError { .. } => 502,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::InvalidAmount { amount, reason } => {
                format!("Invalid amount '{}': {}", amount, reason)
            }
            PaymentError::UnsupportedProvider { provider } => {
                format!("Unsupported payment provider '{}'", provider)
            }
            PaymentError::NetworkError { .. } | PaymentError::Timeout { .. } => {
                "Payment provider is temporarily unavailable".to_string()
            }
            PaymentError::RateLimitError { .. } => {
                "Too many requests to payment provider. Please retry shortly".to_string()
            }
            PaymentError::AuthenticationError { .. } => {
                "Payment provider rejected our credentials".to_string()
            }
            PaymentError::MalformedResponse { .. } | PaymentError::ProviderError { .. } => {
                "Payment provider returned an error".to_string()
            }
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError, ValidationError};

        let kind = match err {
            PaymentError::InvalidAmount { amount, reason } => {
                AppErrorKind::Validation(ValidationError::InvalidAmount { amount, reason })
            }
            PaymentError::UnsupportedProvider { provider } => {
                AppErrorKind::Validation(ValidationError::UnsupportedProvider { provider })
            }
            PaymentError::ValidationError { field, .. } => {
                AppErrorKind::Validation(ValidationError::MissingField {
                    field: field.unwrap_or_else(|| "request".to_string()),
                })
            }
            PaymentError::Timeout {
                provider,
                timeout_secs,
            } => AppErrorKind::External(ExternalError::Timeout {
                service: provider,
                timeout_secs,
            }),
            other => {
                let provider = match &other {
                    PaymentError::AuthenticationError { provider, .. }
                    | PaymentError::MalformedResponse { provider, .. }
                    | PaymentError::ProviderError { provider, .. } => provider.clone(),
                    _ => "payments".to_string(),
                };
                AppErrorKind::External(ExternalError::PaymentGateway {
                    provider,
                    message: other.to_string(),
                    is_retryable: other.is_retryable(),
                })
            }
        };

        AppError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, ErrorCode};

    #[test]
    fn error_http_status_mapping_is_correct() {
        assert_eq!(
            PaymentError::InvalidAmount {
                amount: "0".to_string(),
                reason: "zero".to_string()
            }
            .http_status_code(),
            400
        );
        assert_eq!(
            PaymentError::MalformedResponse {
                provider: "bkash".to_string(),
                message: "missing paymentID".to_string()
            }
            .http_status_code(),
            502
        );
    }

    #[test]
    fn retryable_flags_are_set() {
        assert!(PaymentError::NetworkError {
            message: "connection reset".to_string()
        }
        .is_retryable());
        assert!(!PaymentError::ProviderError {
            provider: "card".to_string(),
            message: "No such checkout session".to_string(),
            provider_code: Some("404".to_string()),
            retryable: false,
        }
        .is_retryable());
    }

    #[test]
    fn gateway_failures_map_to_gateway_unavailable() {
        let app: AppError = PaymentError::AuthenticationError {
            provider: "bkash".to_string(),
            message: "invalid app key".to_string(),
        }
        .into();
        assert_eq!(app.error_code(), ErrorCode::GatewayUnavailable);
        assert_eq!(app.status_code(), 502);

        let app: AppError = PaymentError::InvalidAmount {
            amount: "1.999".to_string(),
            reason: "too many decimals".to_string(),
        }
        .into();
        assert_eq!(app.error_code(), ErrorCode::InvalidAmount);
    }
}
