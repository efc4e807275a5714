//! Unified error handling for the payment and order services
//!
//! Every module-level error converts into [`AppError`], which knows its HTTP
//! status, its machine-readable [`ErrorCode`], a user-facing message, and
//! whether the client may retry.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling by clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "PAYMENT_NOT_FOUND")]
    PaymentNotFound,
    #[serde(rename = "ORDER_NOT_FOUND")]
    OrderNotFound,
    #[serde(rename = "DUPLICATE_PAYMENT")]
    DuplicatePayment,
    #[serde(rename = "INVALID_STATE_TRANSITION")]
    InvalidStateTransition,
    #[serde(rename = "INVALID_AMOUNT")]
    InvalidAmount,
    #[serde(rename = "UNSUPPORTED_PROVIDER")]
    UnsupportedProvider,
    #[serde(rename = "INVALID_PAYMENT_STATUS")]
    InvalidPaymentStatus,
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "FORBIDDEN")]
    Forbidden,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CACHE_ERROR")]
    CacheError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 504)
    #[serde(rename = "GATEWAY_UNAVAILABLE")]
    GatewayUnavailable,
    #[serde(rename = "ORDER_SERVICE_ERROR")]
    OrderServiceError,
    #[serde(rename = "IDENTITY_PROVIDER_ERROR")]
    IdentityProviderError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business rule violations
#[derive(Debug, Clone)]
pub enum DomainError {
    /// No payment matches the given id, order, or provider reference
    PaymentNotFound { reference: String },
    /// No order with the given id
    OrderNotFound { order_id: String },
    /// An active payment for the same order and provider already exists
    /// and cannot be reused for this request
    DuplicatePayment { order_id: String, provider: String },
    /// The payment is not in a state that allows the requested change
    InvalidStateTransition {
        payment_id: String,
        from: String,
        to: String,
    },
}

/// Infrastructure-level errors (database, cache, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Cache { message: String },
    Configuration { message: String },
}

/// Failures talking to collaborators outside this process
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Payment gateway unreachable, non-2xx, or malformed response
    PaymentGateway {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    /// Order service rejected or failed a payment-status update
    OrderService { message: String, is_retryable: bool },
    /// Identity provider refused the client-credentials grant
    IdentityProvider { message: String },
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidAmount { amount: String, reason: String },
    UnsupportedProvider { provider: String },
    InvalidPaymentStatus { status: String },
    MissingField { field: String },
    InvalidRequest { message: String },
    MissingCredentials,
    Forbidden,
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => 404,
                DomainError::OrderNotFound { .. } => 404,
                DomainError::DuplicatePayment { .. } => 409,
                DomainError::InvalidStateTransition { .. } => 409,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { .. } => 502,
                ExternalError::OrderService { .. } => 502,
                ExternalError::IdentityProvider { .. } => 502,
                ExternalError::Timeout { .. } => 504,
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::MissingCredentials => 401,
                ValidationError::Forbidden => 403,
                _ => 400,
            },
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => ErrorCode::PaymentNotFound,
                DomainError::OrderNotFound { .. } => ErrorCode::OrderNotFound,
                DomainError::DuplicatePayment { .. } => ErrorCode::DuplicatePayment,
                DomainError::InvalidStateTransition { .. } => ErrorCode::InvalidStateTransition,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Cache { .. } => ErrorCode::CacheError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { .. } => ErrorCode::GatewayUnavailable,
                ExternalError::OrderService { .. } => ErrorCode::OrderServiceError,
                ExternalError::IdentityProvider { .. } => ErrorCode::IdentityProviderError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidAmount { .. } => ErrorCode::InvalidAmount,
                ValidationError::UnsupportedProvider { .. } => ErrorCode::UnsupportedProvider,
                ValidationError::InvalidPaymentStatus { .. } => ErrorCode::InvalidPaymentStatus,
                ValidationError::MissingCredentials => ErrorCode::Unauthorized,
                ValidationError::MissingField { .. } => ErrorCode::ValidationError,
                ValidationError::InvalidRequest { .. } => ErrorCode::ValidationError,
                ValidationError::Forbidden => ErrorCode::Forbidden,
            },
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { reference } => {
                    format!("No payment found for '{}'", reference)
                }
                DomainError::OrderNotFound { order_id } => {
                    format!("Order '{}' not found", order_id)
                }
                DomainError::DuplicatePayment { order_id, provider } => format!(
                    "Order '{}' already has an active {} payment with different details",
                    order_id, provider
                ),
                DomainError::InvalidStateTransition {
                    payment_id,
                    from,
                    to,
                } => format!(
                    "Payment '{}' cannot move from {} to {}",
                    payment_id, from, to
                ),
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment gateway ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        format!("Payment gateway ({}) rejected the request", provider)
                    }
                }
                ExternalError::OrderService { .. } => {
                    "Order service could not record the payment status".to_string()
                }
                ExternalError::IdentityProvider { .. } => {
                    "Could not obtain a service credential".to_string()
                }
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => format!(
                    "{} request timed out after {} seconds. Please try again",
                    service, timeout_secs
                ),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::UnsupportedProvider { provider } => {
                    format!("Unsupported payment provider '{}'", provider)
                }
                ValidationError::InvalidPaymentStatus { status } => {
                    format!("Unknown payment status '{}'", status)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidRequest { message } => message.clone(),
                ValidationError::Forbidden => {
                    "You are not allowed to access this resource".to_string()
                }
                ValidationError::MissingCredentials => {
                    "A bearer credential is required".to_string()
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Cache { .. } => true,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { is_retryable, .. } => *is_retryable,
                ExternalError::OrderService { is_retryable, .. } => *is_retryable,
                ExternalError::IdentityProvider { .. } => true,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// From impls for module errors live next to those errors:
// database/error.rs, payments/error.rs, clients, and services.

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_not_found_error() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::PaymentNotFound {
            reference: "order 42".to_string(),
        }));

        assert_eq!(error.status_code(), 404);
        assert_eq!(error.error_code(), ErrorCode::PaymentNotFound);
        assert!(error.user_message().contains("order 42"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_duplicate_payment_is_conflict() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::DuplicatePayment {
            order_id: "42".to_string(),
            provider: "card".to_string(),
        }));

        assert_eq!(error.status_code(), 409);
        assert_eq!(error.error_code(), ErrorCode::DuplicatePayment);
    }

    #[test]
    fn test_gateway_error_is_bad_gateway() {
        let error = AppError::new(AppErrorKind::External(ExternalError::PaymentGateway {
            provider: "bkash".to_string(),
            message: "connection reset".to_string(),
            is_retryable: true,
        }));

        assert_eq!(error.status_code(), 502);
        assert_eq!(error.error_code(), ErrorCode::GatewayUnavailable);
        assert!(error.is_retryable());
        assert!(error.user_message().contains("bkash"));
    }

    #[test]
    fn test_missing_credentials_is_unauthorized() {
        let error = AppError::new(AppErrorKind::Validation(ValidationError::MissingCredentials));

        assert_eq!(error.status_code(), 401);
        assert_eq!(error.error_code(), ErrorCode::Unauthorized);
    }

    #[test]
    fn test_validation_error() {
        let error = AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
            amount: "-100".to_string(),
            reason: "Amount must be greater than zero".to_string(),
        }));

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::InvalidAmount);
        assert!(!error.is_retryable());
    }
}
