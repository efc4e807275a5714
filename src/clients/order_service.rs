use crate::clients::service_token::{ServiceTokenProvider, TokenError};
use crate::config::OrderServiceConfig;
use crate::context::RequestContext;
use crate::middleware::logging::log_external_call;
use crate::services::order_projector::{OrderStatusProjector, PaymentStatusUpdate, ProjectionError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Error)]
pub enum OrderClientError {
    #[error("order service rejected our credentials")]
    Unauthorized,

    #[error("order service answered HTTP {status}")]
    Rejected { status: u16 },

    #[error("order service did not answer within {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("order service unreachable: {0}")]
    Transport(String),

    #[error("could not obtain service token: {0}")]
    Token(#[from] TokenError),

    #[error("order projection failed: {0}")]
    Projection(String),
}

impl OrderClientError {
    pub fn is_retryable(&self) -> bool {
        match self {
            OrderClientError::Unauthorized => true,
            OrderClientError::Rejected { status } => *status >= 500,
            OrderClientError::Timeout { .. } | OrderClientError::Transport(_) => true,
            OrderClientError::Token(_) => true,
            OrderClientError::Projection(_) => false,
        }
    }
}

impl From<OrderClientError> for crate::error::AppError {
    fn from(err: OrderClientError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError};

        let kind = match err {
            OrderClientError::Timeout { timeout_secs } => {
                AppErrorKind::External(ExternalError::Timeout {
                    service: "order-service".to_string(),
                    timeout_secs,
                })
            }
            other => AppErrorKind::External(ExternalError::OrderService {
                is_retryable: other.is_retryable(),
                message: other.to_string(),
            }),
        };
        AppError::new(kind)
    }
}

/// Boundary through which the payment side writes order state
#[async_trait]
pub trait OrderServiceClient: Send + Sync {
    async fn update_payment_status(
        &self,
        ctx: &RequestContext,
        update: PaymentStatusUpdate,
    ) -> Result<(), OrderClientError>;
}

/// Calls the order service over HTTP with a service bearer token
pub struct HttpOrderServiceClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    tokens: Arc<dyn ServiceTokenProvider>,
}

impl HttpOrderServiceClient {
    pub fn new(
        config: &OrderServiceConfig,
        tokens: Arc<dyn ServiceTokenProvider>,
    ) -> Result<Self, OrderClientError> {
        let timeout = Duration::from_secs(config.request_timeout);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OrderClientError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout,
            tokens,
        })
    }

    fn endpoint(&self, order_id: i64) -> String {
        format!("{}/orders/{}/payment-status", self.base_url, order_id)
    }
}

#[async_trait]
impl OrderServiceClient for HttpOrderServiceClient {
    async fn update_payment_status(
        &self,
        ctx: &RequestContext,
        update: PaymentStatusUpdate,
    ) -> Result<(), OrderClientError> {
        let token = self.tokens.token().await?;

        let mut request = self
            .http
            .patch(self.endpoint(update.order_id))
            .bearer_auth(token)
            .json(&update);
        if let Some(request_id) = &ctx.request_id {
            request = request.header("x-request-id", request_id);
        }

        let started = Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                log_external_call("order-service", "update_payment_status", started, false);
                return Err(if e.is_timeout() {
                    OrderClientError::Timeout {
                        timeout_secs: self.timeout.as_secs(),
                    }
                } else {
                    OrderClientError::Transport(e.to_string())
                });
            }
        };

        let status = response.status();
        log_external_call(
            "order-service",
            "update_payment_status",
            started,
            status.is_success(),
        );

        match status.as_u16() {
            200..=299 => Ok(()),
            401 | 403 => {
                warn!(
                    request_id = ctx.request_id_or_default(),
                    order_id = update.order_id,
                    "order service refused service token, dropping it"
                );
                self.tokens.invalidate().await;
                Err(OrderClientError::Unauthorized)
            }
            code => Err(OrderClientError::Rejected { status: code }),
        }
    }
}

/// Applies updates through an in-process projector
pub struct LocalOrderServiceClient {
    projector: Arc<OrderStatusProjector>,
}

impl LocalOrderServiceClient {
    pub fn new(projector: Arc<OrderStatusProjector>) -> Self {
        Self { projector }
    }
}

#[async_trait]
impl OrderServiceClient for LocalOrderServiceClient {
    async fn update_payment_status(
        &self,
        ctx: &RequestContext,
        update: PaymentStatusUpdate,
    ) -> Result<(), OrderClientError> {
        match self.projector.apply_payment_status(ctx, update).await {
            Ok(_) => Ok(()),
            Err(ProjectionError::OrderNotFound { .. }) => {
                Err(OrderClientError::Rejected { status: 404 })
            }
            Err(ProjectionError::InvalidStatus { .. }) => {
                Err(OrderClientError::Rejected { status: 400 })
            }
            Err(e) => Err(OrderClientError::Projection(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheClient, InMemoryCache};
    use crate::database::memory::InMemoryOrderStore;
    use crate::database::order_repository::{NewOrder, OrderStatus, OrderStore};
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::patch;
    use axum::{Json, Router};
    use bigdecimal::BigDecimal;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    struct CountingTokens {
        issued: AtomicUsize,
        invalidated: AtomicUsize,
    }

    impl CountingTokens {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                issued: AtomicUsize::new(0),
                invalidated: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ServiceTokenProvider for CountingTokens {
        async fn token(&self) -> Result<String, TokenError> {
            let n = self.issued.fetch_add(1, Ordering::SeqCst);
            Ok(format!("svc-token-{}", n))
        }

        async fn invalidate(&self) {
            self.invalidated.fetch_add(1, Ordering::SeqCst);
        }
    }

    type Seen = Arc<Mutex<Vec<(i64, String, serde_json::Value)>>>;

    async fn spawn_order_service(reply: StatusCode, seen: Seen) -> String {
        let app = Router::new().route(
            "/orders/{id}/payment-status",
            patch(
                move |Path(id): Path<i64>, headers: HeaderMap, Json(body): Json<serde_json::Value>| {
                    let seen = seen.clone();
                    async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default()
                            .to_string();
                        seen.lock().unwrap().push((id, auth, body));
                        reply
                    }
                },
            ),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn update(order_id: i64) -> PaymentStatusUpdate {
        PaymentStatusUpdate {
            order_id,
            payment_id: "7f0c5a0e-pay".to_string(),
            transaction_id: Some("BFD90JRLST".to_string()),
            payment_status: "Completed".to_string(),
            notes: None,
        }
    }

    #[tokio::test]
    async fn sends_patch_with_bearer_and_camel_case_body() {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let base_url = spawn_order_service(StatusCode::OK, seen.clone()).await;
        let client = HttpOrderServiceClient::new(
            &OrderServiceConfig {
                base_url,
                request_timeout: 5,
            },
            CountingTokens::new(),
        )
        .unwrap();

        client
            .update_payment_status(&RequestContext::internal(), update(42))
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let (id, auth, body) = &seen[0];
        assert_eq!(*id, 42);
        assert_eq!(auth, "Bearer svc-token-0");
        assert_eq!(body["paymentStatus"], "Completed");
        assert_eq!(body["transactionId"], "BFD90JRLST");
        assert!(body.get("orderId").is_none());
    }

    #[tokio::test]
    async fn unauthorized_invalidates_cached_token() {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let base_url = spawn_order_service(StatusCode::UNAUTHORIZED, seen).await;
        let tokens = CountingTokens::new();
        let client = HttpOrderServiceClient::new(
            &OrderServiceConfig {
                base_url,
                request_timeout: 5,
            },
            tokens.clone(),
        )
        .unwrap();

        let err = client
            .update_payment_status(&RequestContext::internal(), update(1))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderClientError::Unauthorized));
        assert_eq!(tokens.invalidated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn server_error_is_rejected_and_retryable() {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let base_url = spawn_order_service(StatusCode::SERVICE_UNAVAILABLE, seen).await;
        let client = HttpOrderServiceClient::new(
            &OrderServiceConfig {
                base_url,
                request_timeout: 5,
            },
            CountingTokens::new(),
        )
        .unwrap();

        let err = client
            .update_payment_status(&RequestContext::internal(), update(1))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderClientError::Rejected { status: 503 }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn local_client_applies_projection() {
        let store = InMemoryOrderStore::new();
        let order = store
            .insert(NewOrder {
                user_id: Uuid::new_v4(),
                user_email: "buyer@example.com".to_string(),
                user_name: "buyer".to_string(),
                total_amount: BigDecimal::from(10),
                notes: None,
            })
            .await
            .unwrap();
        let cache = CacheClient::new(Arc::new(InMemoryCache::new()), Duration::from_secs(60));
        let projector = Arc::new(OrderStatusProjector::new(Arc::new(store.clone()), cache));
        let client = LocalOrderServiceClient::new(projector);

        client
            .update_payment_status(&RequestContext::internal(), update(order.id))
            .await
            .unwrap();
        let stored = store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);

        let err = client
            .update_payment_status(&RequestContext::internal(), update(999))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderClientError::Rejected { status: 404 }));
    }
}
