//! HTTP surface of the payment and order services

pub mod orders;
pub mod payments;

use crate::health::{HealthChecker, HealthStatus};
use crate::middleware::auth::identity_gate;
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use axum::{http::StatusCode, response::IntoResponse, Json, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

/// Request-id assignment, request logging, and id propagation on responses
pub fn with_request_layers(router: Router) -> Router {
    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(axum::middleware::from_fn(request_logging_middleware))
            .layer(PropagateRequestIdLayer::x_request_id()),
    )
}

/// Honor forwarded identity headers only when the ingress vouches for them.
/// With no secret configured they are trusted as sent.
pub fn with_identity_gate(router: Router, ingress_secret: Option<&str>) -> Router {
    match ingress_secret {
        Some(secret) => router.layer(axum::middleware::from_fn_with_state(
            Arc::<str>::from(secret),
            identity_gate,
        )),
        None => router,
    }
}

pub(crate) async fn health_response(checker: &HealthChecker) -> impl IntoResponse {
    let status: HealthStatus = checker.check_health().await;
    let code = if matches!(status.status, crate::health::HealthState::Unhealthy) {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(status))
}
