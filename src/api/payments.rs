//! Payment service routes
//!
//! Initiation and confirmation always answer with a `status` discriminator
//! so a thin client can tell "try again" from "already done" from "needs
//! manual intervention" without reading HTTP codes.

use crate::context::RequestContext;
use crate::error::AppError;
use crate::health::HealthChecker;
use crate::payments::types::{deserialize_amount, PaymentStatus, ProviderName};
use crate::services::payment_orchestrator::{
    ConfirmOutcome, ConfirmStatus, ConfirmTarget, InitiateRequest, OrchestratorError,
    PaymentOrchestrator,
};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct PaymentsState {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub health: HealthChecker,
}

// Every route uses `{id}` in the second segment; matchit rejects differently
// named parameters at the same position.
pub fn router(state: PaymentsState) -> Router {
    Router::new()
        .route("/payments/confirm", get(confirm_by_query))
        .route("/payments/status/{order_id}", get(status_for_order))
        .route(
            "/payments/transaction/{transaction_id}",
            get(payment_for_transaction),
        )
        .route("/payments/{id}/initiate", post(initiate))
        .route("/payments/{id}/confirm", post(confirm))
        .route("/payments/{id}/cancel", post(cancel))
        .route("/payments/{id}", get(get_payment))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateBody {
    pub order_id: i64,
    #[serde(deserialize_with = "deserialize_amount")]
    pub amount: BigDecimal,
    #[serde(default)]
    pub payer_reference: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmBody {
    pub order_id: Option<i64>,
    pub payment_id: Option<Uuid>,
    pub provider_reference: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmQuery {
    pub order_id: Option<i64>,
    pub payment_id: Option<Uuid>,
    pub provider: Option<String>,
}

/// Status discriminator plus whatever is known about the payment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusResponse {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<PaymentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

impl PaymentStatusResponse {
    fn bare(status: &str, message: impl Into<String>) -> Self {
        Self {
            status: status.to_string(),
            message: message.into(),
            payment_id: None,
            order_id: None,
            provider: None,
            payment_status: None,
            transaction_id: None,
        }
    }

    fn for_payment(
        status: &str,
        message: impl Into<String>,
        payment: &crate::database::payment_repository::Payment,
    ) -> Self {
        Self {
            payment_id: Some(payment.id),
            order_id: Some(payment.order_id),
            provider: Some(payment.provider),
            payment_status: Some(payment.status),
            transaction_id: payment.transaction_id.clone(),
            ..Self::bare(status, message)
        }
    }
}

fn confirm_status_label(status: ConfirmStatus) -> &'static str {
    match status {
        ConfirmStatus::Success => "Success",
        ConfirmStatus::AlreadyCompleted => "AlreadyCompleted",
        ConfirmStatus::NotPaid => "NotPaid",
        ConfirmStatus::NotInitiated => "NotInitiated",
        ConfirmStatus::OrderUpdateFailed => "OrderUpdateFailed",
    }
}

fn confirm_http_status(status: ConfirmStatus) -> StatusCode {
    match status {
        ConfirmStatus::Success => StatusCode::OK,
        ConfirmStatus::AlreadyCompleted | ConfirmStatus::NotPaid | ConfirmStatus::NotInitiated => {
            StatusCode::BAD_REQUEST
        }
        ConfirmStatus::OrderUpdateFailed => StatusCode::BAD_GATEWAY,
    }
}

fn confirm_response(outcome: ConfirmOutcome) -> Response {
    let body = PaymentStatusResponse::for_payment(
        confirm_status_label(outcome.status),
        outcome.status.message(),
        &outcome.payment,
    );
    (confirm_http_status(outcome.status), Json(body)).into_response()
}

/// Expected negative outcomes keep the discriminator shape; anything else
/// renders as a standard error
fn discriminated_error(ctx: &RequestContext, err: OrchestratorError) -> Response {
    let (code, status) = match &err {
        OrchestratorError::PaymentNotFound { .. } => (StatusCode::NOT_FOUND, "NotFound"),
        OrchestratorError::GatewayUnavailable { .. } => {
            (StatusCode::BAD_GATEWAY, "GatewayUnavailable")
        }
        OrchestratorError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "InvalidRequest"),
        OrchestratorError::DuplicatePayment { .. } => (StatusCode::CONFLICT, "DuplicatePayment"),
        _ => return app_error(ctx, err).into_response(),
    };
    let message = AppError::from(err).user_message();
    (code, Json(PaymentStatusResponse::bare(status, message))).into_response()
}

fn app_error(ctx: &RequestContext, err: impl Into<AppError>) -> AppError {
    let err = err.into();
    match &ctx.request_id {
        Some(request_id) => err.with_request_id(request_id.clone()),
        None => err,
    }
}

fn parse_provider(ctx: &RequestContext, raw: &str) -> Result<ProviderName, Response> {
    ProviderName::from_str(raw)
        .map_err(|e| discriminated_error(ctx, OrchestratorError::InvalidRequest(e)))
}

fn invalid_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(PaymentStatusResponse::bare("InvalidRequest", message)),
    )
        .into_response()
}

/// POST /payments/{provider}/initiate
pub async fn initiate(
    State(state): State<PaymentsState>,
    ctx: RequestContext,
    Path(provider): Path<String>,
    Json(body): Json<InitiateBody>,
) -> Response {
    let provider = match parse_provider(&ctx, &provider) {
        Ok(provider) => provider,
        Err(response) => return response,
    };

    info!(
        request_id = ctx.request_id_or_default(),
        order_id = body.order_id,
        provider = %provider,
        "payment initiation requested"
    );

    let request = InitiateRequest {
        order_id: body.order_id,
        amount: body.amount,
        provider,
        payer_reference: body.payer_reference,
    };
    match state.orchestrator.initiate(&ctx, request).await {
        Ok(initiated) => (StatusCode::OK, Json(initiated)).into_response(),
        Err(e) => discriminated_error(&ctx, e),
    }
}

/// POST /payments/{provider}/confirm
pub async fn confirm(
    State(state): State<PaymentsState>,
    ctx: RequestContext,
    Path(provider): Path<String>,
    body: Bytes,
) -> Response {
    let provider = match parse_provider(&ctx, &provider) {
        Ok(provider) => provider,
        Err(response) => return response,
    };
    // An empty body is allowed; the lookup keys may all be absent
    let body: ConfirmBody = if body.is_empty() {
        ConfirmBody::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(body) => body,
            Err(e) => return invalid_request(&format!("invalid confirm body: {}", e)),
        }
    };

    let target = if let Some(payment_id) = body.payment_id {
        ConfirmTarget::PaymentId(payment_id)
    } else if let Some(reference) = body.provider_reference {
        ConfirmTarget::ProviderReference {
            provider,
            reference,
        }
    } else if let Some(order_id) = body.order_id {
        ConfirmTarget::Order {
            order_id,
            provider: Some(provider),
        }
    } else {
        return invalid_request("one of paymentId, providerReference or orderId is required");
    };

    match state.orchestrator.confirm(&ctx, target).await {
        Ok(outcome) => confirm_response(outcome),
        Err(e) => discriminated_error(&ctx, e),
    }
}

/// GET /payments/confirm?orderId=&provider=
pub async fn confirm_by_query(
    State(state): State<PaymentsState>,
    ctx: RequestContext,
    Query(query): Query<ConfirmQuery>,
) -> Response {
    let provider = match query.provider.as_deref() {
        Some(raw) => match parse_provider(&ctx, raw) {
            Ok(provider) => Some(provider),
            Err(response) => return response,
        },
        None => None,
    };

    let target = match (query.payment_id, query.order_id) {
        (Some(payment_id), _) => ConfirmTarget::PaymentId(payment_id),
        (None, Some(order_id)) => ConfirmTarget::Order { order_id, provider },
        (None, None) => return invalid_request("orderId or paymentId is required"),
    };

    match state.orchestrator.confirm(&ctx, target).await {
        Ok(outcome) => confirm_response(outcome),
        Err(e) => discriminated_error(&ctx, e),
    }
}

/// GET /payments/status/{orderId}
pub async fn status_for_order(
    State(state): State<PaymentsState>,
    ctx: RequestContext,
    Path(order_id): Path<i64>,
) -> Response {
    match state.orchestrator.get_by_order(&ctx, order_id).await {
        Ok(payment) => {
            let message = match &payment.failure_reason {
                Some(reason) if payment.status != PaymentStatus::Completed => {
                    format!("Payment is {}: {}", payment.status, reason)
                }
                _ => format!("Payment is {}", payment.status),
            };
            let body =
                PaymentStatusResponse::for_payment(payment.status.as_label(), message, &payment);
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => discriminated_error(&ctx, e),
    }
}

/// GET /payments/{paymentId}
pub async fn get_payment(
    State(state): State<PaymentsState>,
    ctx: RequestContext,
    Path(payment_id): Path<String>,
) -> Result<Response, AppError> {
    let payment_id = Uuid::parse_str(&payment_id).map_err(|_| {
        app_error(
            &ctx,
            OrchestratorError::PaymentNotFound {
                reference: payment_id.clone(),
            },
        )
    })?;

    let payment = state
        .orchestrator
        .get_by_id(&ctx, payment_id)
        .await
        .map_err(|e| app_error(&ctx, e))?;
    Ok((StatusCode::OK, Json(payment)).into_response())
}

/// GET /payments/transaction/{transactionId}
pub async fn payment_for_transaction(
    State(state): State<PaymentsState>,
    ctx: RequestContext,
    Path(transaction_id): Path<String>,
) -> Result<Response, AppError> {
    let payment = state
        .orchestrator
        .get_by_transaction(&ctx, &transaction_id)
        .await
        .map_err(|e| app_error(&ctx, e))?;
    Ok((StatusCode::OK, Json(payment)).into_response())
}

/// POST /payments/{paymentId}/cancel
pub async fn cancel(
    State(state): State<PaymentsState>,
    ctx: RequestContext,
    Path(payment_id): Path<String>,
) -> Result<Response, AppError> {
    let payment_id = Uuid::parse_str(&payment_id).map_err(|_| {
        app_error(
            &ctx,
            OrchestratorError::PaymentNotFound {
                reference: payment_id.clone(),
            },
        )
    })?;

    let outcome = state
        .orchestrator
        .cancel(&ctx, payment_id)
        .await
        .map_err(|e| app_error(&ctx, e))?;

    let (code, status, message) = if outcome.order_updated {
        (StatusCode::OK, "Cancelled", "Payment cancelled")
    } else {
        (
            StatusCode::BAD_GATEWAY,
            "OrderUpdateFailed",
            ConfirmStatus::OrderUpdateFailed.message(),
        )
    };
    let body = PaymentStatusResponse::for_payment(status, message, &outcome.payment);
    Ok((code, Json(body)).into_response())
}

pub async fn health(State(state): State<PaymentsState>) -> impl IntoResponse {
    super::health_response(&state.health).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirm_statuses_map_to_http_codes() {
        assert_eq!(confirm_http_status(ConfirmStatus::Success), StatusCode::OK);
        assert_eq!(
            confirm_http_status(ConfirmStatus::AlreadyCompleted),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            confirm_http_status(ConfirmStatus::OrderUpdateFailed),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn initiate_body_accepts_numeric_amount() {
        let body: InitiateBody =
            serde_json::from_str(r#"{"orderId": 42, "amount": 19.99}"#).unwrap();
        assert_eq!(body.order_id, 42);
        assert_eq!(
            crate::payments::types::format_amount(&body.amount),
            "19.99"
        );
    }

    #[test]
    fn bare_response_omits_payment_fields() {
        let json =
            serde_json::to_value(PaymentStatusResponse::bare("NotFound", "nothing")).unwrap();
        assert_eq!(json["status"], "NotFound");
        assert!(json.get("paymentId").is_none());
    }
}
