//! Order service routes

use crate::context::RequestContext;
use crate::database::order_repository::{Order, OrderStatus};
use crate::error::{AppError, AppErrorKind, ValidationError};
use crate::health::HealthChecker;
use crate::middleware::auth::require_bearer;
use crate::payments::types::deserialize_amount;
use crate::services::order_projector::{
    CreateOrder, OrderStatusProjector, PaymentStatusUpdate,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
    Json, Router,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct OrdersState {
    pub projector: Arc<OrderStatusProjector>,
    pub health: HealthChecker,
}

pub fn router(state: OrdersState) -> Router {
    Router::new()
        .route("/orders", get(list_orders).post(create_order))
        .route("/orders/user/{user_id}", get(orders_for_user))
        .route("/orders/{id}", get(get_order).delete(delete_order))
        .route("/orders/{id}/status", patch(update_status))
        .route(
            "/orders/{id}/payment-status",
            patch(update_payment_status).route_layer(axum::middleware::from_fn(require_bearer)),
        )
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderBody {
    #[serde(deserialize_with = "deserialize_amount")]
    pub total_amount: BigDecimal,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrdersQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: String,
    #[serde(default)]
    pub notes: Option<String>,
}

fn app_error(ctx: &RequestContext, err: impl Into<AppError>) -> AppError {
    let err = err.into();
    match &ctx.request_id {
        Some(request_id) => err.with_request_id(request_id.clone()),
        None => err,
    }
}

fn parse_status(ctx: &RequestContext, raw: &str) -> Result<OrderStatus, AppError> {
    OrderStatus::parse(raw).ok_or_else(|| {
        app_error(
            ctx,
            AppError::new(AppErrorKind::Validation(ValidationError::InvalidRequest {
                message: format!("unknown order status '{}'", raw),
            })),
        )
    })
}

/// PATCH /orders/{orderId}/payment-status
pub async fn update_payment_status(
    State(state): State<OrdersState>,
    ctx: RequestContext,
    Path(order_id): Path<i64>,
    Json(mut update): Json<PaymentStatusUpdate>,
) -> Result<Json<Order>, AppError> {
    update.order_id = order_id;
    state
        .projector
        .apply_payment_status(&ctx, update)
        .await
        .map(Json)
        .map_err(|e| app_error(&ctx, e))
}

/// POST /orders
pub async fn create_order(
    State(state): State<OrdersState>,
    ctx: RequestContext,
    Json(body): Json<CreateOrderBody>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let input = CreateOrder {
        total_amount: body.total_amount,
        notes: body.notes,
        user_email: body.user_email.unwrap_or_default(),
        user_name: body.user_name.unwrap_or_default(),
    };
    let order = state
        .projector
        .create_order(&ctx, input)
        .await
        .map_err(|e| app_error(&ctx, e))?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders and GET /orders?status=
pub async fn list_orders(
    State(state): State<OrdersState>,
    ctx: RequestContext,
    Query(query): Query<OrdersQuery>,
) -> Result<Json<Vec<Order>>, AppError> {
    let orders = match query.status.as_deref() {
        Some(raw) => {
            let status = parse_status(&ctx, raw)?;
            state.projector.orders_by_status(&ctx, status).await
        }
        None => state.projector.all_orders(&ctx).await,
    };
    orders.map(Json).map_err(|e| app_error(&ctx, e))
}

/// GET /orders/{orderId}
pub async fn get_order(
    State(state): State<OrdersState>,
    ctx: RequestContext,
    Path(order_id): Path<i64>,
) -> Result<Json<Order>, AppError> {
    state
        .projector
        .get_order(&ctx, order_id)
        .await
        .map(Json)
        .map_err(|e| app_error(&ctx, e))
}

/// GET /orders/user/{userId}
pub async fn orders_for_user(
    State(state): State<OrdersState>,
    ctx: RequestContext,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<Order>>, AppError> {
    state
        .projector
        .orders_for_user(&ctx, user_id)
        .await
        .map(Json)
        .map_err(|e| app_error(&ctx, e))
}

/// PATCH /orders/{orderId}/status
pub async fn update_status(
    State(state): State<OrdersState>,
    ctx: RequestContext,
    Path(order_id): Path<i64>,
    Json(body): Json<StatusBody>,
) -> Result<Json<Order>, AppError> {
    let status = parse_status(&ctx, &body.status)?;
    state
        .projector
        .update_status(&ctx, order_id, status, body.notes)
        .await
        .map(Json)
        .map_err(|e| app_error(&ctx, e))
}

/// DELETE /orders/{orderId}
pub async fn delete_order(
    State(state): State<OrdersState>,
    ctx: RequestContext,
    Path(order_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state
        .projector
        .delete_order(&ctx, order_id)
        .await
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(|e| app_error(&ctx, e))
}

pub async fn health(State(state): State<OrdersState>) -> impl IntoResponse {
    super::health_response(&state.health).await
}
