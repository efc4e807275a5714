//! Order-side projection of payment outcomes
//!
//! The order service owns orders. Payment results reach it as
//! [`PaymentStatusUpdate`]s, delivered at least once and possibly out of
//! order, so the projection never moves a paid order backwards unless the
//! update is a cancellation or refund.

use crate::cache::keys::order::{OrderKey, StatusBucketKey, UserOrdersKey};
use crate::cache::CacheClient;
use crate::context::RequestContext;
use crate::database::error::DatabaseError;
use crate::database::order_repository::{NewOrder, Order, OrderStatus, OrderStore};
use crate::payments::types::validate_amount;
use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// A payment-status notification for one order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusUpdate {
    /// Carried in the URL path on the wire
    #[serde(skip)]
    pub order_id: i64,
    pub payment_id: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
    pub payment_status: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Error)]
pub enum ProjectionError {
    #[error("order {order_id} not found")]
    OrderNotFound { order_id: i64 },

    #[error("unknown payment status '{status}'")]
    InvalidStatus { status: String },

    #[error("invalid order: {message}")]
    InvalidOrder { message: String },

    #[error("caller is not identified")]
    Unauthenticated,

    #[error("caller may not access this order")]
    Forbidden,

    #[error(transparent)]
    Storage(#[from] DatabaseError),
}

impl From<ProjectionError> for crate::error::AppError {
    fn from(err: ProjectionError) -> Self {
        use crate::error::{AppError, AppErrorKind, DomainError, ValidationError};

        match err {
            ProjectionError::OrderNotFound { order_id } => {
                AppError::new(AppErrorKind::Domain(DomainError::OrderNotFound {
                    order_id: order_id.to_string(),
                }))
            }
            ProjectionError::InvalidStatus { status } => AppError::new(AppErrorKind::Validation(
                ValidationError::InvalidPaymentStatus { status },
            )),
            ProjectionError::InvalidOrder { message } => AppError::new(AppErrorKind::Validation(
                ValidationError::InvalidRequest { message },
            )),
            ProjectionError::Unauthenticated => {
                AppError::new(AppErrorKind::Validation(ValidationError::MissingCredentials))
            }
            ProjectionError::Forbidden => {
                AppError::new(AppErrorKind::Validation(ValidationError::Forbidden))
            }
            ProjectionError::Storage(e) => e.into(),
        }
    }
}

/// Map a payment-status label onto the order status it implies
pub fn order_status_for(payment_status: &str) -> Result<OrderStatus, ProjectionError> {
    match payment_status.trim().to_lowercase().as_str() {
        "completed" | "succeeded" | "successful" | "paid" => Ok(OrderStatus::Paid),
        "pending" | "initiated" => Ok(OrderStatus::PendingPayment),
        "failed" => Ok(OrderStatus::Failed),
        "cancelled" | "canceled" | "refunded" => Ok(OrderStatus::Cancelled),
        _ => Err(ProjectionError::InvalidStatus {
            status: payment_status.to_string(),
        }),
    }
}

/// Input for [`OrderStatusProjector::create_order`]
#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub total_amount: BigDecimal,
    pub notes: Option<String>,
    pub user_email: String,
    pub user_name: String,
}

pub struct OrderStatusProjector {
    store: Arc<dyn OrderStore>,
    cache: CacheClient,
    cache_ttl: Duration,
}

impl OrderStatusProjector {
    pub fn new(store: Arc<dyn OrderStore>, cache: CacheClient) -> Self {
        let cache_ttl = cache.default_ttl();
        Self {
            store,
            cache,
            cache_ttl,
        }
    }

    /// Record a payment outcome on its order.
    ///
    /// Once an order is Paid only a cancellation or refund from the payment
    /// that settled it changes the order. Other updates keep the status and
    /// payment fields and record just the transaction id, notes and time.
    pub async fn apply_payment_status(
        &self,
        ctx: &RequestContext,
        update: PaymentStatusUpdate,
    ) -> Result<Order, ProjectionError> {
        let incoming = order_status_for(&update.payment_status)?;

        let mut order = self
            .store
            .find_by_id(update.order_id)
            .await?
            .ok_or(ProjectionError::OrderNotFound {
                order_id: update.order_id,
            })?;
        let previous = order.status;

        // Refunds arrive as Cancelled
        let settled_cancellation = incoming == OrderStatus::Cancelled
            && order.payment_id.as_deref() == Some(update.payment_id.as_str());

        if previous == OrderStatus::Paid && !settled_cancellation {
            info!(
                request_id = ctx.request_id_or_default(),
                order_id = order.id,
                payment_id = %update.payment_id,
                payment_status = %update.payment_status,
                "order already paid, keeping status"
            );
        } else {
            order.status = incoming;
            order.payment_id = Some(update.payment_id);
            order.payment_status = Some(update.payment_status);
        }

        if update.transaction_id.is_some() {
            order.transaction_id = update.transaction_id;
        }
        if update.notes.is_some() {
            order.notes = update.notes;
        }
        order.updated_at = Utc::now();

        let saved = self.store.save(&order).await?;
        self.invalidate(&saved, previous).await;

        info!(
            request_id = ctx.request_id_or_default(),
            order_id = saved.id,
            from = %previous,
            to = %saved.status,
            "payment status applied to order"
        );
        Ok(saved)
    }

    pub async fn create_order(
        &self,
        ctx: &RequestContext,
        input: CreateOrder,
    ) -> Result<Order, ProjectionError> {
        let user_id = ctx.user_id.ok_or(ProjectionError::Unauthenticated)?;
        validate_amount(&input.total_amount).map_err(|e| ProjectionError::InvalidOrder {
            message: e.user_message(),
        })?;
        if input.notes.as_deref().map(str::len).unwrap_or(0) > 500 {
            return Err(ProjectionError::InvalidOrder {
                message: "notes must be at most 500 characters".to_string(),
            });
        }

        let order = self
            .store
            .insert(NewOrder {
                user_id,
                user_email: input.user_email,
                user_name: input.user_name,
                total_amount: input.total_amount,
                notes: input.notes,
            })
            .await?;

        self.cache
            .remove_all([
                UserOrdersKey::new(order.user_id).to_string(),
                StatusBucketKey::new(order.status.as_str()).to_string(),
            ])
            .await;

        info!(
            request_id = ctx.request_id_or_default(),
            order_id = order.id,
            user_id = %user_id,
            "order created"
        );
        Ok(order)
    }

    /// Read-through lookup; owners and admins only
    pub async fn get_order(&self, ctx: &RequestContext, id: i64) -> Result<Order, ProjectionError> {
        let store = self.store.clone();
        let order = self
            .cache
            .get_or_set(
                &OrderKey::new(id).to_string(),
                Some(self.cache_ttl),
                || async move {
                    match store.find_by_id(id).await {
                        Ok(Some(order)) => Ok(order),
                        Ok(None) => Err(ProjectionError::OrderNotFound { order_id: id }),
                        Err(e) => Err(ProjectionError::from(e)),
                    }
                },
            )
            .await?;

        if !ctx.can_access_user(order.user_id) {
            warn!(
                request_id = ctx.request_id_or_default(),
                order_id = id,
                "order access denied"
            );
            return Err(ProjectionError::Forbidden);
        }
        Ok(order)
    }

    pub async fn orders_for_user(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
    ) -> Result<Vec<Order>, ProjectionError> {
        if !ctx.can_access_user(user_id) {
            return Err(ProjectionError::Forbidden);
        }

        let store = self.store.clone();
        self.cache
            .get_or_set(
                &UserOrdersKey::new(user_id).to_string(),
                Some(self.cache_ttl),
                || async move { store.find_by_user(user_id).await.map_err(ProjectionError::from) },
            )
            .await
    }

    /// Admin-only listing by status bucket
    pub async fn orders_by_status(
        &self,
        ctx: &RequestContext,
        status: OrderStatus,
    ) -> Result<Vec<Order>, ProjectionError> {
        if !ctx.is_admin() {
            return Err(ProjectionError::Forbidden);
        }

        let store = self.store.clone();
        self.cache
            .get_or_set(
                &StatusBucketKey::new(status.as_str()).to_string(),
                Some(self.cache_ttl),
                || async move { store.find_by_status(status).await.map_err(ProjectionError::from) },
            )
            .await
    }

    pub async fn all_orders(&self, ctx: &RequestContext) -> Result<Vec<Order>, ProjectionError> {
        if !ctx.is_admin() {
            return Err(ProjectionError::Forbidden);
        }
        Ok(self.store.find_all().await?)
    }

    /// Admin override of the order status; bypasses the paid guard
    pub async fn update_status(
        &self,
        ctx: &RequestContext,
        id: i64,
        status: OrderStatus,
        notes: Option<String>,
    ) -> Result<Order, ProjectionError> {
        if !ctx.is_admin() {
            return Err(ProjectionError::Forbidden);
        }

        let mut order = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(ProjectionError::OrderNotFound { order_id: id })?;
        let previous = order.status;

        order.status = status;
        if notes.is_some() {
            order.notes = notes;
        }
        order.updated_at = Utc::now();

        let saved = self.store.save(&order).await?;
        self.invalidate(&saved, previous).await;

        info!(
            request_id = ctx.request_id_or_default(),
            order_id = id,
            from = %previous,
            to = %status,
            "order status overridden"
        );
        Ok(saved)
    }

    pub async fn delete_order(&self, ctx: &RequestContext, id: i64) -> Result<(), ProjectionError> {
        if !ctx.is_admin() {
            return Err(ProjectionError::Forbidden);
        }

        let order = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(ProjectionError::OrderNotFound { order_id: id })?;
        if !self.store.delete(id).await? {
            return Err(ProjectionError::OrderNotFound { order_id: id });
        }
        self.invalidate(&order, order.status).await;

        info!(request_id = ctx.request_id_or_default(), order_id = id, "order deleted");
        Ok(())
    }

    async fn invalidate(&self, order: &Order, previous: OrderStatus) {
        self.cache
            .remove_all([
                OrderKey::new(order.id).to_string(),
                UserOrdersKey::new(order.user_id).to_string(),
                StatusBucketKey::new(previous.as_str()).to_string(),
                StatusBucketKey::new(order.status.as_str()).to_string(),
            ])
            .await;
    }
}
