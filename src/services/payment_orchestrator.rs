//! Payment Orchestrator Service
//!
//! Drives one payment attempt through its lifecycle: a local Pending record,
//! a gateway checkout session, a settlement query, and finally the order
//! service update. Gateway and order-service calls are never retried here;
//! the caller decides whether to call again.

use crate::cache::keys::payment::{LatestForOrderKey, PaymentKey};
use crate::cache::CacheClient;
use crate::clients::order_service::{OrderClientError, OrderServiceClient};
use crate::context::RequestContext;
use crate::database::error::DatabaseError;
use crate::database::payment_repository::{
    CreateOutcome, NewPayment, Payment, PaymentChange, PaymentStore,
};
use crate::error::{AppError, AppErrorKind, DomainError, ExternalError};
use crate::payments::error::PaymentError;
use crate::payments::factory::GatewayRegistry;
use crate::payments::types::{
    validate_amount, Money, PaymentStatus, ProviderName, SessionRequest, Settlement,
    SettlementRequest,
};
use crate::services::order_projector::PaymentStatusUpdate;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound for a single create-session or settlement call
    pub gateway_timeout: Duration,
    /// Upper bound for a single order-service update
    pub order_update_timeout: Duration,
    /// Lifetime of cached payment views
    pub payment_cache_ttl: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            gateway_timeout: Duration::from_secs(30),
            order_update_timeout: Duration::from_secs(10),
            payment_cache_ttl: Duration::from_secs(300),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        let secs = |name: &str, default: u64| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v: &u64| *v > 0)
                .unwrap_or(default)
        };

        Self {
            gateway_timeout: Duration::from_secs(secs("GATEWAY_TIMEOUT_SECS", 30)),
            order_update_timeout: Duration::from_secs(secs("ORDER_UPDATE_TIMEOUT_SECS", 10)),
            payment_cache_ttl: Duration::from_secs(secs("PAYMENT_CACHE_TTL_SECS", 300)),
        }
    }
}

// ============================================================================
// Requests & Outcomes
// ============================================================================

#[derive(Debug, Clone)]
pub struct InitiateRequest {
    pub order_id: i64,
    pub amount: BigDecimal,
    pub provider: ProviderName,
    pub payer_reference: Option<String>,
}

/// What the caller needs to send the customer to the gateway
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatedPayment {
    pub payment_id: Uuid,
    pub order_id: i64,
    pub provider: ProviderName,
    pub checkout_reference: String,
    pub checkout_url: Option<String>,
    pub status: PaymentStatus,
    pub expires_at: Option<DateTime<Utc>>,
    /// True when an already-initiated attempt was handed back
    pub reused: bool,
}

impl InitiatedPayment {
    fn from_payment(payment: &Payment, expires_at: Option<DateTime<Utc>>, reused: bool) -> Self {
        Self {
            payment_id: payment.id,
            order_id: payment.order_id,
            provider: payment.provider,
            checkout_reference: payment.provider_reference.clone().unwrap_or_default(),
            checkout_url: payment.checkout_url.clone(),
            status: payment.status,
            expires_at,
            reused,
        }
    }
}

/// How a confirm call locates its payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmTarget {
    PaymentId(Uuid),
    /// Most recent active attempt for the order, optionally for one provider
    Order {
        order_id: i64,
        provider: Option<ProviderName>,
    },
    ProviderReference {
        provider: ProviderName,
        reference: String,
    },
}

impl ConfirmTarget {
    fn describe(&self) -> String {
        match self {
            ConfirmTarget::PaymentId(id) => id.to_string(),
            ConfirmTarget::Order { order_id, .. } => format!("order {}", order_id),
            ConfirmTarget::ProviderReference { provider, reference } => {
                format!("{} reference {}", provider, reference)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConfirmStatus {
    Success,
    AlreadyCompleted,
    NotPaid,
    NotInitiated,
    /// Settled at the gateway but the order could not be updated
    OrderUpdateFailed,
}

impl ConfirmStatus {
    pub fn message(&self) -> &'static str {
        match self {
            ConfirmStatus::Success => "Payment confirmed and order updated",
            ConfirmStatus::AlreadyCompleted => "Payment was already completed",
            ConfirmStatus::NotPaid => "Payment has not been completed",
            ConfirmStatus::NotInitiated => "Payment was never initiated with the gateway",
            ConfirmStatus::OrderUpdateFailed => {
                "Payment recorded but the order could not be updated"
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmOutcome {
    pub status: ConfirmStatus,
    pub payment: Payment,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CancelOutcome {
    pub payment: Payment,
    pub order_updated: bool,
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    #[error("invalid request: {0}")]
    InvalidRequest(PaymentError),

    #[error("no payment found for {reference}")]
    PaymentNotFound { reference: String },

    #[error("order {order_id} already has an active {provider} payment for a different amount")]
    DuplicatePayment {
        order_id: i64,
        provider: ProviderName,
    },

    #[error("gateway {provider} unavailable: {source}")]
    GatewayUnavailable {
        provider: ProviderName,
        source: PaymentError,
    },

    #[error("payment {payment_id} cannot move from {from} to {to}")]
    InvalidStateTransition {
        payment_id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error(transparent)]
    Storage(#[from] DatabaseError),
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::InvalidRequest(e) => e.into(),
            OrchestratorError::PaymentNotFound { reference } => {
                AppError::new(AppErrorKind::Domain(DomainError::PaymentNotFound { reference }))
            }
            OrchestratorError::DuplicatePayment { order_id, provider } => {
                AppError::new(AppErrorKind::Domain(DomainError::DuplicatePayment {
                    order_id: order_id.to_string(),
                    provider: provider.to_string(),
                }))
            }
            // Timeouts included: the gateway is simply unavailable to the caller
            OrchestratorError::GatewayUnavailable { provider, source } => {
                AppError::new(AppErrorKind::External(ExternalError::PaymentGateway {
                    provider: provider.to_string(),
                    message: source.to_string(),
                    is_retryable: source.is_retryable(),
                }))
            }
            OrchestratorError::InvalidStateTransition {
                payment_id,
                from,
                to,
            } => AppError::new(AppErrorKind::Domain(DomainError::InvalidStateTransition {
                payment_id: payment_id.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            })),
            OrchestratorError::Storage(e) => e.into(),
        }
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

// ============================================================================
// Orchestrator
// ============================================================================

pub struct PaymentOrchestrator {
    store: Arc<dyn PaymentStore>,
    gateways: GatewayRegistry,
    orders: Arc<dyn OrderServiceClient>,
    cache: CacheClient,
    config: OrchestratorConfig,
}

impl PaymentOrchestrator {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        gateways: GatewayRegistry,
        orders: Arc<dyn OrderServiceClient>,
        cache: CacheClient,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            gateways,
            orders,
            cache,
            config,
        }
    }

    pub fn providers(&self) -> Vec<ProviderName> {
        self.gateways.list()
    }

    // =========================================================================
    // Initiation
    // =========================================================================

    /// Create (or reuse) the active payment for an order and provider and
    /// open a checkout session for it.
    ///
    /// A gateway failure leaves the row Pending so the next call reuses it.
    pub async fn initiate(
        &self,
        ctx: &RequestContext,
        request: InitiateRequest,
    ) -> OrchestratorResult<InitiatedPayment> {
        validate_amount(&request.amount).map_err(OrchestratorError::InvalidRequest)?;
        let gateway = self
            .gateways
            .get(request.provider)
            .map_err(OrchestratorError::InvalidRequest)?;
        let amount = Money::new(request.amount.clone(), request.provider.currency())
            .map_err(OrchestratorError::InvalidRequest)?;

        let payment = match self.create_or_find_active(&request).await? {
            CreateOutcome::Created(payment) => payment,
            CreateOutcome::Existing(existing) => {
                if existing.amount != request.amount {
                    warn!(
                        request_id = ctx.request_id_or_default(),
                        order_id = request.order_id,
                        provider = %request.provider,
                        payment_id = %existing.id,
                        "active payment exists with a different amount"
                    );
                    return Err(OrchestratorError::DuplicatePayment {
                        order_id: request.order_id,
                        provider: request.provider,
                    });
                }
                if existing.status == PaymentStatus::Initiated {
                    info!(
                        request_id = ctx.request_id_or_default(),
                        order_id = request.order_id,
                        payment_id = %existing.id,
                        "reusing initiated payment"
                    );
                    return Ok(InitiatedPayment::from_payment(&existing, None, true));
                }
                existing
            }
        };

        let session = self
            .call_gateway(
                request.provider,
                gateway.create_session(SessionRequest {
                    payment_id: payment.id,
                    order_id: payment.order_id,
                    amount,
                    payer_reference: request.payer_reference.clone(),
                }),
            )
            .await;

        let session = match session {
            Ok(session) => session,
            Err(e) => {
                self.record_initiation_failure(ctx, &payment, &e).await;
                return Err(OrchestratorError::GatewayUnavailable {
                    provider: request.provider,
                    source: e,
                });
            }
        };

        let change = PaymentChange::to(PaymentStatus::Initiated)
            .with_reference(session.reference.clone())
            .with_checkout_url(session.checkout_url.clone())
            .with_token(session.provider_token.clone());

        let initiated = match self
            .store
            .transition(payment.id, PaymentStatus::Pending, change)
            .await?
        {
            Some(updated) => InitiatedPayment::from_payment(&updated, session.expires_at, false),
            None => {
                // A concurrent initiate for the same row finished first
                let current = self.load(payment.id).await?;
                if current.status != PaymentStatus::Initiated {
                    return Err(OrchestratorError::InvalidStateTransition {
                        payment_id: current.id,
                        from: current.status,
                        to: PaymentStatus::Initiated,
                    });
                }
                InitiatedPayment::from_payment(&current, None, true)
            }
        };
        self.invalidate(payment.id, payment.order_id).await;

        info!(
            request_id = ctx.request_id_or_default(),
            order_id = initiated.order_id,
            payment_id = %initiated.payment_id,
            provider = %initiated.provider,
            reference = %initiated.checkout_reference,
            "payment initiated"
        );
        Ok(initiated)
    }

    async fn create_or_find_active(
        &self,
        request: &InitiateRequest,
    ) -> OrchestratorResult<CreateOutcome> {
        let new = NewPayment {
            order_id: request.order_id,
            amount: request.amount.clone(),
            currency: request.provider.currency().to_string(),
            provider: request.provider,
        };

        match self.store.create_if_no_active(new.clone()).await {
            // The conflicting row went terminal mid-check; one more attempt settles it
            Err(e) if e.is_unique_violation() => Ok(self.store.create_if_no_active(new).await?),
            other => Ok(other?),
        }
    }

    async fn record_initiation_failure(
        &self,
        ctx: &RequestContext,
        payment: &Payment,
        err: &PaymentError,
    ) {
        warn!(
            request_id = ctx.request_id_or_default(),
            order_id = payment.order_id,
            payment_id = %payment.id,
            provider = %payment.provider,
            error = %err,
            "checkout session could not be created, payment left pending"
        );

        // A concurrent initiate may already have moved the row on
        let change = PaymentChange::to(PaymentStatus::Pending).with_failure(err.to_string());
        match self
            .store
            .transition(payment.id, PaymentStatus::Pending, change)
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => info!(
                payment_id = %payment.id,
                "payment no longer pending, initiation failure not recorded"
            ),
            Err(e) => {
                warn!(payment_id = %payment.id, error = %e, "could not record initiation failure")
            }
        }
        self.invalidate(payment.id, payment.order_id).await;
    }

    // =========================================================================
    // Confirmation
    // =========================================================================

    /// Ask the gateway whether the payment settled and propagate the result.
    ///
    /// Only the caller whose conditional write moves the payment out of its
    /// active state notifies the order service.
    pub async fn confirm(
        &self,
        ctx: &RequestContext,
        target: ConfirmTarget,
    ) -> OrchestratorResult<ConfirmOutcome> {
        let payment = self
            .resolve(&target)
            .await?
            .ok_or_else(|| OrchestratorError::PaymentNotFound {
                reference: target.describe(),
            })?;

        match payment.status {
            PaymentStatus::Completed => {
                return Ok(ConfirmOutcome {
                    status: ConfirmStatus::AlreadyCompleted,
                    payment,
                })
            }
            PaymentStatus::Failed | PaymentStatus::Cancelled => {
                return Ok(ConfirmOutcome {
                    status: ConfirmStatus::NotPaid,
                    payment,
                })
            }
            PaymentStatus::Pending | PaymentStatus::Initiated => {}
        }

        let Some(reference) = payment.provider_reference.clone() else {
            return Ok(ConfirmOutcome {
                status: ConfirmStatus::NotInitiated,
                payment,
            });
        };

        let gateway = self
            .gateways
            .get(payment.provider)
            .map_err(|e| OrchestratorError::GatewayUnavailable {
                provider: payment.provider,
                source: e,
            })?;

        let settlement = self
            .call_gateway(
                payment.provider,
                gateway.get_settlement(SettlementRequest {
                    payment_id: payment.id,
                    reference,
                    provider_token: payment.provider_token.clone(),
                }),
            )
            .await
            .map_err(|e| {
                warn!(
                    request_id = ctx.request_id_or_default(),
                    payment_id = %payment.id,
                    provider = %payment.provider,
                    error = %e,
                    "settlement query failed, payment unchanged"
                );
                OrchestratorError::GatewayUnavailable {
                    provider: payment.provider,
                    source: e,
                }
            })?;

        let (change, settled_status) = match settlement {
            Settlement::Paid { transaction_id } => (
                PaymentChange::to(PaymentStatus::Completed).with_transaction_id(transaction_id),
                ConfirmStatus::Success,
            ),
            Settlement::NotPaid { reason } => (
                PaymentChange::to(PaymentStatus::Failed).with_failure(reason),
                ConfirmStatus::NotPaid,
            ),
        };

        let Some(updated) = self
            .store
            .transition(payment.id, payment.status, change)
            .await?
        else {
            let current = self.load(payment.id).await?;
            info!(
                request_id = ctx.request_id_or_default(),
                payment_id = %current.id,
                status = %current.status,
                "payment moved by a concurrent confirm"
            );
            let status = if current.status == PaymentStatus::Completed {
                ConfirmStatus::AlreadyCompleted
            } else {
                ConfirmStatus::NotPaid
            };
            return Ok(ConfirmOutcome {
                status,
                payment: current,
            });
        };
        self.invalidate(updated.id, updated.order_id).await;

        info!(
            request_id = ctx.request_id_or_default(),
            order_id = updated.order_id,
            payment_id = %updated.id,
            status = %updated.status,
            "payment settled"
        );

        let status = match self.notify_order(ctx, &updated).await {
            Ok(()) => settled_status,
            Err(_) => ConfirmStatus::OrderUpdateFailed,
        };
        Ok(ConfirmOutcome {
            status,
            payment: updated,
        })
    }

    async fn resolve(&self, target: &ConfirmTarget) -> OrchestratorResult<Option<Payment>> {
        let found = match target {
            ConfirmTarget::PaymentId(id) => self.store.find_by_id(*id).await?,
            ConfirmTarget::Order {
                order_id,
                provider: Some(provider),
            } => match self.store.find_active(*order_id, *provider).await? {
                Some(active) => Some(active),
                None => {
                    self.store
                        .find_latest_for_provider(*order_id, *provider)
                        .await?
                }
            },
            ConfirmTarget::Order {
                order_id,
                provider: None,
            } => {
                let lookups = ProviderName::all()
                    .into_iter()
                    .map(|provider| self.store.find_active(*order_id, provider));
                let newest_active = try_join_all(lookups)
                    .await?
                    .into_iter()
                    .flatten()
                    .max_by_key(|p| p.created_at);
                match newest_active {
                    Some(active) => Some(active),
                    None => self.store.find_latest_by_order(*order_id).await?,
                }
            }
            ConfirmTarget::ProviderReference {
                provider,
                reference,
            } => {
                self.store
                    .find_by_provider_reference(*provider, reference)
                    .await?
            }
        };
        Ok(found)
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    pub async fn cancel(
        &self,
        ctx: &RequestContext,
        payment_id: Uuid,
    ) -> OrchestratorResult<CancelOutcome> {
        let payment = self.load(payment_id).await?;
        if !payment.status.can_transition_to(PaymentStatus::Cancelled) {
            return Err(OrchestratorError::InvalidStateTransition {
                payment_id,
                from: payment.status,
                to: PaymentStatus::Cancelled,
            });
        }

        let Some(cancelled) = self
            .store
            .transition(
                payment_id,
                payment.status,
                PaymentChange::to(PaymentStatus::Cancelled),
            )
            .await?
        else {
            let current = self.load(payment_id).await?;
            return Err(OrchestratorError::InvalidStateTransition {
                payment_id,
                from: current.status,
                to: PaymentStatus::Cancelled,
            });
        };
        self.invalidate(cancelled.id, cancelled.order_id).await;

        info!(
            request_id = ctx.request_id_or_default(),
            order_id = cancelled.order_id,
            payment_id = %cancelled.id,
            from = %payment.status,
            "payment cancelled"
        );

        let order_updated = self.notify_order(ctx, &cancelled).await.is_ok();
        Ok(CancelOutcome {
            payment: cancelled,
            order_updated,
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Most recent payment for the order across providers
    pub async fn get_by_order(
        &self,
        _ctx: &RequestContext,
        order_id: i64,
    ) -> OrchestratorResult<Payment> {
        let store = self.store.clone();
        self.cache
            .get_or_set(
                &LatestForOrderKey::new(order_id).to_string(),
                Some(self.config.payment_cache_ttl),
                || async move {
                    match store.find_latest_by_order(order_id).await {
                        Ok(Some(payment)) => Ok(payment),
                        Ok(None) => Err(OrchestratorError::PaymentNotFound {
                            reference: format!("order {}", order_id),
                        }),
                        Err(e) => Err(OrchestratorError::from(e)),
                    }
                },
            )
            .await
    }

    pub async fn get_by_id(
        &self,
        _ctx: &RequestContext,
        payment_id: Uuid,
    ) -> OrchestratorResult<Payment> {
        let store = self.store.clone();
        self.cache
            .get_or_set(
                &PaymentKey::new(payment_id).to_string(),
                Some(self.config.payment_cache_ttl),
                || async move {
                    match store.find_by_id(payment_id).await {
                        Ok(Some(payment)) => Ok(payment),
                        Ok(None) => Err(OrchestratorError::PaymentNotFound {
                            reference: payment_id.to_string(),
                        }),
                        Err(e) => Err(OrchestratorError::from(e)),
                    }
                },
            )
            .await
    }

    /// Reverse lookup from a gateway settlement id, for reconciling
    /// provider statements against local payments. Uncached.
    pub async fn get_by_transaction(
        &self,
        _ctx: &RequestContext,
        transaction_id: &str,
    ) -> OrchestratorResult<Payment> {
        self.store
            .find_by_transaction_id(transaction_id)
            .await?
            .ok_or_else(|| OrchestratorError::PaymentNotFound {
                reference: format!("transaction {}", transaction_id),
            })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Uncached read; cached views do not carry the provider token
    async fn load(&self, payment_id: Uuid) -> OrchestratorResult<Payment> {
        self.store
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| OrchestratorError::PaymentNotFound {
                reference: payment_id.to_string(),
            })
    }

    async fn call_gateway<T>(
        &self,
        provider: ProviderName,
        call: impl Future<Output = Result<T, PaymentError>>,
    ) -> Result<T, PaymentError> {
        match tokio::time::timeout(self.config.gateway_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(PaymentError::Timeout {
                provider: provider.to_string(),
                timeout_secs: self.config.gateway_timeout.as_secs(),
            }),
        }
    }

    async fn notify_order(
        &self,
        ctx: &RequestContext,
        payment: &Payment,
    ) -> Result<(), OrderClientError> {
        let update = PaymentStatusUpdate {
            order_id: payment.order_id,
            payment_id: payment.id.to_string(),
            transaction_id: payment.transaction_id.clone(),
            payment_status: payment.status.as_label().to_string(),
            notes: payment.failure_reason.clone(),
        };

        let result = match tokio::time::timeout(
            self.config.order_update_timeout,
            self.orders.update_payment_status(ctx, update),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(OrderClientError::Timeout {
                timeout_secs: self.config.order_update_timeout.as_secs(),
            }),
        };

        if let Err(e) = &result {
            error!(
                request_id = ctx.request_id_or_default(),
                order_id = payment.order_id,
                payment_id = %payment.id,
                transaction_id = payment.transaction_id.as_deref().unwrap_or("-"),
                payment_status = payment.status.as_label(),
                error = %e,
                "order update failed; payment and order are out of sync"
            );
        }
        result
    }

    async fn invalidate(&self, payment_id: Uuid, order_id: i64) {
        self.cache
            .remove_all([
                PaymentKey::new(payment_id).to_string(),
                LatestForOrderKey::new(order_id).to_string(),
            ])
            .await;
    }
}
