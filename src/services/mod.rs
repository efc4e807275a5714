//! Services module for business logic

pub mod order_projector;
pub mod payment_orchestrator;

pub use order_projector::{CreateOrder, OrderStatusProjector, PaymentStatusUpdate, ProjectionError};
pub use payment_orchestrator::{
    CancelOutcome, ConfirmOutcome, ConfirmStatus, ConfirmTarget, InitiateRequest,
    InitiatedPayment, OrchestratorConfig, OrchestratorError, OrchestratorResult,
    PaymentOrchestrator,
};
