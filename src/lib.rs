//! Payment confirmation and order-status reconciliation for the shopfront
//! services.
//!
//! The payment side (`services::payment_orchestrator`) drives a payment
//! through its gateway session and settlement, then pushes the outcome to
//! the order side (`services::order_projector`) through an
//! `OrderServiceClient`.

pub mod api;
pub mod cache;
pub mod clients;
pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod server;
pub mod services;
