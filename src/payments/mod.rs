//! Payment gateway adapters
//!
//! Each gateway implements [`PaymentGateway`]; the [`GatewayRegistry`] maps a
//! [`ProviderName`] onto the configured adapter.

pub mod error;
pub mod factory;
pub mod provider;
pub mod providers;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use factory::GatewayRegistry;
pub use provider::PaymentGateway;
pub use types::{
    GatewaySession, Money, PaymentStatus, ProviderName, SessionRequest, Settlement,
    SettlementRequest,
};
