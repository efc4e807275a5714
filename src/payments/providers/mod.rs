pub mod bkash;
pub mod card;

pub use bkash::{BkashConfig, BkashGateway};
pub use card::{CardGateway, CardGatewayConfig};
