//! Outbound clients to other services

pub mod order_service;
pub mod service_token;

pub use order_service::{
    HttpOrderServiceClient, LocalOrderServiceClient, OrderClientError, OrderServiceClient,
};
pub use service_token::{ClientCredentialsTokenProvider, ServiceTokenProvider, TokenError};
