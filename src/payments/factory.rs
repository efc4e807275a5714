use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::providers::{BkashGateway, CardGateway};
use crate::payments::types::ProviderName;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Configured gateways keyed by provider.
///
/// A provider whose credentials are absent is left out, and lookups for it
/// fail with `UnsupportedProvider`.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<ProviderName, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn from_env() -> Self {
        let mut registry = Self::default();

        match BkashGateway::from_env() {
            Ok(gateway) => registry.register(Arc::new(gateway)),
            Err(e) => warn!(provider = "bkash", error = %e, "gateway disabled"),
        }
        match CardGateway::from_env() {
            Ok(gateway) => registry.register(Arc::new(gateway)),
            Err(e) => warn!(provider = "card", error = %e, "gateway disabled"),
        }

        info!(providers = ?registry.list(), "payment gateways loaded");
        registry
    }

    pub fn with_gateways(gateways: Vec<Arc<dyn PaymentGateway>>) -> Self {
        let mut registry = Self::default();
        for gateway in gateways {
            registry.register(gateway);
        }
        registry
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        self.gateways.insert(gateway.name(), gateway);
    }

    pub fn get(&self, provider: ProviderName) -> PaymentResult<Arc<dyn PaymentGateway>> {
        self.gateways
            .get(&provider)
            .cloned()
            .ok_or_else(|| PaymentError::UnsupportedProvider {
                provider: provider.to_string(),
            })
    }

    pub fn list(&self) -> Vec<ProviderName> {
        let mut providers: Vec<ProviderName> = self.gateways.keys().copied().collect();
        providers.sort_by_key(|p| p.as_str());
        providers
    }
}
