use shopfront_payments::api::{self, payments::PaymentsState};
use shopfront_payments::clients::{
    ClientCredentialsTokenProvider, HttpOrderServiceClient, LocalOrderServiceClient,
    OrderServiceClient,
};
use shopfront_payments::config::AppConfig;
use shopfront_payments::database::memory::{InMemoryOrderStore, InMemoryPaymentStore};
use shopfront_payments::database::{
    OrderStore, PaymentStore, PgOrderRepository, PgPaymentRepository,
};
use shopfront_payments::health::HealthChecker;
use shopfront_payments::logging::init_tracing;
use shopfront_payments::payments::GatewayRegistry;
use shopfront_payments::server::{init_infrastructure, serve};
use shopfront_payments::services::{OrchestratorConfig, OrderStatusProjector, PaymentOrchestrator};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting payment service"
    );

    let infra = init_infrastructure(&config).await?;

    let store: Arc<dyn PaymentStore> = match &infra.db_pool {
        Some(pool) => Arc::new(PgPaymentRepository::new(pool.clone())),
        None => Arc::new(InMemoryPaymentStore::new()),
    };

    let gateways = GatewayRegistry::from_env();
    if gateways.list().is_empty() {
        warn!("No payment gateway configured; initiate and confirm will be rejected");
    }

    let orders: Arc<dyn OrderServiceClient> =
        if !config.order_service.base_url.is_empty() && config.identity.is_configured() {
            let tokens = ClientCredentialsTokenProvider::new(
                config.identity.clone(),
                infra.cache.clone(),
            )?;
            info!(
                order_service = %config.order_service.base_url,
                "✅ Remote order service client initialized"
            );
            Arc::new(HttpOrderServiceClient::new(
                &config.order_service,
                Arc::new(tokens),
            )?)
        } else {
            // Single-process mode: order projections live next to payments
            info!("⏭️  ORDER_SERVICE_URL or identity not configured, updating orders in-process");
            let order_store: Arc<dyn OrderStore> = match &infra.db_pool {
                Some(pool) => Arc::new(PgOrderRepository::new(pool.clone())),
                None => Arc::new(InMemoryOrderStore::new()),
            };
            let projector = OrderStatusProjector::new(order_store, infra.cache.clone());
            Arc::new(LocalOrderServiceClient::new(Arc::new(projector)))
        };

    let mut health = HealthChecker::new("payment-service").with_gateways(gateways.list());
    if let Some(pool) = &infra.db_pool {
        health = health.with_database(pool.clone());
    }
    if let Some(pool) = &infra.cache_pool {
        health = health.with_cache(pool.clone());
    }
    info!("✅ Health checker initialized");

    let orchestrator = PaymentOrchestrator::new(
        store,
        gateways,
        orders,
        infra.cache.clone(),
        OrchestratorConfig::from_env(),
    );

    let routes = api::payments::router(PaymentsState {
        orchestrator: Arc::new(orchestrator),
        health,
    });
    let app = api::with_request_layers(api::with_identity_gate(
        routes,
        config.ingress_secret.as_deref(),
    ));
    if config.ingress_secret.is_none() {
        warn!("INGRESS_SHARED_SECRET not set, identity headers are trusted as sent");
    }
    info!("✅ Routes configured");

    serve(app, &config.server, "payment-service").await
}
