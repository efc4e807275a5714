use shopfront_payments::api::{self, orders::OrdersState};
use shopfront_payments::config::{AppConfig, ServerConfig};
use shopfront_payments::database::memory::InMemoryOrderStore;
use shopfront_payments::database::{OrderStore, PgOrderRepository};
use shopfront_payments::health::HealthChecker;
use shopfront_payments::logging::init_tracing;
use shopfront_payments::server::{init_infrastructure, serve};
use shopfront_payments::services::OrderStatusProjector;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = AppConfig::from_env()?;
    config.server = ServerConfig::from_env_with("ORDER_SERVICE_PORT", 8001)?;
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "🚀 Starting order service"
    );

    let infra = init_infrastructure(&config).await?;

    let store: Arc<dyn OrderStore> = match &infra.db_pool {
        Some(pool) => Arc::new(PgOrderRepository::new(pool.clone())),
        None => Arc::new(InMemoryOrderStore::new()),
    };
    let projector = OrderStatusProjector::new(store, infra.cache.clone());

    let mut health = HealthChecker::new("order-service");
    if let Some(pool) = &infra.db_pool {
        health = health.with_database(pool.clone());
    }
    if let Some(pool) = &infra.cache_pool {
        health = health.with_cache(pool.clone());
    }

    let routes = api::orders::router(OrdersState {
        projector: Arc::new(projector),
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

    serve(app, &config.server, "order-service").await
}
