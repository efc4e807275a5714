//! Process bootstrap shared by the payment and order binaries

use crate::cache::{init_cache_pool, CacheClient, CachePoolConfig, InMemoryCache, RedisCache, RedisPool};
use crate::config::{AppConfig, ServerConfig};
use crate::database::{init_pool_from_config, run_migrations};
use axum::Router;
use sqlx::PgPool;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

/// Connection pools and the cache client built from them
pub struct Infrastructure {
    pub db_pool: Option<PgPool>,
    pub cache_pool: Option<RedisPool>,
    pub cache: CacheClient,
}

/// Connect Postgres and Redis, or fall back to in-memory stores when
/// `SKIP_EXTERNALS=true`.
pub async fn init_infrastructure(config: &AppConfig) -> anyhow::Result<Infrastructure> {
    let ttl = config.cache.default_ttl();

    if config.skip_externals {
        info!("⏭️  Skipping database initialization (SKIP_EXTERNALS=true)");
        info!("⏭️  Skipping Redis initialization (SKIP_EXTERNALS=true)");
        return Ok(Infrastructure {
            db_pool: None,
            cache_pool: None,
            cache: CacheClient::new(Arc::new(InMemoryCache::new()), ttl),
        });
    }

    info!("📊 Initializing database connection pool...");
    let db_pool = init_pool_from_config(&config.database).await.map_err(|e| {
        error!("Failed to initialize database pool: {}", e);
        e
    })?;
    run_migrations(&db_pool).await?;
    info!(
        max_connections = db_pool.options().get_max_connections(),
        "✅ Database connection pool initialized"
    );

    info!("🔄 Initializing Redis cache connection pool...");
    let cache_pool = init_cache_pool(CachePoolConfig::from_app_config(&config.cache))
        .await
        .map_err(|e| {
            error!("Failed to initialize cache pool: {}", e);
            e
        })?;
    let cache = CacheClient::new(Arc::new(RedisCache::new(cache_pool.clone())), ttl);
    info!("✅ Cache connection pool initialized");

    Ok(Infrastructure {
        db_pool: Some(db_pool),
        cache_pool: Some(cache_pool),
        cache,
    })
}

/// Graceful shutdown signal handler
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

/// Bind and serve until a shutdown signal arrives
pub async fn serve(app: Router, config: &ServerConfig, service: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(
        address = %addr,
        service = service,
        "🚀 Server listening on http://{}",
        addr
    );
    info!("✅ Server is ready to accept connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server shutdown complete");
    Ok(())
}
