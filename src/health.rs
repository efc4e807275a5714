//! Health check module
//! Provides health status for the application and its dependencies

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::cache::RedisPool;
use crate::payments::types::ProviderName;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub service: String,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            status: HealthState::Healthy,
            service: service.into(),
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }

    /// Down components make the service unhealthy, warnings only degrade it
    fn settle(&mut self) {
        let states = self.checks.values().map(|c| &c.status);
        self.status = if states.clone().any(|s| *s == ComponentState::Down) {
            HealthState::Unhealthy
        } else if states.into_iter().any(|s| *s == ComponentState::Warning) {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Health checker for the application
///
/// Absent pools mean the service runs on in-memory stores; they are
/// reported as warnings rather than failures.
#[derive(Clone, Default)]
pub struct HealthChecker {
    service: String,
    db_pool: Option<sqlx::PgPool>,
    cache_pool: Option<RedisPool>,
    gateways: Option<Vec<ProviderName>>,
}

impl HealthChecker {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Self::default()
        }
    }

    pub fn with_database(mut self, pool: sqlx::PgPool) -> Self {
        self.db_pool = Some(pool);
        self
    }

    pub fn with_cache(mut self, pool: RedisPool) -> Self {
        self.cache_pool = Some(pool);
        self
    }

    /// Report which payment gateways are enabled
    pub fn with_gateways(mut self, gateways: Vec<ProviderName>) -> Self {
        self.gateways = Some(gateways);
        self
    }

    /// Perform comprehensive health check
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new(self.service.clone());

        let database = match &self.db_pool {
            Some(pool) => {
                let mut health = timed_check("database", Duration::from_secs(5), async {
                    crate::database::health_check(pool)
                        .await
                        .map_err(|e| e.to_string())
                })
                .await;
                if health.status == ComponentState::Up {
                    let stats = crate::database::get_pool_stats(pool);
                    health.details = Some(format!("pool size={} idle={}", stats.size, stats.num_idle));
                }
                health
            }
            None => ComponentHealth::warning(None, Some("in-memory store".to_string())),
        };
        health_status.checks.insert("database".to_string(), database);

        let cache = match &self.cache_pool {
            Some(pool) => {
                let mut health = timed_check("cache", Duration::from_secs(5), async {
                    crate::cache::health_check(pool)
                        .await
                        .map_err(|e| e.to_string())
                })
                .await;
                if health.status == ComponentState::Up {
                    let stats = crate::cache::get_cache_stats(pool);
                    health.details = Some(format!(
                        "connections={} in_use={}",
                        stats.connections, stats.connections_in_use
                    ));
                }
                health
            }
            None => ComponentHealth::warning(None, Some("in-memory cache".to_string())),
        };
        health_status.checks.insert("cache".to_string(), cache);

        if let Some(gateways) = &self.gateways {
            let gateway_health = if gateways.is_empty() {
                ComponentHealth::down(Some("no payment gateway configured".to_string()))
            } else {
                let names: Vec<&str> = gateways.iter().map(|g| g.as_str()).collect();
                let mut health = ComponentHealth::up(None);
                health.details = Some(names.join(","));
                health
            };
            health_status
                .checks
                .insert("gateways".to_string(), gateway_health);
        }

        health_status.settle();
        health_status
    }
}

async fn timed_check<F>(component: &str, limit: Duration, check: F) -> ComponentHealth
where
    F: Future<Output = Result<(), String>>,
{
    let start = Instant::now();
    match timeout(limit, check).await {
        Ok(Ok(())) => {
            let elapsed = start.elapsed().as_millis();
            info!("{} health check: OK ({}ms)", component, elapsed);
            ComponentHealth::up(Some(elapsed))
        }
        Ok(Err(e)) => {
            error!("{} health check failed: {}", component, e);
            ComponentHealth::down(Some(e))
        }
        Err(_) => {
            warn!("{} health check timed out", component);
            ComponentHealth::down(Some("Timeout".to_string()))
        }
    }
}
