//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    pub identity: IdentityConfig,
    pub order_service: OrderServiceConfig,
    /// Shared secret the ingress attaches after authenticating the caller;
    /// identity headers are only honored on requests that carry it
    pub ingress_secret: Option<String>,
    /// Run against in-memory stores without Postgres or Redis
    pub skip_externals: bool,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    pub default_ttl: u64, // seconds
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Client-credentials settings for service-to-service tokens
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Realm base url, e.g. `https://id.example.com/realms/shop`
    pub authority: String,
    pub client_id: String,
    pub client_secret: String,
    pub request_timeout: u64, // seconds
}

/// Where the payment service pushes payment-status updates
#[derive(Debug, Clone)]
pub struct OrderServiceConfig {
    pub base_url: String,
    pub request_timeout: u64, // seconds
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        let skip_externals = env_flag("SKIP_EXTERNALS");
        let database = if skip_externals {
            DatabaseConfig::from_env().unwrap_or_default()
        } else {
            DatabaseConfig::from_env()?
        };

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database,
            cache: CacheConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            identity: IdentityConfig::from_env()?,
            order_service: OrderServiceConfig::from_env()?,
            ingress_secret: env::var("INGRESS_SHARED_SECRET")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            skip_externals,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.logging.validate()?;
        self.order_service.validate()?;
        if !self.skip_externals {
            self.database.validate()?;
            self.cache.validate()?;
        }

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with("SERVER_PORT", 8000)
    }

    /// Reads the port from `port_var`; the order-service binary uses its own
    /// variable so both services can share one `.env`.
    pub fn from_env_with(port_var: &str, default_port: u16) -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: match env::var(port_var) {
                Ok(raw) => raw
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(port_var.to_string()))?,
                Err(_) => default_port,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl CacheConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(CacheConfig {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            default_ttl: env::var("CACHE_DEFAULT_TTL")
                .unwrap_or_else(|_| "1800".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("CACHE_DEFAULT_TTL".to_string()))?,
            max_connections: env::var("CACHE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("CACHE_MAX_CONNECTIONS".to_string()))?,
        })
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis_url.is_empty() {
            return Err(ConfigError::InvalidValue("REDIS_URL".to_string()));
        }

        if !self.redis_url.starts_with("redis://") && !self.redis_url.starts_with("rediss://") {
            return Err(ConfigError::InvalidValue(
                "REDIS_URL must start with redis:// or rediss://".to_string(),
            ));
        }

        if self.default_ttl == 0 {
            return Err(ConfigError::InvalidValue("CACHE_DEFAULT_TTL".to_string()));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(IdentityConfig {
            authority: env::var("IDENTITY_AUTHORITY").unwrap_or_default(),
            client_id: env::var("IDENTITY_CLIENT_ID").unwrap_or_default(),
            client_secret: env::var("IDENTITY_CLIENT_SECRET").unwrap_or_default(),
            request_timeout: env::var("IDENTITY_REQUEST_TIMEOUT")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("IDENTITY_REQUEST_TIMEOUT".to_string()))?,
        })
    }

    /// Without an authority the order-service client runs in-process
    pub fn is_configured(&self) -> bool {
        !self.authority.is_empty() && !self.client_id.is_empty()
    }

    pub fn token_endpoint(&self) -> String {
        format!(
            "{}/protocol/openid-connect/token",
            self.authority.trim_end_matches('/')
        )
    }
}

impl OrderServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(OrderServiceConfig {
            base_url: env::var("ORDER_SERVICE_URL").unwrap_or_default(),
            request_timeout: env::var("ORDER_SERVICE_TIMEOUT")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("ORDER_SERVICE_TIMEOUT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_url.is_empty()
            && !self.base_url.starts_with("http://")
            && !self.base_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue(
                "ORDER_SERVICE_URL must be a valid URL".to_string(),
            ));
        }

        if self.request_timeout == 0 {
            return Err(ConfigError::InvalidValue(
                "ORDER_SERVICE_TIMEOUT".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl From<ConfigError> for crate::error::AppError {
    fn from(err: ConfigError) -> Self {
        use crate::error::{AppError, AppErrorKind, InfrastructureError};

        AppError::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: err.to_string(),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_database_min_above_max_rejected() {
        let config = DatabaseConfig {
            url: "postgres://localhost/shop".to_string(),
            max_connections: 2,
            min_connections: 5,
            connection_timeout: 30,
            idle_timeout: None,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redis_url_scheme_required() {
        let config = CacheConfig {
            redis_url: "localhost:6379".to_string(),
            default_ttl: 60,
            max_connections: 4,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_token_endpoint_trims_trailing_slash() {
        let config = IdentityConfig {
            authority: "https://id.example.com/realms/shop/".to_string(),
            client_id: "payment-service".to_string(),
            client_secret: "secret".to_string(),
            request_timeout: 10,
        };

        assert_eq!(
            config.token_endpoint(),
            "https://id.example.com/realms/shop/protocol/openid-connect/token"
        );
        assert!(config.is_configured());
    }

    #[test]
    fn test_order_service_url_must_be_http() {
        let config = OrderServiceConfig {
            base_url: "orders.internal".to_string(),
            request_timeout: 10,
        };

        assert!(config.validate().is_err());
    }
}
