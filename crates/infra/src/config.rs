//! Configuration loading and representation.

use thiserror::Error;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
pub const DEFAULT_EXCHANGE_REGISTRY: &str = "shipyard:exchanges";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is invalid: {message}")]
    Invalid { name: &'static str, message: String },
}

/// Connection settings for the storage and broker adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfraConfig {
    /// Postgres connection string. Only required by [`crate::storage::PgSession`].
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub redis_url: String,
    /// Redis hash recording declared exchanges.
    pub exchange_registry: String,
}

impl Default for InfraConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: DEFAULT_MAX_CONNECTIONS,
            redis_url: DEFAULT_REDIS_URL.to_string(),
            exchange_registry: DEFAULT_EXCHANGE_REGISTRY.to_string(),
        }
    }
}

impl InfraConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                  |
    /// |------------------------------|--------------------------|
    /// | `DATABASE_URL`               | unset                    |
    /// | `DATABASE_MAX_CONNECTIONS`   | `5`                      |
    /// | `REDIS_URL`                  | `redis://localhost:6379` |
    /// | `SHIPYARD_EXCHANGE_REGISTRY` | `shipyard:exchanges`     |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`InfraConfig::from_env`] but reading values through `lookup`.
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let database_max_connections = match get("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => match raw.parse::<u32>() {
                Ok(0) => {
                    return Err(ConfigError::Invalid {
                        name: "DATABASE_MAX_CONNECTIONS",
                        message: "must be at least 1".to_string(),
                    });
                }
                Ok(n) => n,
                Err(e) => {
                    return Err(ConfigError::Invalid {
                        name: "DATABASE_MAX_CONNECTIONS",
                        message: e.to_string(),
                    });
                }
            },
            None => defaults.database_max_connections,
        };

        Ok(Self {
            database_url: get("DATABASE_URL"),
            database_max_connections,
            redis_url: get("REDIS_URL").unwrap_or(defaults.redis_url),
            exchange_registry: get("SHIPYARD_EXCHANGE_REGISTRY").unwrap_or(defaults.exchange_registry),
        })
    }

    /// The database URL, or [`ConfigError::Missing`].
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing("DATABASE_URL"))
    }
}
