//! Auth service configuration, read from `TASKTRACK_*` environment variables

use config::{Config, Environment};
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration could not be read: {0}")]
    Source(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub port: u16,
    pub nats_url: String,
    pub topic_prefix: String,
    pub session_lifetime_days: i64,
    pub purge_interval_secs: u64,
    /// Deadline for user service round trips during login
    pub user_timeout_ms: u64,
}

impl AuthConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_environment(Environment::with_prefix("TASKTRACK"))
    }

    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_environment(Environment::with_prefix("TASKTRACK").source(Some(vars)))
    }

    fn from_environment(environment: Environment) -> Result<Self, ConfigError> {
        let config: AuthConfig = Config::builder()
            .set_default("port", 8081)?
            .set_default("nats_url", "nats://localhost:4222")?
            .set_default("topic_prefix", shared::DEFAULT_PREFIX)?
            .set_default("session_lifetime_days", crate::store::SESSION_LIFETIME_DAYS)?
            .set_default("purge_interval_secs", 3600)?
            .set_default("user_timeout_ms", 3000)?
            .add_source(environment.try_parsing(true))
            .build()?
            .try_deserialize()?;

        if config.session_lifetime_days <= 0 {
            return Err(ConfigError::Invalid(
                "session_lifetime_days must be positive".to_string(),
            ));
        }
        if config.purge_interval_secs == 0 {
            return Err(ConfigError::Invalid("purge_interval_secs must be positive".to_string()));
        }
        if config.user_timeout_ms == 0 {
            return Err(ConfigError::Invalid("user_timeout_ms must be positive".to_string()));
        }
        Ok(config)
    }

    pub fn session_lifetime(&self) -> chrono::Duration {
        chrono::Duration::days(self.session_lifetime_days)
    }

    pub fn purge_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.purge_interval_secs)
    }

    pub fn user_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.user_timeout_ms)
    }
}
