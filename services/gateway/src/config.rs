//! Gateway configuration
//!
//! Read from `TASKTRACK_*` environment variables on top of defaults, e.g.
//! `TASKTRACK_NATS_URL`, `TASKTRACK_AUTH_TIMEOUT_MS`.

use config::{Config, Environment};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration could not be read: {0}")]
    Source(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub nats_url: String,
    pub port: u16,
    pub jwt_secret: String,
    pub topic_prefix: String,
    pub bridge_timeout_ms: u64,
    pub auth_timeout_ms: u64,
    pub token_ttl_secs: u64,
    pub session_idle_secs: u64,
    pub sweep_interval_secs: u64,
}

impl GatewayConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_environment(Environment::with_prefix("TASKTRACK"))
    }

    /// Same as `load`, reading variables from `vars` instead of the process
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_environment(Environment::with_prefix("TASKTRACK").source(Some(vars)))
    }

    fn from_environment(environment: Environment) -> Result<Self, ConfigError> {
        let config: GatewayConfig = Config::builder()
            .set_default("nats_url", "nats://localhost:4222")?
            .set_default("port", 8080)?
            .set_default("jwt_secret", "")?
            .set_default("topic_prefix", shared::DEFAULT_PREFIX)?
            .set_default("bridge_timeout_ms", 5000)?
            .set_default("auth_timeout_ms", 3000)?
            .set_default("token_ttl_secs", 5 * 24 * 3600)?
            .set_default("session_idle_secs", 2 * 3600)?
            .set_default("sweep_interval_secs", 3600)?
            .add_source(environment.try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.len() < 16 {
            return Err(ConfigError::Invalid(
                "jwt_secret must be set and at least 16 bytes".to_string(),
            ));
        }
        if self.bridge_timeout_ms == 0 || self.auth_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".to_string()));
        }
        if self.sweep_interval_secs == 0 || self.session_idle_secs == 0 {
            return Err(ConfigError::Invalid(
                "session idle window and sweep interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge_timeout_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
