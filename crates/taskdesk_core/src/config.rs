//! Runtime configuration loaded from defaults and environment variables.
//!
//! Variables use the `TASKDESK_` prefix and `__` between nested keys, e.g.
//! `TASKDESK_DATABASE__PATH=/var/lib/taskdesk.db` or
//! `TASKDESK_LOGGING__LEVEL=debug`.

use crate::logging::normalize_level;
use ::config::{Config, Environment};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const ENV_PREFIX: &str = "TASKDESK";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid configuration `{key}`: {message}")]
    Invalid { key: &'static str, message: String },
}

impl ConfigError {
    fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    /// File path, or `:memory:` for a private in-memory database.
    pub path: String,
    pub busy_timeout_ms: u64,
    /// Deadline applied to each request context the binary creates.
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// Absolute directory for rolling log files; file logging is off when unset.
    #[serde(default)]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads defaults overlaid with the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::build(Environment::with_prefix(ENV_PREFIX))
    }

    /// Loads defaults overlaid with an explicit variable map instead of the
    /// process environment.
    pub fn from_env_map(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::build(Environment::with_prefix(ENV_PREFIX).source(Some(vars.into_iter().collect())))
    }

    fn build(env: Environment) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("database.path", "taskdesk.db")?
            .set_default("database.busy_timeout_ms", 5_000_i64)?
            .set_default("database.request_timeout_ms", 30_000_i64)?
            .set_default("logging.level", "info")?
            .add_source(
                env.prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app: AppConfig = config.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::invalid("database.path", "must not be empty"));
        }
        if self.database.busy_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "database.busy_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.database.request_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "database.request_timeout_ms",
                "must be greater than zero",
            ));
        }
        normalize_level(&self.logging.level)
            .map_err(|message| ConfigError::invalid("logging.level", message))?;
        if let Some(dir) = &self.logging.dir {
            if !Path::new(dir.trim()).is_absolute() {
                return Err(ConfigError::invalid(
                    "logging.dir",
                    format!("must be an absolute path, got `{dir}`"),
                ));
            }
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.database.busy_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.database.request_timeout_ms)
    }
}
