//! Application configuration module
//!
//! Type-safe configuration loading from environment variables using the
//! `config` and `dotenvy` crates. Configuration is loaded with the
//! `ELEMENT_COST_RELAY` prefix and nested values use `__` as separator.
//!
//! # Example
//!
//! ```no_run
//! use element_cost_relay::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod database;
mod error;
mod pipeline;
mod redis;
mod server;
mod stream;

pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use pipeline::PipelineConfig;
pub use redis::RedisConfig;
pub use server::{Environment, LogFormat, ServerConfig};
pub use stream::StreamConfig;

use serde::Deserialize;

/// Root application configuration
///
/// Load using [`AppConfig::load()`] which reads from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// Document store (PostgreSQL)
    pub database: DatabaseConfig,

    /// Stream transport (Redis)
    pub redis: RedisConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `ELEMENT_COST_RELAY` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    ///
    /// # Environment Variable Format
    ///
    /// - `ELEMENT_COST_RELAY__SERVER__PORT=8001` -> `server.port = 8001`
    /// - `ELEMENT_COST_RELAY__STREAM__INPUT_CHANNEL=ifc` -> `stream.input_channel = ifc`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or values
    /// cannot be parsed into expected types.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("ELEMENT_COST_RELAY")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.database.validate()?;
        self.redis.validate()?;
        self.stream.validate()?;
        self.pipeline.validate()?;
        Ok(())
    }
}
