use core_config::{Environment, FromEnv, env_parse_or_default, server::ServerConfig};
use database::{postgres::PostgresConfig, redis::RedisConfig};
use eyre::{Result, WrapErr};

/// API process configuration, composed from the shared config components
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: Environment,
    pub database: PostgresConfig,
    pub redis: RedisConfig,
    pub server: ServerConfig,
    /// Events buffered per SSE client before the oldest are dropped
    pub live_feed_capacity: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            environment: Environment::from_env(),
            database: PostgresConfig::from_env().wrap_err("Failed to load PostgreSQL configuration")?,
            redis: RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?,
            server: ServerConfig::from_env().wrap_err("Failed to load server configuration")?,
            live_feed_capacity: env_parse_or_default("LIVE_FEED_CAPACITY", 256)
                .wrap_err("Failed to load live feed configuration")?,
        })
    }
}
