//! Connectors for the two stores the pipeline depends on.
//!
//! - `postgres`: SeaORM connection pool, migrations, health probe
//! - `redis`: `ConnectionManager` for commands and streams, plus a dedicated
//!   pub/sub connection for cache invalidation and the live feed
//!
//! Both connectors share the exponential backoff in [`common::retry`], so a
//! process started before its dependencies are reachable keeps trying for a
//! bounded time instead of exiting on the first refused connection.
//!
//! ```ignore
//! use core_config::FromEnv;
//! use database::{postgres, redis, common::RetryConfig};
//!
//! let retry = RetryConfig::new().with_max_retries(10).with_initial_delay(500);
//! let db = postgres::connect_from_config_with_retry(postgres::PostgresConfig::from_env()?, Some(retry.clone())).await?;
//! let conn = redis::connect_from_config_with_retry(redis::RedisConfig::from_env()?, Some(retry)).await?;
//! ```

pub mod common;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "redis")]
pub mod redis;

pub use common::{DatabaseError, DatabaseResult};
