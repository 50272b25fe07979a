//! Redis connections: a multiplexed `ConnectionManager` for commands and
//! streams, and dedicated pub/sub connections for subscribers.

mod config;
mod connector;
mod health;

pub use config::RedisConfig;
pub use connector::{connect, connect_from_config_with_retry, subscriber};
pub use health::check_health;

pub use redis::aio::{ConnectionManager, PubSub};
