use redis::Client;
use redis::aio::{ConnectionManager, PubSub};
use tracing::info;

use super::RedisConfig;
use crate::common::{RetryConfig, retry_with_backoff};

/// Connect and verify with `PING`.
///
/// The returned `ConnectionManager` reconnects on its own after the initial
/// handshake, so one instance is cloned into every component.
pub async fn connect(url: &str) -> redis::RedisResult<ConnectionManager> {
    let client = Client::open(url)?;
    let manager = ConnectionManager::new(client).await?;

    let mut conn = manager.clone();
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;

    info!("Connected to Redis");
    Ok(manager)
}

pub async fn connect_from_config_with_retry(
    config: RedisConfig,
    retry_config: Option<RetryConfig>,
) -> redis::RedisResult<ConnectionManager> {
    retry_with_backoff(|| connect(&config.url), retry_config.unwrap_or_default()).await
}

/// Open a dedicated pub/sub connection.
///
/// Subscriptions cannot share the multiplexed manager, so each subscriber
/// owns one of these.
pub async fn subscriber(url: &str) -> redis::RedisResult<PubSub> {
    let client = Client::open(url)?;
    client.get_async_pubsub().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_rejects_malformed_url() {
        assert!(connect("not-a-redis-url").await.is_err());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_connect() {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        assert!(connect(&url).await.is_ok());
    }
}
