use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use super::{LIVE_CHANNEL, LiveEvent};
use crate::error::DispatchResult;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LivePublisher: Send + Sync {
    /// Returns how many subscribers received the event
    async fn publish(&self, event: &LiveEvent) -> DispatchResult<i64>;
}

/// Publishes live events on the Redis pub/sub channel read by every API process
#[derive(Clone)]
pub struct LiveHub {
    redis: ConnectionManager,
}

impl LiveHub {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl LivePublisher for LiveHub {
    async fn publish(&self, event: &LiveEvent) -> DispatchResult<i64> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.redis.clone();
        let receivers: i64 = conn.publish(LIVE_CHANNEL, payload).await?;
        tracing::debug!(
            occurrence_id = %event.occurrence_id,
            kind = %event.kind,
            receivers,
            "Published live event"
        );
        Ok(receivers)
    }
}
