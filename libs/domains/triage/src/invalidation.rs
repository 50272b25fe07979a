//! Cross-process rule cache invalidation over Redis pub/sub.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::watch;
use uuid::Uuid;

use crate::cache::RuleCache;
use crate::error::TriageResult;

pub const INVALIDATION_CHANNEL: &str = "triagem:rules:invalidate";

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InvalidationPublisher: Send + Sync {
    async fn publish(&self, tenant_id: Uuid) -> TriageResult<()>;
}

/// Publishes the tenant id whose rules changed
#[derive(Clone)]
pub struct RedisInvalidationPublisher {
    redis: ConnectionManager,
}

impl RedisInvalidationPublisher {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl InvalidationPublisher for RedisInvalidationPublisher {
    async fn publish(&self, tenant_id: Uuid) -> TriageResult<()> {
        let mut conn = self.redis.clone();
        let receivers: i64 = conn.publish(INVALIDATION_CHANNEL, tenant_id.to_string()).await?;
        tracing::debug!(tenant_id = %tenant_id, receivers, "Published rule invalidation");
        Ok(())
    }
}

/// Drop cached rules whenever a tenant id arrives on the channel.
///
/// Resubscribes after connection loss. A message that is not a tenant id
/// clears the whole cache.
pub async fn run_invalidation_listener(
    redis_url: String,
    cache: Arc<RuleCache>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let mut pubsub = match database::redis::subscriber(&redis_url).await {
            Ok(pubsub) => pubsub,
            Err(e) => {
                tracing::warn!(error = %e, "Rule invalidation subscriber failed to connect");
                if wait_or_shutdown(&mut shutdown, RESUBSCRIBE_DELAY).await {
                    break;
                }
                continue;
            }
        };

        if let Err(e) = pubsub.subscribe(INVALIDATION_CHANNEL).await {
            tracing::warn!(error = %e, "Rule invalidation subscribe failed");
            if wait_or_shutdown(&mut shutdown, RESUBSCRIBE_DELAY).await {
                break;
            }
            continue;
        }

        // Entries cached before the subscription may have missed messages
        cache.invalidate_all().await;
        tracing::info!(channel = INVALIDATION_CHANNEL, "Listening for rule invalidations");

        let mut messages = pubsub.on_message();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
                message = messages.next() => {
                    let Some(message) = message else {
                        tracing::warn!("Rule invalidation subscription closed, resubscribing");
                        break;
                    };
                    let payload: String = message.get_payload().unwrap_or_default();
                    match payload.trim().parse::<Uuid>() {
                        Ok(tenant_id) => cache.invalidate(tenant_id).await,
                        Err(_) => cache.invalidate_all().await,
                    }
                }
            }
        }
        drop(messages);

        if wait_or_shutdown(&mut shutdown, RESUBSCRIBE_DELAY).await {
            break;
        }
    }
    tracing::info!("Rule invalidation listener stopped");
}

/// Sleep unless shutdown is signalled first; true means shut down.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        _ = tokio::time::sleep(delay) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MockTriageRuleRepository;

    #[tokio::test]
    async fn test_listener_exits_on_shutdown_without_redis() {
        let cache = Arc::new(RuleCache::new(
            Arc::new(MockTriageRuleRepository::new()),
            Duration::from_secs(60),
            6,
        ));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_invalidation_listener(
            "redis://127.0.0.1:1".to_string(),
            cache,
            rx,
        ));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("listener should stop")
            .unwrap();
    }

    #[test]
    fn test_channel_shared_with_rule_writers() {
        assert_eq!(INVALIDATION_CHANNEL, "triagem:rules:invalidate");
    }
}
