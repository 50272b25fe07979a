use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{broadcast, watch};

use super::{LIVE_CHANNEL, LiveEvent};

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

/// In-process fan-out of live events to SSE connections.
///
/// One Redis subscription per API process; every connected client holds a
/// broadcast receiver. Slow clients lose the oldest events rather than
/// holding the others back.
#[derive(Clone)]
pub struct LiveFeed {
    sender: broadcast::Sender<LiveEvent>,
}

impl LiveFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.sender.subscribe()
    }

    /// Connected clients
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Hand an event to every connected client; returns how many got it
    pub fn broadcast(&self, event: LiveEvent) -> usize {
        // An error only means nobody is connected
        self.sender.send(event).unwrap_or(0)
    }

    /// Relay `vigil:live_events` into the broadcast channel until shutdown.
    pub async fn run(self, redis_url: String, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let mut pubsub = match database::redis::subscriber(&redis_url).await {
                Ok(pubsub) => pubsub,
                Err(e) => {
                    tracing::warn!(error = %e, "Live feed subscriber failed to connect");
                    if wait_or_shutdown(&mut shutdown, RESUBSCRIBE_DELAY).await {
                        break;
                    }
                    continue;
                }
            };

            if let Err(e) = pubsub.subscribe(LIVE_CHANNEL).await {
                tracing::warn!(error = %e, "Live feed subscribe failed");
                if wait_or_shutdown(&mut shutdown, RESUBSCRIBE_DELAY).await {
                    break;
                }
                continue;
            }
            tracing::info!(channel = LIVE_CHANNEL, "Live feed subscribed");

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
                            tracing::warn!("Live feed subscription closed, resubscribing");
                            break;
                        };
                        let payload: String = message.get_payload().unwrap_or_default();
                        match serde_json::from_str::<LiveEvent>(&payload) {
                            Ok(event) => {
                                self.broadcast(event);
                            }
                            Err(e) => tracing::warn!(error = %e, "Dropping undecodable live event"),
                        }
                    }
                }
            }
            drop(messages);

            if wait_or_shutdown(&mut shutdown, RESUBSCRIBE_DELAY).await {
                break;
            }
        }
        tracing::info!("Live feed stopped");
    }
}

async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        _ = tokio::time::sleep(delay) => false,
    }
}
