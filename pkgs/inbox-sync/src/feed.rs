use futures::StreamExt;
use inbox_store::{ChangeEvent, ChangeFeed, EntityKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Entities the inbox listens to
pub const WATCHED_ENTITIES: [EntityKind; 2] = [EntityKind::Conversation, EntityKind::Participant];

/// Keeps one live subscription to the change feed and forwards every event
///
/// When the stream ends or cannot be opened, the old subscription is dropped
/// and a new one is opened after `resubscribe_delay`. At most one
/// subscription is open at any time.
pub struct ChangeFeedListener {
    feed: Arc<dyn ChangeFeed>,
    tenant_id: String,
    resubscribe_delay: Duration,
}

impl ChangeFeedListener {
    pub fn new(feed: Arc<dyn ChangeFeed>, tenant_id: String, resubscribe_delay: Duration) -> Self {
        Self {
            feed,
            tenant_id,
            resubscribe_delay,
        }
    }

    pub async fn run(self, events: mpsc::UnboundedSender<ChangeEvent>, cancel: CancellationToken) {
        let mut attempts: u64 = 0;

        loop {
            attempts += 1;
            match self.feed.subscribe(&self.tenant_id, &WATCHED_ENTITIES).await {
                Ok(mut stream) => {
                    info!(
                        "Subscribed to {} for tenant {} (attempt {})",
                        channels(),
                        self.tenant_id,
                        attempts
                    );
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            next = stream.next() => match next {
                                Some(event) => {
                                    if events.send(event).is_err() {
                                        debug!("Event receiver gone, stopping listener");
                                        return;
                                    }
                                }
                                None => break,
                            },
                        }
                    }
                    warn!(
                        "Change feed for tenant {} closed, resubscribing in {:?}",
                        self.tenant_id, self.resubscribe_delay
                    );
                }
                Err(e) => {
                    warn!(
                        "Change feed subscription for tenant {} failed: {}",
                        self.tenant_id, e
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.resubscribe_delay) => {}
            }
        }
    }
}

fn channels() -> String {
    WATCHED_ENTITIES
        .iter()
        .map(EntityKind::channel)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channels_name_watched_tables() {
        assert_eq!(channels(), "conversations, conversation_participants");
    }
}
