//! Row-level change events and the in-process hub that publishes them

use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::BackendError;

/// Entity classes carried by the change feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Conversation,
    Participant,
}

impl EntityKind {
    /// Channel name, as keyed by the feed
    pub fn channel(&self) -> &'static str {
        match self {
            Self::Conversation => "conversations",
            Self::Participant => "conversation_participants",
        }
    }
}

/// Row operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// A single row-level change notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub entity: EntityKind,
    pub op: ChangeOp,
    pub payload: serde_json::Value,
}

impl ChangeEvent {
    pub fn new<T: Serialize>(entity: EntityKind, op: ChangeOp, row: &T) -> Self {
        Self {
            entity,
            op,
            payload: serde_json::to_value(row).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
struct Envelope {
    tenant_id: String,
    event: ChangeEvent,
}

/// Broadcast hub for change events, scoped per tenant on subscription
///
/// `disconnect` swaps the underlying channel so every open stream ends, which
/// is how a dropped realtime connection looks to subscribers.
pub struct ChangeHub {
    sender: RwLock<broadcast::Sender<Envelope>>,
    capacity: usize,
    available: AtomicBool,
}

impl ChangeHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: RwLock::new(sender),
            capacity: capacity.max(1),
            available: AtomicBool::new(true),
        }
    }

    /// Publish an event to every subscriber of `tenant_id`
    pub fn publish(&self, tenant_id: &str, event: ChangeEvent) {
        debug!(
            "Publishing {:?} {:?} for tenant {}",
            event.entity, event.op, tenant_id
        );
        // No subscribers is not an error
        let _ = self.sender.read().send(Envelope {
            tenant_id: tenant_id.to_string(),
            event,
        });
    }

    /// Open a stream of events for one tenant, limited to `entities`
    pub fn subscribe(
        &self,
        tenant_id: &str,
        entities: &[EntityKind],
    ) -> Result<BoxStream<'static, ChangeEvent>, BackendError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(BackendError::FeedUnavailable);
        }

        let receiver = self.sender.read().subscribe();
        let tenant_id = tenant_id.to_string();
        let entities = entities.to_vec();

        let stream = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(envelope) => return Some((envelope, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Newer events are still buffered, so subscribers see activity
                        warn!("Change feed lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .filter_map(move |envelope| {
            let keep = envelope.tenant_id == tenant_id && entities.contains(&envelope.event.entity);
            futures::future::ready(keep.then_some(envelope.event))
        });

        Ok(stream.boxed())
    }

    /// End every open subscription
    pub fn disconnect(&self) {
        let (sender, _) = broadcast::channel(self.capacity);
        *self.sender.write() = sender;
        warn!("Change feed connections dropped");
    }

    /// Toggle whether new subscriptions are accepted
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of open subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.sender.read().receiver_count()
    }
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscription_is_tenant_and_entity_scoped() {
        let hub = ChangeHub::new(16);
        let mut stream = hub
            .subscribe("tenant-a", &[EntityKind::Participant])
            .unwrap();

        hub.publish(
            "tenant-b",
            ChangeEvent::new(EntityKind::Participant, ChangeOp::Insert, &json!({})),
        );
        hub.publish(
            "tenant-a",
            ChangeEvent::new(EntityKind::Conversation, ChangeOp::Insert, &json!({})),
        );
        hub.publish(
            "tenant-a",
            ChangeEvent::new(EntityKind::Participant, ChangeOp::Update, &json!({"n": 1})),
        );

        let event = stream.next().await.unwrap();
        assert_eq!(event.entity, EntityKind::Participant);
        assert_eq!(event.op, ChangeOp::Update);
        assert_eq!(event.payload["n"], 1);
    }

    #[tokio::test]
    async fn test_disconnect_ends_open_streams() {
        let hub = ChangeHub::new(16);
        let mut stream = hub
            .subscribe("tenant-a", &[EntityKind::Conversation])
            .unwrap();
        assert_eq!(hub.subscriber_count(), 1);

        hub.disconnect();
        assert!(stream.next().await.is_none());
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_unavailable_hub_rejects_subscriptions() {
        let hub = ChangeHub::default();
        hub.set_available(false);
        assert_eq!(
            hub.subscribe("tenant-a", &[EntityKind::Conversation]).err(),
            Some(BackendError::FeedUnavailable)
        );
    }
}
