//! In-memory conversation list for one session

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::error::InboxError;
use crate::models::{InboxStatus, ReadModelEntry, SyncState};

struct Lists {
    committed: Arc<Vec<ReadModelEntry>>,
    /// Optimistic view while a removal is waiting on the backend
    tentative: Option<Arc<Vec<ReadModelEntry>>>,
}

/// The session's read model
///
/// Readers always get a whole immutable list. Replacement swaps the list
/// under a write lock, so nobody observes a half-updated state.
pub struct ConversationReadModel {
    lists: RwLock<Lists>,
    status: watch::Sender<InboxStatus>,
}

impl ConversationReadModel {
    pub fn new() -> Self {
        let (status, _) = watch::channel(InboxStatus::default());
        Self {
            lists: RwLock::new(Lists {
                committed: Arc::new(Vec::new()),
                tentative: None,
            }),
            status,
        }
    }

    /// Current list, including any pending optimistic removal
    pub fn snapshot(&self) -> Arc<Vec<ReadModelEntry>> {
        let lists = self.lists.read();
        lists
            .tentative
            .as_ref()
            .unwrap_or(&lists.committed)
            .clone()
    }

    pub fn get(&self, conversation_id: &str) -> Option<ReadModelEntry> {
        self.snapshot()
            .iter()
            .find(|e| e.id() == conversation_id)
            .cloned()
    }

    pub fn total_unread(&self) -> u64 {
        self.snapshot()
            .iter()
            .map(|e| u64::from(e.unread_count))
            .sum()
    }

    /// Swap in an authoritative list and drop any optimistic view
    pub fn replace(&self, entries: Vec<ReadModelEntry>) -> Arc<Vec<ReadModelEntry>> {
        let entries = Arc::new(entries);
        let mut lists = self.lists.write();
        lists.committed = entries.clone();
        lists.tentative = None;
        entries
    }

    /// Hide a conversation until the backend confirms or [`rollback`] runs.
    ///
    /// Returns false when the conversation was not in the list.
    ///
    /// [`rollback`]: Self::rollback
    pub fn begin_removal(&self, conversation_id: &str) -> bool {
        let mut lists = self.lists.write();
        let current = lists.tentative.as_ref().unwrap_or(&lists.committed);
        if !current.iter().any(|e| e.id() == conversation_id) {
            return false;
        }
        let shadow: Vec<ReadModelEntry> = current
            .iter()
            .filter(|e| e.id() != conversation_id)
            .cloned()
            .collect();
        lists.tentative = Some(Arc::new(shadow));
        true
    }

    /// Restore the last committed list
    pub fn rollback(&self) {
        if self.lists.write().tentative.take().is_some() {
            debug!("Optimistic removal rolled back");
        }
    }

    pub fn status(&self) -> InboxStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<InboxStatus> {
        self.status.subscribe()
    }

    pub fn state(&self) -> SyncState {
        self.status.borrow().state
    }

    pub fn set_loading(&self) {
        self.status.send_modify(|s| s.state = SyncState::Loading);
    }

    /// A change arrived; only a ready list can go stale
    pub fn mark_stale(&self) {
        self.status.send_if_modified(|s| {
            if s.state == SyncState::Ready {
                s.state = SyncState::Stale;
                true
            } else {
                false
            }
        });
    }

    /// Commit the result of a full pass
    pub fn finish_pass(&self, entries: Vec<ReadModelEntry>) -> Arc<Vec<ReadModelEntry>> {
        let entries = self.replace(entries);
        self.status.send_modify(|s| {
            s.state = SyncState::Ready;
            s.last_error = None;
        });
        entries
    }

    /// Record a failed pass; the list is left untouched
    pub fn fail_pass(&self, previous: SyncState, error: InboxError) {
        self.status.send_modify(|s| {
            s.state = previous;
            s.last_error = Some(error);
        });
    }
}

impl Default for ConversationReadModel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use inbox_store::{Conversation, ConversationKind};

    fn entry(id: &str, unread: u32) -> ReadModelEntry {
        let created_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        ReadModelEntry {
            conversation: Conversation {
                id: id.to_string(),
                kind: ConversationKind::Group,
                tenant_id: "t1".to_string(),
                site_id: None,
                name: None,
                created_at,
                last_activity_at: Some(created_at),
                archived_at: None,
            },
            last_message: None,
            unread_count: unread,
            participants: Vec::new(),
        }
    }

    fn ids(model: &ConversationReadModel) -> Vec<String> {
        model.snapshot().iter().map(|e| e.id().to_string()).collect()
    }

    #[test]
    fn test_snapshots_survive_replacement() {
        let model = ConversationReadModel::new();
        model.replace(vec![entry("a", 1)]);
        let before = model.snapshot();

        model.replace(vec![entry("b", 2), entry("c", 3)]);

        assert_eq!(before.len(), 1);
        assert_eq!(ids(&model), vec!["b", "c"]);
        assert_eq!(model.total_unread(), 5);
    }

    #[test]
    fn test_removal_rolls_back_to_committed() {
        let model = ConversationReadModel::new();
        model.replace(vec![entry("a", 1), entry("b", 0)]);

        assert!(model.begin_removal("a"));
        assert_eq!(ids(&model), vec!["b"]);
        assert!(model.get("a").is_none());

        model.rollback();
        assert_eq!(ids(&model), vec!["a", "b"]);
        assert!(!model.begin_removal("missing"));
    }

    #[test]
    fn test_replace_clears_tentative_view() {
        let model = ConversationReadModel::new();
        model.replace(vec![entry("a", 0), entry("b", 0)]);
        assert!(model.begin_removal("a"));

        model.replace(vec![entry("b", 0)]);
        model.rollback();
        assert_eq!(ids(&model), vec!["b"]);
    }

    #[test]
    fn test_state_transitions() {
        let model = ConversationReadModel::new();
        assert_eq!(model.state(), SyncState::Unloaded);

        model.mark_stale();
        assert_eq!(model.state(), SyncState::Unloaded);

        model.set_loading();
        model.finish_pass(vec![entry("a", 0)]);
        assert_eq!(model.state(), SyncState::Ready);

        model.mark_stale();
        assert_eq!(model.state(), SyncState::Stale);

        model.fail_pass(SyncState::Stale, InboxError::Retryable("timeout".to_string()));
        let status = model.status();
        assert_eq!(status.state, SyncState::Stale);
        assert!(status.last_error.is_some());
        assert_eq!(ids(&model), vec!["a"]);

        model.finish_pass(vec![]);
        assert_eq!(
            model.status(),
            InboxStatus {
                state: SyncState::Ready,
                last_error: None,
            }
        );
    }
}
