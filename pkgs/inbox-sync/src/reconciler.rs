//! Rebuilds the read model from the backend in a fixed number of queries

use inbox_store::{BackendError, ConversationRecord, InboxBackend, Message, MessageQuery};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::enricher::{ParticipantEnricher, ProfileIndex};
use crate::error::InboxError;
use crate::models::{LoadOptions, ReadModelEntry};
use crate::read_model::ConversationReadModel;
use crate::unread::count_unread;

pub struct BatchReconciler {
    backend: Arc<dyn InboxBackend>,
    enricher: ParticipantEnricher,
    read_model: Arc<ConversationReadModel>,
    tenant_id: String,
    user_id: String,
    /// Held for the duration of a pass
    pass_lock: Mutex<()>,
    passes: AtomicU64,
}

impl BatchReconciler {
    pub fn new(
        backend: Arc<dyn InboxBackend>,
        read_model: Arc<ConversationReadModel>,
        tenant_id: String,
        user_id: String,
    ) -> Self {
        Self {
            enricher: ParticipantEnricher::new(backend.clone()),
            backend,
            read_model,
            tenant_id,
            user_id,
            pass_lock: Mutex::new(()),
            passes: AtomicU64::new(0),
        }
    }

    /// Number of passes started so far
    pub fn passes(&self) -> u64 {
        self.passes.load(AtomicOrdering::SeqCst)
    }

    /// Run one full pass and swap the result into the read model.
    ///
    /// An unavailable feature yields an empty list. Any other backend failure
    /// leaves the read model as it was and is returned to the caller.
    pub async fn reload(&self, options: LoadOptions) -> Result<Arc<Vec<ReadModelEntry>>, InboxError> {
        let _pass = self.pass_lock.lock().await;
        let pass = self.passes.fetch_add(1, AtomicOrdering::SeqCst) + 1;

        let previous = self.read_model.state();
        if !options.silent {
            self.read_model.set_loading();
        }

        match self.build().await {
            Ok(entries) => {
                debug!(
                    "Reconcile pass {} for user {}: {} conversations",
                    pass,
                    self.user_id,
                    entries.len()
                );
                Ok(self.read_model.finish_pass(entries))
            }
            Err(e) if e.is_unavailable() => {
                info!(
                    "Messaging unavailable for tenant {}, showing empty inbox: {}",
                    self.tenant_id, e
                );
                Ok(self.read_model.finish_pass(Vec::new()))
            }
            Err(e) => {
                let err = InboxError::from(e);
                error!("Reconcile pass {} failed: {}", pass, err);
                self.read_model.fail_pass(previous, err.clone());
                Err(err)
            }
        }
    }

    async fn build(&self) -> Result<Vec<ReadModelEntry>, BackendError> {
        let records = self
            .backend
            .fetch_active_conversations(&self.tenant_id, &self.user_id)
            .await?;
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let profiles = self.enricher.index(&records).await;

        let conversation_ids: Vec<String> = records
            .iter()
            .map(|r| r.conversation.id.clone())
            .collect();

        let messages = self
            .backend
            .fetch_messages(&MessageQuery {
                conversation_ids: conversation_ids.clone(),
                exclude_sender: None,
            })
            .await?;

        let foreign = self
            .backend
            .fetch_messages(&MessageQuery {
                conversation_ids,
                exclude_sender: Some(self.user_id.clone()),
            })
            .await?;

        Ok(assemble(&self.user_id, records, &profiles, messages, foreign))
    }
}

/// Join the batched query results into sorted read model entries.
///
/// `messages` must be newest first; the first message seen for a
/// conversation is taken as its last message.
pub fn assemble(
    user_id: &str,
    records: Vec<ConversationRecord>,
    profiles: &ProfileIndex,
    messages: Vec<Message>,
    foreign: Vec<Message>,
) -> Vec<ReadModelEntry> {
    let mut last_messages: HashMap<String, Message> = HashMap::new();
    for message in messages {
        last_messages
            .entry(message.conversation_id.clone())
            .or_insert(message);
    }

    let mut candidates: HashMap<String, Vec<Message>> = HashMap::new();
    for message in foreign {
        candidates
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message);
    }

    let mut entries: Vec<ReadModelEntry> = records
        .into_iter()
        .map(|record| {
            let id = &record.conversation.id;
            let last_message = last_messages.remove(id);
            let unread_count = count_unread(
                user_id,
                last_message.as_ref(),
                record.participant(user_id),
                candidates.get(id).map(Vec::as_slice).unwrap_or(&[]),
            );
            ReadModelEntry {
                participants: profiles.enrich(&record.participants),
                conversation: record.conversation,
                last_message,
                unread_count,
            }
        })
        .collect();

    sort_entries(&mut entries);
    entries
}

/// Most recent activity first, entries without any activity last
pub fn sort_entries(entries: &mut [ReadModelEntry]) {
    entries.sort_by(|a, b| {
        let by_activity = match (a.activity_at(), b.activity_at()) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_activity.then_with(|| a.id().cmp(b.id()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use inbox_store::{
        Conversation, ConversationKind, Participant, ParticipantRole, Profile, ReadCursor,
    };

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn record(id: &str, activity: Option<i64>, users: &[&str]) -> ConversationRecord {
        ConversationRecord {
            conversation: Conversation {
                id: id.to_string(),
                kind: ConversationKind::Group,
                tenant_id: "t1".to_string(),
                site_id: None,
                name: None,
                created_at: at(0),
                last_activity_at: activity.map(at),
                archived_at: None,
            },
            participants: users
                .iter()
                .map(|u| Participant {
                    conversation_id: id.to_string(),
                    user_id: u.to_string(),
                    role: ParticipantRole::Member,
                    joined_at: at(0),
                    left_at: None,
                    cursor: ReadCursor::default(),
                })
                .collect(),
        }
    }

    fn message(id: &str, conversation_id: &str, sender: &str, secs: i64) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender.to_string(),
            body: String::new(),
            created_at: at(secs),
            deleted_at: None,
        }
    }

    #[test]
    fn test_assemble_picks_first_message_and_counts_foreign_only() {
        let records = vec![record("c1", Some(5), &["u", "v"])];
        let messages = vec![
            message("m3", "c1", "u", 30),
            message("m2", "c1", "v", 20),
            message("m1", "c1", "v", 10),
        ];
        let foreign: Vec<Message> = messages
            .iter()
            .filter(|m| m.sender_id != "u")
            .cloned()
            .collect();

        let entries = assemble("u", records, &ProfileIndex::default(), messages, foreign);

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].last_message.as_ref().unwrap().id, "m3");
        assert_eq!(entries[0].unread_count, 2);
        assert_eq!(entries[0].activity_at(), Some(at(30)));
    }

    #[test]
    fn test_sort_uses_messages_then_activity_with_nulls_last() {
        let records = vec![
            record("quiet", None, &["u"]),
            record("old", Some(1), &["u"]),
            record("busy", Some(2), &["u"]),
            record("new", Some(50), &["u"]),
        ];
        let messages = vec![message("m1", "busy", "u", 100)];

        let entries = assemble("u", records, &ProfileIndex::default(), messages, vec![]);
        let order: Vec<&str> = entries.iter().map(|e| e.id()).collect();

        assert_eq!(order, vec!["busy", "new", "old", "quiet"]);
    }

    #[test]
    fn test_sort_ties_break_on_id() {
        let mut entries = assemble(
            "u",
            vec![record("b", Some(1), &["u"]), record("a", Some(1), &["u"])],
            &ProfileIndex::default(),
            vec![],
            vec![],
        );
        sort_entries(&mut entries);
        assert_eq!(entries[0].id(), "a");
        assert_eq!(entries[1].id(), "b");
    }

    #[test]
    fn test_assemble_attaches_profiles() {
        let profiles = ProfileIndex::from_profiles(vec![Profile {
            user_id: "v".to_string(),
            display_name: None,
            email: Some("v@example.com".to_string()),
        }]);

        let entries = assemble(
            "u",
            vec![record("c1", Some(1), &["u", "v"])],
            &profiles,
            vec![],
            vec![],
        );

        let v = &entries[0].participants[1];
        assert_eq!(v.user_id(), "v");
        assert_eq!(v.profile.as_ref().and_then(|p| p.label()), Some("v@example.com"));
        assert_eq!(entries[0].unread_count, 0);
    }
}
