// Copyright 2024 Gigi Team.
//
// Shared fixtures for the inbox sync tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use inbox_store::{
    BackendError, Conversation, ConversationKind, ConversationRecord, InboxBackend, Message,
    MessageQuery, NewConversation, NewMessage, NewParticipant, Participant, ParticipantRole,
    Profile, StoreBackend, StoreConfig,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

pub const TENANT: &str = "t1";

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// A migrated SQLite store in a temp file
pub struct TestStore {
    pub store: Arc<StoreBackend>,
    pub backend: Arc<FlakyBackend>,
    _file: NamedTempFile,
}

impl TestStore {
    pub async fn new() -> Self {
        let file = NamedTempFile::new().unwrap();
        let config = StoreConfig {
            db_path: file.path().to_path_buf(),
            ..Default::default()
        };
        let store = Arc::new(
            StoreBackend::open(&config)
                .await
                .expect("Failed to open store backend"),
        );
        Self {
            backend: Arc::new(FlakyBackend::new(store.clone())),
            store,
            _file: file,
        }
    }

    /// Conversation with `members`; the first member is the admin
    pub async fn conversation(&self, kind: ConversationKind, members: &[&str]) -> Conversation {
        let conversation = self
            .store
            .insert_conversation(&NewConversation {
                tenant_id: TENANT.to_string(),
                kind,
                site_id: None,
                name: None,
            })
            .await
            .expect("Failed to insert conversation");

        let rows: Vec<NewParticipant> = members
            .iter()
            .enumerate()
            .map(|(i, user_id)| NewParticipant {
                conversation_id: conversation.id.clone(),
                user_id: user_id.to_string(),
                role: if i == 0 {
                    ParticipantRole::Admin
                } else {
                    ParticipantRole::Member
                },
            })
            .collect();
        self.store
            .insert_participants(&rows)
            .await
            .expect("Failed to insert participants");

        conversation
    }

    pub async fn message(&self, conversation_id: &str, sender: &str, secs: i64) -> Message {
        self.store
            .append_message(NewMessage {
                conversation_id: conversation_id.to_string(),
                sender_id: sender.to_string(),
                body: format!("hello from {} at {}", sender, secs),
                created_at: Some(at(secs)),
            })
            .await
            .expect("Failed to append message")
    }

    pub async fn profile(&self, user_id: &str, display_name: Option<&str>, email: Option<&str>) {
        self.store
            .upsert_profile(&Profile {
                user_id: user_id.to_string(),
                display_name: display_name.map(str::to_string),
                email: email.map(str::to_string),
            })
            .await
            .expect("Failed to upsert profile");
    }

    /// Every non-archived direct conversation of `user_id`, unbounded
    pub async fn direct_rows(&self, user_id: &str) -> Vec<ConversationRecord> {
        self.store
            .fetch_recent_direct_conversations(TENANT, user_id, 1000)
            .await
            .unwrap()
    }
}

/// Wraps the SQLite backend to inject failures and count calls
pub struct FlakyBackend {
    inner: Arc<StoreBackend>,
    calls: Mutex<HashMap<&'static str, usize>>,
    pub unavailable: AtomicBool,
    pub transient: AtomicBool,
    pub fail_profiles: AtomicBool,
    /// Reject any participant batch containing this user, writing nothing
    reject_participant: Mutex<Option<String>>,
    pub fail_archive: AtomicBool,
    pub fail_delete: AtomicBool,
}

impl FlakyBackend {
    pub fn new(inner: Arc<StoreBackend>) -> Self {
        Self {
            inner,
            calls: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
            transient: AtomicBool::new(false),
            fail_profiles: AtomicBool::new(false),
            reject_participant: Mutex::new(None),
            fail_archive: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
        }
    }

    pub fn calls(&self, method: &str) -> usize {
        self.calls.lock().get(method).copied().unwrap_or(0)
    }

    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn reject_participant(&self, user_id: Option<&str>) {
        *self.reject_participant.lock() = user_id.map(str::to_string);
    }

    pub fn set(flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }

    fn enter(&self, method: &'static str) -> Result<(), BackendError> {
        *self.calls.lock().entry(method).or_insert(0) += 1;
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable(
                "relation \"conversations\" does not exist".to_string(),
            ));
        }
        if self.transient.load(Ordering::SeqCst) {
            return Err(BackendError::Transient("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl InboxBackend for FlakyBackend {
    async fn fetch_active_conversations(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Vec<ConversationRecord>, BackendError> {
        self.enter("fetch_active_conversations")?;
        self.inner.fetch_active_conversations(tenant_id, user_id).await
    }

    async fn fetch_recent_direct_conversations(
        &self,
        tenant_id: &str,
        user_id: &str,
        limit: u64,
    ) -> Result<Vec<ConversationRecord>, BackendError> {
        self.enter("fetch_recent_direct_conversations")?;
        self.inner
            .fetch_recent_direct_conversations(tenant_id, user_id, limit)
            .await
    }

    async fn fetch_profiles(&self, user_ids: &[String]) -> Result<Vec<Profile>, BackendError> {
        self.enter("fetch_profiles")?;
        if self.fail_profiles.load(Ordering::SeqCst) {
            return Err(BackendError::Query {
                message: "profiles lookup timed out".to_string(),
                code: None,
            });
        }
        self.inner.fetch_profiles(user_ids).await
    }

    async fn fetch_messages(&self, query: &MessageQuery) -> Result<Vec<Message>, BackendError> {
        self.enter("fetch_messages")?;
        self.inner.fetch_messages(query).await
    }

    async fn fetch_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Option<Participant>, BackendError> {
        self.enter("fetch_participant")?;
        self.inner.fetch_participant(conversation_id, user_id).await
    }

    async fn insert_conversation(
        &self,
        new: &NewConversation,
    ) -> Result<Conversation, BackendError> {
        self.enter("insert_conversation")?;
        self.inner.insert_conversation(new).await
    }

    async fn insert_participants(
        &self,
        rows: &[NewParticipant],
    ) -> Result<Vec<Participant>, BackendError> {
        self.enter("insert_participants")?;
        let rejected = self.reject_participant.lock().clone();
        if let Some(user_id) = rejected {
            if rows.iter().any(|r| r.user_id == user_id) {
                return Err(BackendError::Query {
                    message: format!("participant insert rejected for {}", user_id),
                    code: Some("foreign_key_violation".to_string()),
                });
            }
        }
        self.inner.insert_participants(rows).await
    }

    async fn set_archived(
        &self,
        conversation_id: &str,
        archived_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Conversation>, BackendError> {
        self.enter("set_archived")?;
        if self.fail_archive.load(Ordering::SeqCst) {
            return Err(BackendError::Transient("statement timeout".to_string()));
        }
        self.inner.set_archived(conversation_id, archived_at).await
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<bool, BackendError> {
        self.enter("delete_conversation")?;
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(BackendError::Query {
                message: "permission check failed".to_string(),
                code: Some("42501".to_string()),
            });
        }
        self.inner.delete_conversation(conversation_id).await
    }

    async fn update_read_cursor(
        &self,
        conversation_id: &str,
        user_id: &str,
        read_at: DateTime<Utc>,
        message_id: Option<String>,
    ) -> Result<Option<Participant>, BackendError> {
        self.enter("update_read_cursor")?;
        self.inner
            .update_read_cursor(conversation_id, user_id, read_at, message_id)
            .await
    }
}

/// Poll `check` until it holds or five seconds pass
pub async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        if tokio::time::Instant::now() > deadline {
            panic!("Timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
