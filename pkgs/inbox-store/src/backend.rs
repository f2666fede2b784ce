//! Query and subscription interfaces consumed by the sync engine, and the
//! SQLite-backed implementation of both

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::conversation_store::ConversationStore;
use crate::error::BackendError;
use crate::events::{ChangeEvent, ChangeHub, ChangeOp, EntityKind};
use crate::message_store::MessageStore;
use crate::models::{
    Conversation, ConversationRecord, Message, MessageQuery, NewConversation, NewMessage,
    NewParticipant, Participant, Profile,
};
use crate::participant_store::ParticipantStore;
use crate::profile_store::ProfileStore;
use crate::StoreConfig;

/// Query interface to the backing store
#[async_trait]
pub trait InboxBackend: Send + Sync {
    /// Non-archived conversations where `user_id` is an active participant,
    /// with all participant rows
    async fn fetch_active_conversations(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Vec<ConversationRecord>, BackendError>;

    /// Up to `limit` most recent non-archived direct conversations of `user_id`
    async fn fetch_recent_direct_conversations(
        &self,
        tenant_id: &str,
        user_id: &str,
        limit: u64,
    ) -> Result<Vec<ConversationRecord>, BackendError>;

    async fn fetch_profiles(&self, user_ids: &[String]) -> Result<Vec<Profile>, BackendError>;

    /// Non-deleted messages, newest first
    async fn fetch_messages(&self, query: &MessageQuery) -> Result<Vec<Message>, BackendError>;

    async fn fetch_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Option<Participant>, BackendError>;

    async fn insert_conversation(
        &self,
        new: &NewConversation,
    ) -> Result<Conversation, BackendError>;

    async fn insert_participants(
        &self,
        rows: &[NewParticipant],
    ) -> Result<Vec<Participant>, BackendError>;

    /// Set (`Some`) or clear (`None`) the archival timestamp. `Ok(None)` when
    /// no such conversation exists.
    async fn set_archived(
        &self,
        conversation_id: &str,
        archived_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Conversation>, BackendError>;

    /// Hard delete; `Ok(false)` when nothing was deleted
    async fn delete_conversation(&self, conversation_id: &str) -> Result<bool, BackendError>;

    async fn update_read_cursor(
        &self,
        conversation_id: &str,
        user_id: &str,
        read_at: DateTime<Utc>,
        message_id: Option<String>,
    ) -> Result<Option<Participant>, BackendError>;
}

/// Live change notifications, scoped to a tenant
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(
        &self,
        tenant_id: &str,
        entities: &[EntityKind],
    ) -> Result<BoxStream<'static, ChangeEvent>, BackendError>;
}

/// SQLite backend that publishes a change event for every write it performs
pub struct StoreBackend {
    conversations: ConversationStore,
    participants: ParticipantStore,
    messages: MessageStore,
    profiles: ProfileStore,
    hub: Arc<ChangeHub>,
}

impl StoreBackend {
    /// Open (creating if needed) the database and run migrations
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        let db_path_str = config
            .db_path
            .to_str()
            .context("Invalid database path")?
            .replace("\\", "/");

        let db_url = format!("sqlite:{}?mode=rwc", db_path_str);

        let mut options = ConnectOptions::new(db_url);
        options.sqlx_logging(false);
        let db: DatabaseConnection = Database::connect(options)
            .await
            .context("Failed to connect to database")?;

        crate::migration::Migrator::up(&db, None)
            .await
            .context("Failed to run migrations")?;

        info!("Inbox store initialized at {}", config.db_path.display());

        Ok(Self::with_connection(
            db,
            Arc::new(ChangeHub::new(config.feed_capacity)),
        ))
    }

    /// Wrap an existing connection; no migrations are run
    pub fn with_connection(db: DatabaseConnection, hub: Arc<ChangeHub>) -> Self {
        Self {
            conversations: ConversationStore::new(db.clone()),
            participants: ParticipantStore::new(db.clone()),
            messages: MessageStore::new(db.clone()),
            profiles: ProfileStore::new(db),
            hub,
        }
    }

    pub fn hub(&self) -> &Arc<ChangeHub> {
        &self.hub
    }

    /// Store a message and bump its conversation's last activity
    pub async fn append_message(&self, new: NewMessage) -> Result<Message, BackendError> {
        let message = self.messages.append(new).await?;
        if let Some(conversation) = self
            .conversations
            .touch(&message.conversation_id, message.created_at)
            .await?
        {
            self.publish_conversation(ChangeOp::Update, &conversation);
        }
        Ok(message)
    }

    /// Soft-delete a message
    pub async fn delete_message(&self, message_id: &str) -> Result<bool, BackendError> {
        let Some(message) = self.messages.soft_delete(message_id, Utc::now()).await? else {
            return Ok(false);
        };
        if let Some(conversation) = self.conversations.get(&message.conversation_id).await? {
            self.publish_conversation(ChangeOp::Update, &conversation);
        }
        Ok(true)
    }

    pub async fn upsert_profile(&self, profile: &Profile) -> Result<(), BackendError> {
        self.profiles.upsert(profile).await
    }

    /// Mark a participant as having left
    pub async fn leave_conversation(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<bool, BackendError> {
        let Some(participant) = self
            .participants
            .leave(conversation_id, user_id, Utc::now())
            .await?
        else {
            return Ok(false);
        };
        self.publish_participants(ChangeOp::Update, std::slice::from_ref(&participant))
            .await;
        Ok(true)
    }

    fn publish_conversation(&self, op: ChangeOp, conversation: &Conversation) {
        self.hub.publish(
            &conversation.tenant_id,
            ChangeEvent::new(EntityKind::Conversation, op, conversation),
        );
    }

    async fn publish_participants(&self, op: ChangeOp, participants: &[Participant]) {
        let Some(first) = participants.first() else {
            return;
        };
        // Participant rows carry no tenant, so resolve it from the conversation
        let tenant_id = match self.conversations.get(&first.conversation_id).await {
            Ok(Some(conversation)) => conversation.tenant_id,
            Ok(None) => return,
            Err(e) => {
                warn!(
                    "Could not resolve tenant for conversation {}: {}",
                    first.conversation_id, e
                );
                return;
            }
        };
        for participant in participants {
            self.hub.publish(
                &tenant_id,
                ChangeEvent::new(EntityKind::Participant, op, participant),
            );
        }
    }
}

#[async_trait]
impl InboxBackend for StoreBackend {
    async fn fetch_active_conversations(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Vec<ConversationRecord>, BackendError> {
        self.conversations.active_for_user(tenant_id, user_id).await
    }

    async fn fetch_recent_direct_conversations(
        &self,
        tenant_id: &str,
        user_id: &str,
        limit: u64,
    ) -> Result<Vec<ConversationRecord>, BackendError> {
        self.conversations
            .recent_direct_for_user(tenant_id, user_id, limit)
            .await
    }

    async fn fetch_profiles(&self, user_ids: &[String]) -> Result<Vec<Profile>, BackendError> {
        self.profiles.by_ids(user_ids).await
    }

    async fn fetch_messages(&self, query: &MessageQuery) -> Result<Vec<Message>, BackendError> {
        self.messages.batch(query).await
    }

    async fn fetch_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Option<Participant>, BackendError> {
        self.participants.get(conversation_id, user_id).await
    }

    async fn insert_conversation(
        &self,
        new: &NewConversation,
    ) -> Result<Conversation, BackendError> {
        let conversation = self.conversations.insert(new, Utc::now()).await?;
        self.publish_conversation(ChangeOp::Insert, &conversation);
        Ok(conversation)
    }

    async fn insert_participants(
        &self,
        rows: &[NewParticipant],
    ) -> Result<Vec<Participant>, BackendError> {
        let participants = self.participants.insert_many(rows, Utc::now()).await?;
        self.publish_participants(ChangeOp::Insert, &participants)
            .await;
        Ok(participants)
    }

    async fn set_archived(
        &self,
        conversation_id: &str,
        archived_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Conversation>, BackendError> {
        let conversation = self
            .conversations
            .set_archived(conversation_id, archived_at)
            .await?;
        if let Some(conversation) = &conversation {
            self.publish_conversation(ChangeOp::Update, conversation);
        }
        Ok(conversation)
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<bool, BackendError> {
        match self.conversations.delete(conversation_id).await? {
            Some(conversation) => {
                self.publish_conversation(ChangeOp::Delete, &conversation);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_read_cursor(
        &self,
        conversation_id: &str,
        user_id: &str,
        read_at: DateTime<Utc>,
        message_id: Option<String>,
    ) -> Result<Option<Participant>, BackendError> {
        let participant = self
            .participants
            .update_read_cursor(conversation_id, user_id, read_at, message_id)
            .await?;
        if let Some(participant) = &participant {
            self.publish_participants(ChangeOp::Update, std::slice::from_ref(participant))
                .await;
        }
        Ok(participant)
    }
}

#[async_trait]
impl ChangeFeed for StoreBackend {
    async fn subscribe(
        &self,
        tenant_id: &str,
        entities: &[EntityKind],
    ) -> Result<BoxStream<'static, ChangeEvent>, BackendError> {
        self.hub.subscribe(tenant_id, entities)
    }
}

#[async_trait]
impl ChangeFeed for ChangeHub {
    async fn subscribe(
        &self,
        tenant_id: &str,
        entities: &[EntityKind],
    ) -> Result<BoxStream<'static, ChangeEvent>, BackendError> {
        ChangeHub::subscribe(self, tenant_id, entities)
    }
}
