//! Conversation store - conversation rows and their participant sets

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Query, SelectStatement};
use sea_orm::*;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::entities::{conversation_participants, conversations, messages};
use crate::error::BackendError;
use crate::models::{Conversation, ConversationKind, ConversationRecord, NewConversation, Participant};

/// Conversation store
pub struct ConversationStore {
    pub(crate) db: DatabaseConnection,
}

impl ConversationStore {
    /// Create a conversation store with an existing database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Non-archived conversations of a tenant in which `user_id` is an
    /// active participant, each with every one of its participant rows
    pub async fn active_for_user(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Vec<ConversationRecord>, BackendError> {
        let rows = conversations::Entity::find()
            .filter(conversations::Column::TenantId.eq(tenant_id))
            .filter(conversations::Column::ArchivedAt.is_null())
            .filter(conversations::Column::Id.in_subquery(active_memberships(user_id)))
            .find_with_related(conversation_participants::Entity)
            .all(&self.db)
            .await?;

        debug!(
            "Loaded {} active conversations for {} in {}",
            rows.len(),
            user_id,
            tenant_id
        );

        rows.into_iter()
            .map(|(conversation, participants)| to_record(conversation, participants))
            .collect()
    }

    /// Most recent non-archived direct conversations that `user_id` is in,
    /// newest first, at most `limit` of them
    pub async fn recent_direct_for_user(
        &self,
        tenant_id: &str,
        user_id: &str,
        limit: u64,
    ) -> Result<Vec<ConversationRecord>, BackendError> {
        let convs = conversations::Entity::find()
            .filter(conversations::Column::TenantId.eq(tenant_id))
            .filter(conversations::Column::Kind.eq(ConversationKind::Direct.as_str()))
            .filter(conversations::Column::ArchivedAt.is_null())
            .filter(conversations::Column::Id.in_subquery(active_memberships(user_id)))
            .order_by_desc(conversations::Column::CreatedAt)
            .order_by_desc(conversations::Column::Id)
            .limit(limit)
            .all(&self.db)
            .await?;

        if convs.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = convs.iter().map(|c| c.id.clone()).collect();
        let mut by_conversation: HashMap<String, Vec<conversation_participants::Model>> =
            HashMap::new();
        for row in conversation_participants::Entity::find()
            .filter(conversation_participants::Column::ConversationId.is_in(ids))
            .all(&self.db)
            .await?
        {
            by_conversation
                .entry(row.conversation_id.clone())
                .or_default()
                .push(row);
        }

        convs
            .into_iter()
            .map(|c| {
                let participants = by_conversation.remove(&c.id).unwrap_or_default();
                to_record(c, participants)
            })
            .collect()
    }

    /// Get a single conversation by ID
    pub async fn get(&self, id: &str) -> Result<Option<Conversation>, BackendError> {
        conversations::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?
            .map(Conversation::try_from)
            .transpose()
    }

    /// Insert a new conversation row
    pub async fn insert(
        &self,
        new: &NewConversation,
        now: DateTime<Utc>,
    ) -> Result<Conversation, BackendError> {
        let now = now.timestamp_millis();
        let model = conversations::Model {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: new.tenant_id.clone(),
            kind: new.kind.as_str().to_string(),
            site_id: new.site_id.clone(),
            name: new.name.clone(),
            created_at: now,
            last_activity_at: Some(now),
            archived_at: None,
        };

        conversations::Entity::insert(conversations::ActiveModel::from(model.clone()))
            .exec_without_returning(&self.db)
            .await?;

        info!("Created {} conversation {}", new.kind, model.id);
        Conversation::try_from(model)
    }

    /// Set or clear the archival timestamp
    pub async fn set_archived(
        &self,
        id: &str,
        archived_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Conversation>, BackendError> {
        let Some(model) = conversations::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };

        let mut active: conversations::ActiveModel = model.into();
        active.archived_at = Set(archived_at.map(|t| t.timestamp_millis()));
        let updated = active.update(&self.db).await?;

        info!(
            "Conversation {} {}",
            id,
            if archived_at.is_some() { "archived" } else { "unarchived" }
        );
        Conversation::try_from(updated).map(Some)
    }

    /// Advance the last-activity timestamp, never moving it backwards
    pub async fn touch(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Conversation>, BackendError> {
        let Some(model) = conversations::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };

        let at = at.timestamp_millis();
        if model.last_activity_at.is_some_and(|t| t >= at) {
            return Conversation::try_from(model).map(Some);
        }

        let mut active: conversations::ActiveModel = model.into();
        active.last_activity_at = Set(Some(at));
        let updated = active.update(&self.db).await?;
        Conversation::try_from(updated).map(Some)
    }

    /// Hard-delete a conversation with its participants and messages
    pub async fn delete(&self, id: &str) -> Result<Option<Conversation>, BackendError> {
        let txn = self.db.begin().await?;

        let Some(model) = conversations::Entity::find_by_id(id.to_string())
            .one(&txn)
            .await?
        else {
            return Ok(None);
        };

        messages::Entity::delete_many()
            .filter(messages::Column::ConversationId.eq(id))
            .exec(&txn)
            .await?;
        conversation_participants::Entity::delete_many()
            .filter(conversation_participants::Column::ConversationId.eq(id))
            .exec(&txn)
            .await?;
        conversations::Entity::delete_by_id(id.to_string())
            .exec(&txn)
            .await?;

        txn.commit().await?;

        info!("Deleted conversation {}", id);
        Conversation::try_from(model).map(Some)
    }
}

/// Conversation ids where `user_id` has a participant row without a leave time
fn active_memberships(user_id: &str) -> SelectStatement {
    Query::select()
        .column(conversation_participants::Column::ConversationId)
        .from(conversation_participants::Entity)
        .and_where(conversation_participants::Column::UserId.eq(user_id))
        .and_where(conversation_participants::Column::LeftAt.is_null())
        .to_owned()
}

fn to_record(
    conversation: conversations::Model,
    participants: Vec<conversation_participants::Model>,
) -> Result<ConversationRecord, BackendError> {
    let mut participants = participants
        .into_iter()
        .map(Participant::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    participants.sort_by(|a, b| {
        a.joined_at
            .cmp(&b.joined_at)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });

    Ok(ConversationRecord {
        conversation: Conversation::try_from(conversation)?,
        participants,
    })
}
