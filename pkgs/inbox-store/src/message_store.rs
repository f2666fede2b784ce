//! Message store - batched message reads for the read model

use chrono::{DateTime, Utc};
use sea_orm::*;
use tracing::debug;

use crate::entities::messages;
use crate::error::BackendError;
use crate::models::{Message, MessageQuery, NewMessage};

/// Message store
pub struct MessageStore {
    pub(crate) db: DatabaseConnection,
}

impl MessageStore {
    /// Create a message store with an existing database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Store a message
    pub async fn append(&self, new: NewMessage) -> Result<Message, BackendError> {
        let created_at = new.created_at.unwrap_or_else(Utc::now);
        let model = messages::Model {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            body: new.body,
            created_at: created_at.timestamp_millis(),
            deleted_at: None,
        };

        messages::Entity::insert(messages::ActiveModel::from(model.clone()))
            .exec_without_returning(&self.db)
            .await?;

        debug!("Stored message {} in {}", model.id, model.conversation_id);
        Ok(Message::from(model))
    }

    /// Non-deleted messages of every conversation in `query`, newest first
    ///
    /// One statement regardless of how many conversations are asked for.
    pub async fn batch(&self, query: &MessageQuery) -> Result<Vec<Message>, BackendError> {
        if query.conversation_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut select = messages::Entity::find()
            .filter(messages::Column::ConversationId.is_in(query.conversation_ids.clone()))
            .filter(messages::Column::DeletedAt.is_null());
        if let Some(sender) = &query.exclude_sender {
            select = select.filter(messages::Column::SenderId.ne(sender.as_str()));
        }

        let rows = select
            .order_by_desc(messages::Column::CreatedAt)
            .order_by_desc(messages::Column::Id)
            .all(&self.db)
            .await?;

        debug!(
            "Fetched {} messages across {} conversations",
            rows.len(),
            query.conversation_ids.len()
        );
        Ok(rows.into_iter().map(Message::from).collect())
    }

    /// Soft-delete a message
    pub async fn soft_delete(
        &self,
        id: &str,
        deleted_at: DateTime<Utc>,
    ) -> Result<Option<Message>, BackendError> {
        let Some(model) = messages::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };

        let mut active: messages::ActiveModel = model.into();
        active.deleted_at = Set(Some(deleted_at.timestamp_millis()));
        let updated = active.update(&self.db).await?;
        Ok(Some(Message::from(updated)))
    }
}
