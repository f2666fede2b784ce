//! Participant store - membership rows and read cursors

use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use tracing::{debug, info};

use crate::entities::conversation_participants;
use crate::error::BackendError;
use crate::models::{NewParticipant, Participant};

/// Participant store
pub struct ParticipantStore {
    db: DatabaseConnection,
}

impl ParticipantStore {
    /// Create a new participant store
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Insert participant rows in one statement
    ///
    /// A user who previously left is re-joined: their leave time is cleared
    /// and the join time reset, while role and read cursor are kept.
    pub async fn insert_many(
        &self,
        rows: &[NewParticipant],
        joined_at: DateTime<Utc>,
    ) -> Result<Vec<Participant>, BackendError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let joined_at = joined_at.timestamp_millis();
        let models: Vec<conversation_participants::Model> = rows
            .iter()
            .map(|row| conversation_participants::Model {
                conversation_id: row.conversation_id.clone(),
                user_id: row.user_id.clone(),
                role: row.role.as_str().to_string(),
                joined_at,
                left_at: None,
                last_read_at: None,
                last_read_message_id: None,
            })
            .collect();

        conversation_participants::Entity::insert_many(
            models
                .iter()
                .cloned()
                .map(conversation_participants::ActiveModel::from),
        )
        .on_conflict(
            OnConflict::columns([
                conversation_participants::Column::ConversationId,
                conversation_participants::Column::UserId,
            ])
            .update_columns([
                conversation_participants::Column::LeftAt,
                conversation_participants::Column::JoinedAt,
            ])
            .to_owned(),
        )
        .exec_without_returning(&self.db)
        .await?;

        info!("Inserted {} participant rows", models.len());
        models.into_iter().map(Participant::try_from).collect()
    }

    /// Get one participant row
    pub async fn get(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Option<Participant>, BackendError> {
        conversation_participants::Entity::find_by_id((
            conversation_id.to_string(),
            user_id.to_string(),
        ))
        .one(&self.db)
        .await?
        .map(Participant::try_from)
        .transpose()
    }

    /// Move a read cursor forward; a cursor never moves backwards
    pub async fn update_read_cursor(
        &self,
        conversation_id: &str,
        user_id: &str,
        read_at: DateTime<Utc>,
        message_id: Option<String>,
    ) -> Result<Option<Participant>, BackendError> {
        let Some(model) = conversation_participants::Entity::find_by_id((
            conversation_id.to_string(),
            user_id.to_string(),
        ))
        .one(&self.db)
        .await?
        else {
            return Ok(None);
        };

        let read_at = read_at.timestamp_millis();
        if model.last_read_at.is_some_and(|t| t > read_at) {
            debug!(
                "Ignoring stale read cursor for {} in {}",
                user_id, conversation_id
            );
            return Participant::try_from(model).map(Some);
        }

        let mut active: conversation_participants::ActiveModel = model.into();
        active.last_read_at = Set(Some(read_at));
        active.last_read_message_id = Set(message_id);
        let updated = active.update(&self.db).await?;
        Participant::try_from(updated).map(Some)
    }

    /// Record that a user left a conversation
    pub async fn leave(
        &self,
        conversation_id: &str,
        user_id: &str,
        left_at: DateTime<Utc>,
    ) -> Result<Option<Participant>, BackendError> {
        let Some(model) = conversation_participants::Entity::find_by_id((
            conversation_id.to_string(),
            user_id.to_string(),
        ))
        .one(&self.db)
        .await?
        else {
            return Ok(None);
        };

        let mut active: conversation_participants::ActiveModel = model.into();
        active.left_at = Set(Some(left_at.timestamp_millis()));
        let updated = active.update(&self.db).await?;

        info!("{} left conversation {}", user_id, conversation_id);
        Participant::try_from(updated).map(Some)
    }
}
