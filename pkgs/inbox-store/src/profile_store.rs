//! Profile store for user display information

use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use tracing::debug;

use crate::entities::profiles;
use crate::error::BackendError;
use crate::models::Profile;

/// Profile store
pub struct ProfileStore {
    db: DatabaseConnection,
}

impl ProfileStore {
    /// Create a new profile store
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Add or replace a profile
    pub async fn upsert(&self, profile: &Profile) -> Result<(), BackendError> {
        let model = profiles::ActiveModel::from(profiles::Model {
            user_id: profile.user_id.clone(),
            display_name: profile.display_name.clone(),
            email: profile.email.clone(),
            updated_at: chrono::Utc::now().timestamp_millis(),
        });

        profiles::Entity::insert(model)
            .on_conflict(
                OnConflict::column(profiles::Column::UserId)
                    .update_columns([
                        profiles::Column::DisplayName,
                        profiles::Column::Email,
                        profiles::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        debug!("Upserted profile {}", profile.user_id);
        Ok(())
    }

    /// Profiles for a set of user ids, in one statement
    pub async fn by_ids(&self, user_ids: &[String]) -> Result<Vec<Profile>, BackendError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let profiles = profiles::Entity::find()
            .filter(profiles::Column::UserId.is_in(user_ids.to_vec()))
            .all(&self.db)
            .await?;

        Ok(profiles.into_iter().map(Profile::from).collect())
    }
}
