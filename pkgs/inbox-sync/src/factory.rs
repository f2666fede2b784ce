use inbox_store::{
    Conversation, ConversationKind, ConversationRecord, InboxBackend, NewConversation,
    NewParticipant, ParticipantRole,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::InboxError;
use crate::models::CreateOutcome;

/// Parameters for a new conversation
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub tenant_id: String,
    pub creator_id: String,
    pub kind: ConversationKind,
    pub participant_ids: Vec<String>,
    pub name: Option<String>,
    pub site_id: Option<String>,
}

/// Creates conversations and keeps at most one direct conversation per pair
pub struct ConversationFactory {
    backend: Arc<dyn InboxBackend>,
    direct_dedup_window: u64,
}

impl ConversationFactory {
    pub fn new(backend: Arc<dyn InboxBackend>, direct_dedup_window: u64) -> Self {
        Self {
            backend,
            direct_dedup_window,
        }
    }

    /// Create a conversation, or return the existing direct one for the pair.
    ///
    /// Once the conversation row is written it is never rolled back: a
    /// participant failure comes back as `participant_error` on the outcome.
    pub async fn create(&self, request: CreateRequest) -> Result<CreateOutcome, InboxError> {
        let others = other_participants(&request.creator_id, &request.participant_ids);
        validate(&request, &others)?;

        if request.kind == ConversationKind::Direct {
            let other = &others[0];
            if let Some(existing) = self
                .find_direct(&request.tenant_id, &request.creator_id, other)
                .await?
            {
                info!(
                    "Reusing direct conversation {} between {} and {}",
                    existing.id, request.creator_id, other
                );
                return Ok(CreateOutcome {
                    conversation: existing,
                    reused: true,
                    participant_error: None,
                });
            }
        }

        let name = match request.name.filter(|n| !n.trim().is_empty()) {
            Some(name) => Some(name),
            None if request.kind == ConversationKind::Direct => {
                self.prefill_name(&others[0]).await
            }
            None => None,
        };

        let conversation = self
            .backend
            .insert_conversation(&NewConversation {
                tenant_id: request.tenant_id.clone(),
                kind: request.kind,
                site_id: request.site_id.clone(),
                name,
            })
            .await
            .map_err(|e| {
                error!("Failed to create {} conversation: {}", request.kind, e);
                InboxError::from(e)
            })?;

        let participant_error = self
            .add_participants(&conversation, &request.creator_id, &others)
            .await
            .err();

        Ok(CreateOutcome {
            conversation,
            reused: false,
            participant_error,
        })
    }

    /// The creator's admin row goes in on its own, so a failed member batch
    /// still leaves the conversation in the creator's inbox.
    async fn add_participants(
        &self,
        conversation: &Conversation,
        creator_id: &str,
        others: &[String],
    ) -> Result<(), InboxError> {
        let row = |user_id: &str, role| NewParticipant {
            conversation_id: conversation.id.clone(),
            user_id: user_id.to_string(),
            role,
        };

        self.backend
            .insert_participants(&[row(creator_id, ParticipantRole::Admin)])
            .await
            .map_err(|e| {
                error!(
                    "Conversation {} created but adding its creator failed: {}",
                    conversation.id, e
                );
                InboxError::from(e)
            })?;

        let members: Vec<NewParticipant> = others
            .iter()
            .map(|id| row(id, ParticipantRole::Member))
            .collect();
        if !members.is_empty() {
            self.backend.insert_participants(&members).await.map_err(|e| {
                error!(
                    "Conversation {} created but adding participants failed: {}",
                    conversation.id, e
                );
                InboxError::from(e)
            })?;
        }

        info!(
            "Created {} conversation {} with {} participants",
            conversation.kind,
            conversation.id,
            members.len() + 1
        );
        Ok(())
    }

    async fn find_direct(
        &self,
        tenant_id: &str,
        creator_id: &str,
        other_id: &str,
    ) -> Result<Option<Conversation>, InboxError> {
        let candidates = self
            .backend
            .fetch_recent_direct_conversations(tenant_id, creator_id, self.direct_dedup_window)
            .await?;
        debug!(
            "Checking {} recent direct conversations of {} for {}",
            candidates.len(),
            creator_id,
            other_id
        );
        Ok(candidates
            .into_iter()
            .find(|record| is_direct_pair(record, creator_id, other_id))
            .map(|record| record.conversation))
    }

    async fn prefill_name(&self, other_id: &str) -> Option<String> {
        match self.backend.fetch_profiles(&[other_id.to_string()]).await {
            Ok(profiles) => profiles
                .iter()
                .find(|p| p.user_id == other_id)
                .and_then(|p| p.label())
                .map(str::to_string),
            Err(e) => {
                warn!("Could not prefill name from profile of {}: {}", other_id, e);
                None
            }
        }
    }
}

/// Requested participants without duplicates or the creator, in request order
pub fn other_participants(creator_id: &str, participant_ids: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    participant_ids
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty() && *id != creator_id && seen.insert(*id))
        .map(str::to_string)
        .collect()
}

fn validate(request: &CreateRequest, others: &[String]) -> Result<(), InboxError> {
    match request.kind {
        ConversationKind::Direct if others.len() != 1 => Err(InboxError::InvalidRequest(format!(
            "a direct conversation needs exactly one other participant, got {}",
            others.len()
        ))),
        ConversationKind::SiteScoped if request.site_id.is_none() => Err(
            InboxError::InvalidRequest("a site-scoped conversation needs a site id".to_string()),
        ),
        _ => Ok(()),
    }
}

/// True when the active participants are exactly `{a, b}`
fn is_direct_pair(record: &ConversationRecord, a: &str, b: &str) -> bool {
    if record.conversation.kind != ConversationKind::Direct || record.conversation.is_archived() {
        return false;
    }
    let active: BTreeSet<&str> = record.active_user_ids().collect();
    active.len() == 2 && active.contains(a) && active.contains(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use inbox_store::{Participant, ReadCursor};

    fn request(kind: ConversationKind, ids: &[&str]) -> CreateRequest {
        CreateRequest {
            tenant_id: "t1".to_string(),
            creator_id: "u".to_string(),
            kind,
            participant_ids: ids.iter().map(|s| s.to_string()).collect(),
            name: None,
            site_id: None,
        }
    }

    fn direct(users: &[(&str, bool)]) -> ConversationRecord {
        let now = Utc::now();
        ConversationRecord {
            conversation: Conversation {
                id: "d1".to_string(),
                kind: ConversationKind::Direct,
                tenant_id: "t1".to_string(),
                site_id: None,
                name: None,
                created_at: now,
                last_activity_at: Some(now),
                archived_at: None,
            },
            participants: users
                .iter()
                .map(|(id, left)| Participant {
                    conversation_id: "d1".to_string(),
                    user_id: id.to_string(),
                    role: ParticipantRole::Member,
                    joined_at: now,
                    left_at: left.then_some(now),
                    cursor: ReadCursor::default(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_other_participants_drops_creator_and_duplicates() {
        let ids: Vec<String> = ["v", "u", "w", "v", " ", "w"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(other_participants("u", &ids), vec!["v", "w"]);
    }

    #[test]
    fn test_validate_direct_needs_one_other() {
        let r = request(ConversationKind::Direct, &["v", "w"]);
        let others = other_participants(&r.creator_id, &r.participant_ids);
        assert!(matches!(
            validate(&r, &others),
            Err(InboxError::InvalidRequest(_))
        ));

        let r = request(ConversationKind::Direct, &["u"]);
        let others = other_participants(&r.creator_id, &r.participant_ids);
        assert!(validate(&r, &others).is_err());

        let r = request(ConversationKind::Group, &[]);
        assert!(validate(&r, &[]).is_ok());
    }

    #[test]
    fn test_validate_site_scoped_needs_site() {
        let mut r = request(ConversationKind::SiteScoped, &["v"]);
        assert!(validate(&r, &["v".to_string()]).is_err());
        r.site_id = Some("site-1".to_string());
        assert!(validate(&r, &["v".to_string()]).is_ok());
    }

    #[test]
    fn test_direct_pair_matches_active_set_only() {
        assert!(is_direct_pair(&direct(&[("u", false), ("v", false)]), "u", "v"));
        assert!(is_direct_pair(&direct(&[("v", false), ("u", false)]), "u", "v"));
        assert!(!is_direct_pair(&direct(&[("u", false), ("v", true)]), "u", "v"));
        assert!(!is_direct_pair(
            &direct(&[("u", false), ("v", false), ("w", false)]),
            "u",
            "v"
        ));
        assert!(is_direct_pair(
            &direct(&[("u", false), ("v", false), ("w", true)]),
            "u",
            "v"
        ));
    }
}
