use inbox_store::{ConversationRecord, InboxBackend, Participant, Profile};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::EnrichedParticipant;

/// Resolves participant ids to display profiles in one batched lookup
pub struct ParticipantEnricher {
    backend: Arc<dyn InboxBackend>,
}

impl ParticipantEnricher {
    pub fn new(backend: Arc<dyn InboxBackend>) -> Self {
        Self { backend }
    }

    /// Look up every distinct participant across `records` with a single query.
    ///
    /// A failed lookup yields an empty, degraded index so the caller can keep
    /// going with bare participant ids.
    pub async fn index(&self, records: &[ConversationRecord]) -> ProfileIndex {
        let user_ids: Vec<String> = records
            .iter()
            .flat_map(|r| r.participants.iter().map(|p| p.user_id.clone()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if user_ids.is_empty() {
            return ProfileIndex::default();
        }

        match self.backend.fetch_profiles(&user_ids).await {
            Ok(profiles) => {
                debug!(
                    "Resolved {} profiles for {} participants",
                    profiles.len(),
                    user_ids.len()
                );
                ProfileIndex::from_profiles(profiles)
            }
            Err(e) => {
                warn!("Profile lookup failed, continuing without profiles: {}", e);
                ProfileIndex {
                    profiles: HashMap::new(),
                    degraded: true,
                }
            }
        }
    }
}

/// Profiles keyed by user id
#[derive(Debug, Default)]
pub struct ProfileIndex {
    profiles: HashMap<String, Profile>,
    degraded: bool,
}

impl ProfileIndex {
    pub fn from_profiles(profiles: impl IntoIterator<Item = Profile>) -> Self {
        Self {
            profiles: profiles
                .into_iter()
                .map(|p| (p.user_id.clone(), p))
                .collect(),
            degraded: false,
        }
    }

    pub fn get(&self, user_id: &str) -> Option<&Profile> {
        self.profiles.get(user_id)
    }

    /// True when the lookup failed and no profiles are attached
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn enrich(&self, participants: &[Participant]) -> Vec<EnrichedParticipant> {
        participants
            .iter()
            .map(|p| EnrichedParticipant {
                participant: p.clone(),
                profile: self.get(&p.user_id).cloned(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use inbox_store::{ParticipantRole, ReadCursor};

    fn participant(user_id: &str) -> Participant {
        Participant {
            conversation_id: "c1".to_string(),
            user_id: user_id.to_string(),
            role: ParticipantRole::Member,
            joined_at: Utc::now(),
            left_at: None,
            cursor: ReadCursor::default(),
        }
    }

    #[test]
    fn test_enrich_maps_profiles_by_user_id() {
        let index = ProfileIndex::from_profiles(vec![Profile {
            user_id: "v".to_string(),
            display_name: Some("Vera".to_string()),
            email: None,
        }]);

        let enriched = index.enrich(&[participant("u"), participant("v")]);

        assert_eq!(enriched.len(), 2);
        assert_eq!(enriched[0].user_id(), "u");
        assert!(enriched[0].profile.is_none());
        assert_eq!(
            enriched[1].profile.as_ref().and_then(|p| p.label()),
            Some("Vera")
        );
        assert!(!index.is_degraded());
    }
}
