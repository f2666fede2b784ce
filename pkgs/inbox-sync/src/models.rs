use chrono::{DateTime, Utc};
use inbox_store::{Conversation, Message, Participant, Profile};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::InboxError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InboxConfig {
    /// Quiet period after the last change event before a resync fires
    pub debounce_ms: u64,

    /// Minimum spacing between two resyncs
    pub min_resync_interval_ms: u64,

    /// Wait before re-subscribing after the change feed drops
    pub resubscribe_delay_ms: u64,

    /// How many recent direct conversations are checked for a duplicate
    pub direct_dedup_window: u64,

    /// Restrict archive/unarchive/delete to conversation admins
    pub role_guard_enabled: bool,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 250,
            min_resync_interval_ms: 500,
            resubscribe_delay_ms: 1000,
            direct_dedup_window: 10,
            role_guard_enabled: false,
        }
    }
}

impl InboxConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn min_resync_interval(&self) -> Duration {
        Duration::from_millis(self.min_resync_interval_ms)
    }

    pub fn resubscribe_delay(&self) -> Duration {
        Duration::from_millis(self.resubscribe_delay_ms)
    }
}

/// Options for a reload of the inbox
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Skip the loading state; used for background resyncs
    pub silent: bool,
}

impl LoadOptions {
    pub fn silent() -> Self {
        Self { silent: true }
    }
}

/// Participant annotated with its display profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrichedParticipant {
    pub participant: Participant,
    pub profile: Option<Profile>,
}

impl EnrichedParticipant {
    pub fn user_id(&self) -> &str {
        &self.participant.user_id
    }
}

/// One conversation as the inbox shows it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadModelEntry {
    pub conversation: Conversation,
    pub last_message: Option<Message>,
    pub unread_count: u32,
    pub participants: Vec<EnrichedParticipant>,
}

impl ReadModelEntry {
    /// Time used to order the inbox: the last message, else the
    /// conversation's own activity time
    pub fn activity_at(&self) -> Option<DateTime<Utc>> {
        self.last_message
            .as_ref()
            .map(|m| m.created_at)
            .or(self.conversation.last_activity_at)
    }

    pub fn id(&self) -> &str {
        &self.conversation.id
    }
}

/// Lifecycle of the inbox read model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncState {
    Unloaded,
    Loading,
    Ready,
    /// A change arrived and a resync has not completed yet
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxStatus {
    pub state: SyncState,
    pub last_error: Option<InboxError>,
}

impl Default for InboxStatus {
    fn default() -> Self {
        Self {
            state: SyncState::Unloaded,
            last_error: None,
        }
    }
}

/// Result of a create call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOutcome {
    pub conversation: Conversation,
    /// An existing direct conversation was returned instead of a new one
    pub reused: bool,
    /// Set when the conversation row exists but its participants could not be added
    pub participant_error: Option<InboxError>,
}

impl CreateOutcome {
    pub fn is_complete(&self) -> bool {
        self.participant_error.is_none()
    }
}
