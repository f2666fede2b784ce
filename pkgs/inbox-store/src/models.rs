//! Domain types shared between the store and the sync engine

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::entities::{conversation_participants, conversations, messages, profiles};
use crate::error::BackendError;

/// Conversation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConversationKind {
    Direct,
    Group,
    SiteScoped,
    TeamScoped,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
            Self::SiteScoped => "site-scoped",
            Self::TeamScoped => "team-scoped",
        }
    }
}

impl fmt::Display for ConversationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationKind {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "group" => Ok(Self::Group),
            "site-scoped" => Ok(Self::SiteScoped),
            "team-scoped" => Ok(Self::TeamScoped),
            other => Err(BackendError::Decode(format!(
                "unknown conversation kind '{}'",
                other
            ))),
        }
    }
}

/// Participant role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Admin,
    Member,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }
}

impl FromStr for ParticipantRole {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            other => Err(BackendError::Decode(format!(
                "unknown participant role '{}'",
                other
            ))),
        }
    }
}

/// Conversation row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub kind: ConversationKind,
    pub tenant_id: String,
    pub site_id: Option<String>,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

/// How far a participant has read
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadCursor {
    pub last_read_at: Option<DateTime<Utc>>,
    pub last_read_message_id: Option<String>,
}

/// Membership of a user in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub conversation_id: String,
    pub user_id: String,
    pub role: ParticipantRole,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub cursor: ReadCursor,
}

impl Participant {
    pub fn is_active(&self) -> bool {
        self.left_at.is_none()
    }
}

/// A conversation together with all of its participant rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRecord {
    pub conversation: Conversation,
    pub participants: Vec<Participant>,
}

impl ConversationRecord {
    /// Participant row for `user_id`, whether or not they have left
    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    /// User ids of everyone who has not left
    pub fn active_user_ids(&self) -> impl Iterator<Item = &str> {
        self.participants
            .iter()
            .filter(|p| p.is_active())
            .map(|p| p.user_id.as_str())
    }
}

/// Message row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Display profile of a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

impl Profile {
    /// Display name, falling back to the contact email
    pub fn label(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or(self.email.as_deref())
    }
}

/// Input for a new conversation row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversation {
    pub tenant_id: String,
    pub kind: ConversationKind,
    pub site_id: Option<String>,
    pub name: Option<String>,
}

/// Input for a new participant row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewParticipant {
    pub conversation_id: String,
    pub user_id: String,
    pub role: ParticipantRole,
}

/// Input for a new message row (store side only)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: String,
    pub sender_id: String,
    pub body: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Batched message lookup
///
/// Results are always non-deleted and newest first; ties on `created_at`
/// are broken by descending id so repeated scans return identical order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageQuery {
    pub conversation_ids: Vec<String>,
    pub exclude_sender: Option<String>,
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

pub(crate) fn from_millis_opt(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(|t| Utc.timestamp_millis_opt(t).single())
}

impl TryFrom<conversations::Model> for Conversation {
    type Error = BackendError;

    fn try_from(model: conversations::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            kind: model.kind.parse()?,
            id: model.id,
            tenant_id: model.tenant_id,
            site_id: model.site_id,
            name: model.name,
            created_at: from_millis(model.created_at),
            last_activity_at: from_millis_opt(model.last_activity_at),
            archived_at: from_millis_opt(model.archived_at),
        })
    }
}

impl TryFrom<conversation_participants::Model> for Participant {
    type Error = BackendError;

    fn try_from(model: conversation_participants::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            role: model.role.parse()?,
            conversation_id: model.conversation_id,
            user_id: model.user_id,
            joined_at: from_millis(model.joined_at),
            left_at: from_millis_opt(model.left_at),
            cursor: ReadCursor {
                last_read_at: from_millis_opt(model.last_read_at),
                last_read_message_id: model.last_read_message_id,
            },
        })
    }
}

impl From<messages::Model> for Message {
    fn from(model: messages::Model) -> Self {
        Self {
            id: model.id,
            conversation_id: model.conversation_id,
            sender_id: model.sender_id,
            body: model.body,
            created_at: from_millis(model.created_at),
            deleted_at: from_millis_opt(model.deleted_at),
        }
    }
}

impl From<profiles::Model> for Profile {
    fn from(model: profiles::Model) -> Self {
        Self {
            user_id: model.user_id,
            display_name: model.display_name,
            email: model.email,
        }
    }
}
