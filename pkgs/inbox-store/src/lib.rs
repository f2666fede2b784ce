//! Inbox Store - backing store for the conversation inbox
//!
//! This crate holds the normalized data the inbox is built from and the
//! interfaces the sync engine talks to. It provides SQLite-based persistence
//! using Sea-ORM, plus an in-process change feed that publishes a row-level
//! event for every write.
//!
//! # Architecture
//!
//! - **InboxBackend**: Query interface consumed by the sync engine (batched
//!   conversation, profile and message reads; conversation and participant writes)
//! - **ChangeFeed**: Tenant-scoped subscription to row-level change events
//! - **StoreBackend**: SQLite implementation of both, composed of:
//!   - **ConversationStore**: Conversation rows and participant sets
//!   - **ParticipantStore**: Membership rows and read cursors
//!   - **MessageStore**: Newest-first batched message scans
//!   - **ProfileStore**: Display profiles looked up by user id
//! - **ChangeHub**: Broadcast hub behind the change feed
//!
//! # Database Schema
//!
//! - `conversations`: Kind, tenant, optional site scope and name, activity and archival times
//! - `conversation_participants`: Role, join/leave times, read cursor
//! - `messages`: Sender, body, creation and soft-delete times
//! - `profiles`: Display name and email per user
//!
//! Timestamps are stored as epoch milliseconds.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use inbox_store::{InboxBackend, StoreBackend, StoreConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = StoreConfig {
//!     db_path: "inbox.db".into(),
//!     ..Default::default()
//! };
//!
//! let backend = StoreBackend::open(&config).await?;
//! let conversations = backend
//!     .fetch_active_conversations("tenant-1", "user-1")
//!     .await?;
//! println!("{} conversations", conversations.len());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod conversation_store;
pub mod entities;
pub mod error;
pub mod events;
pub mod message_store;
pub mod migration;
pub mod models;
pub mod participant_store;
pub mod profile_store;

pub use backend::{ChangeFeed, InboxBackend, StoreBackend};
pub use error::BackendError;
pub use events::{ChangeEvent, ChangeHub, ChangeOp, EntityKind};
pub use models::{
    Conversation, ConversationKind, ConversationRecord, Message, MessageQuery, NewConversation,
    NewMessage, NewParticipant, Participant, ParticipantRole, Profile, ReadCursor,
};

use serde::{Deserialize, Serialize};

/// Configuration for the store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database file
    pub db_path: std::path::PathBuf,

    /// Events buffered per change feed subscriber before it lags (default: 256)
    pub feed_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: std::path::PathBuf::from("inbox-store.db"),
            feed_capacity: 256,
        }
    }
}
