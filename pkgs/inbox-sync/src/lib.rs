//! Inbox Sync - live conversation inbox for one user
//!
//! Loads the conversations a user takes part in, annotates each with its last
//! message, unread count and participant profiles, and keeps the list current
//! from a change feed.
//!
//! # Architecture
//!
//! - **ChangeFeedListener**: holds one subscription to the tenant's change
//!   feed and resubscribes when it drops
//! - **Coalescer**: debounces change events into resync signals, with a
//!   minimum interval between resyncs
//! - **BatchReconciler**: rebuilds the whole list with a fixed number of
//!   batched queries, whatever the number of conversations
//! - **count_unread**: pure unread count from a read cursor and the messages
//!   other people sent
//! - **ParticipantEnricher**: one profile lookup for every participant in the list
//! - **ConversationFactory**: creates conversations, reusing an existing direct
//!   conversation for the same pair
//! - **ConversationReadModel**: immutable snapshots, swapped atomically
//! - **InboxSession**: the public API tying these together
//!
//! ```text
//! change feed -> listener -> coalescer -> reconciler -> read model -> caller
//!                                             ^
//!                  factory / archive / delete-+
//! ```
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use inbox_store::{StoreBackend, StoreConfig};
//! use inbox_sync::{InboxConfig, InboxSession, LoadOptions};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let backend = Arc::new(StoreBackend::open(&StoreConfig::default()).await?);
//! let session = InboxSession::start(
//!     backend.clone(),
//!     backend,
//!     InboxConfig::default(),
//!     "tenant-1",
//!     "user-1",
//! );
//!
//! let inbox = session.load_conversations(LoadOptions::default()).await?;
//! for entry in inbox.iter() {
//!     println!("{} ({} unread)", entry.conversation.id, entry.unread_count);
//! }
//!
//! session.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod coalescer;
pub mod enricher;
pub mod error;
pub mod factory;
pub mod feed;
pub mod models;
pub mod read_model;
pub mod reconciler;
pub mod session;
pub mod unread;

pub use coalescer::Coalescer;
pub use enricher::{ParticipantEnricher, ProfileIndex};
pub use error::InboxError;
pub use factory::{ConversationFactory, CreateRequest};
pub use feed::ChangeFeedListener;
pub use models::{
    CreateOutcome, EnrichedParticipant, InboxConfig, InboxStatus, LoadOptions, ReadModelEntry,
    SyncState,
};
pub use read_model::ConversationReadModel;
pub use reconciler::BatchReconciler;
pub use session::InboxSession;
pub use unread::count_unread;
