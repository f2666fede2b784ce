//! Public API of the inbox engine

use chrono::Utc;
use inbox_store::{
    ChangeFeed, Conversation, ConversationKind, InboxBackend, MessageQuery, NewParticipant,
    Participant, ParticipantRole,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coalescer::Coalescer;
use crate::error::InboxError;
use crate::factory::{other_participants, ConversationFactory, CreateRequest};
use crate::feed::ChangeFeedListener;
use crate::models::{CreateOutcome, InboxConfig, InboxStatus, LoadOptions, ReadModelEntry};
use crate::read_model::ConversationReadModel;
use crate::reconciler::BatchReconciler;

/// One user's live inbox within a tenant
///
/// A session owns its read model, its reconciler and, when started with a
/// change feed, the listener and coalescer tasks that keep the read model
/// fresh. Call [`dispose`](Self::dispose) to stop the background tasks.
pub struct InboxSession {
    tenant_id: String,
    user_id: String,
    config: InboxConfig,
    backend: Arc<dyn InboxBackend>,
    read_model: Arc<ConversationReadModel>,
    reconciler: Arc<BatchReconciler>,
    factory: ConversationFactory,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl InboxSession {
    /// Session without live updates; the read model changes only on explicit reloads
    pub fn new(
        backend: Arc<dyn InboxBackend>,
        config: InboxConfig,
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        let tenant_id = tenant_id.into();
        let user_id = user_id.into();
        let read_model = Arc::new(ConversationReadModel::new());
        let reconciler = Arc::new(BatchReconciler::new(
            backend.clone(),
            read_model.clone(),
            tenant_id.clone(),
            user_id.clone(),
        ));
        let factory = ConversationFactory::new(backend.clone(), config.direct_dedup_window);

        Self {
            tenant_id,
            user_id,
            config,
            backend,
            read_model,
            reconciler,
            factory,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Session kept live by `feed`. Must be called inside a tokio runtime.
    pub fn start(
        backend: Arc<dyn InboxBackend>,
        feed: Arc<dyn ChangeFeed>,
        config: InboxConfig,
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        let session = Self::new(backend, config, tenant_id, user_id);
        session.spawn_live(feed);
        session
    }

    fn spawn_live(&self, feed: Arc<dyn ChangeFeed>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        // One slot: a waiting signal already covers every later one
        let (resync_tx, mut resync_rx) = mpsc::channel::<()>(1);

        let listener = ChangeFeedListener::new(
            feed,
            self.tenant_id.clone(),
            self.config.resubscribe_delay(),
        );
        let coalescer = Coalescer::new(self.config.debounce(), self.config.min_resync_interval());
        let read_model = self.read_model.clone();
        let reconciler = self.reconciler.clone();
        let cancel = self.cancel.clone();

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(listener.run(event_tx, self.cancel.clone())));
        tasks.push(tokio::spawn(coalescer.run(
            event_rx,
            resync_tx,
            move |event| {
                debug!("Change event: {:?} {:?}", event.entity, event.op);
                read_model.mark_stale();
            },
            self.cancel.clone(),
        )));
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    signal = resync_rx.recv() => {
                        if signal.is_none() {
                            break;
                        }
                        if let Err(e) = reconciler.reload(LoadOptions::silent()).await {
                            warn!("Background resync failed: {}", e);
                        }
                    }
                }
            }
        }));

        info!(
            "Inbox session started for user {} in tenant {}",
            self.user_id, self.tenant_id
        );
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn config(&self) -> &InboxConfig {
        &self.config
    }

    fn ensure_active(&self) -> Result<(), InboxError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(InboxError::Disposed);
        }
        Ok(())
    }

    /// Reload the conversation list from the backend
    pub async fn load_conversations(
        &self,
        options: LoadOptions,
    ) -> Result<Arc<Vec<ReadModelEntry>>, InboxError> {
        self.ensure_active()?;
        self.reconciler.reload(options).await
    }

    /// Silent reload
    pub async fn refresh(&self) -> Result<Arc<Vec<ReadModelEntry>>, InboxError> {
        self.load_conversations(LoadOptions::silent()).await
    }

    pub async fn create_conversation(
        &self,
        kind: ConversationKind,
        participant_ids: &[String],
        name: Option<&str>,
        site_id: Option<&str>,
    ) -> Result<CreateOutcome, InboxError> {
        self.ensure_active()?;
        let outcome = self
            .factory
            .create(CreateRequest {
                tenant_id: self.tenant_id.clone(),
                creator_id: self.user_id.clone(),
                kind,
                participant_ids: participant_ids.to_vec(),
                name: name.map(str::to_string),
                site_id: site_id.map(str::to_string),
            })
            .await?;
        self.refresh_after("create").await;
        Ok(outcome)
    }

    /// Archive a conversation; it disappears from the list immediately and
    /// comes back if the backend rejects the change
    pub async fn archive_conversation(&self, conversation_id: &str) -> Result<Conversation, InboxError> {
        self.ensure_active()?;
        self.require_admin(conversation_id, "archive conversations")
            .await?;

        self.read_model.begin_removal(conversation_id);
        match self
            .backend
            .set_archived(conversation_id, Some(Utc::now()))
            .await
        {
            Ok(Some(conversation)) => {
                info!("Archived conversation {}", conversation_id);
                self.refresh_after("archive").await;
                Ok(conversation)
            }
            Ok(None) => {
                self.read_model.rollback();
                Err(InboxError::NotFound(conversation_id.to_string()))
            }
            Err(e) => {
                self.read_model.rollback();
                warn!("Archiving {} failed: {}", conversation_id, e);
                Err(e.into())
            }
        }
    }

    pub async fn unarchive_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Conversation, InboxError> {
        self.ensure_active()?;
        self.require_admin(conversation_id, "unarchive conversations")
            .await?;

        match self.backend.set_archived(conversation_id, None).await? {
            Some(conversation) => {
                info!("Unarchived conversation {}", conversation_id);
                self.refresh_after("unarchive").await;
                Ok(conversation)
            }
            None => Err(InboxError::NotFound(conversation_id.to_string())),
        }
    }

    /// Hard delete. `Ok(false)` when there was nothing to delete.
    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<bool, InboxError> {
        self.ensure_active()?;
        self.require_admin(conversation_id, "delete conversations")
            .await?;

        self.read_model.begin_removal(conversation_id);
        match self.backend.delete_conversation(conversation_id).await {
            Ok(true) => {
                info!("Deleted conversation {}", conversation_id);
                self.refresh_after("delete").await;
                Ok(true)
            }
            Ok(false) => {
                self.read_model.rollback();
                Ok(false)
            }
            Err(e) => {
                self.read_model.rollback();
                warn!("Deleting {} failed: {}", conversation_id, e);
                Err(e.into())
            }
        }
    }

    /// Move the caller's read cursor to the newest message of a conversation
    pub async fn mark_read(&self, conversation_id: &str) -> Result<Participant, InboxError> {
        self.ensure_active()?;

        let newest = self
            .backend
            .fetch_messages(&MessageQuery {
                conversation_ids: vec![conversation_id.to_string()],
                exclude_sender: None,
            })
            .await?
            .into_iter()
            .next();

        let (read_at, message_id) = match newest {
            Some(message) => (message.created_at, Some(message.id)),
            None => (Utc::now(), None),
        };

        let participant = self
            .backend
            .update_read_cursor(conversation_id, &self.user_id, read_at, message_id)
            .await?
            .ok_or_else(|| InboxError::NotFound(conversation_id.to_string()))?;

        self.refresh_after("mark read").await;
        Ok(participant)
    }

    /// Add members to an existing conversation, also the retry path when
    /// participants could not be written at creation
    pub async fn add_participants(
        &self,
        conversation_id: &str,
        user_ids: &[String],
    ) -> Result<Vec<Participant>, InboxError> {
        self.ensure_active()?;

        let rows: Vec<NewParticipant> = other_participants(&self.user_id, user_ids)
            .into_iter()
            .map(|user_id| NewParticipant {
                conversation_id: conversation_id.to_string(),
                user_id,
                role: ParticipantRole::Member,
            })
            .collect();
        if rows.is_empty() {
            return Err(InboxError::InvalidRequest(
                "no participants to add".to_string(),
            ));
        }

        let added = self.backend.insert_participants(&rows).await?;
        info!(
            "Added {} participants to conversation {}",
            added.len(),
            conversation_id
        );
        self.refresh_after("add participants").await;
        Ok(added)
    }

    /// Current conversation list
    pub fn snapshot(&self) -> Arc<Vec<ReadModelEntry>> {
        self.read_model.snapshot()
    }

    pub fn status(&self) -> InboxStatus {
        self.read_model.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<InboxStatus> {
        self.read_model.subscribe_status()
    }

    pub fn total_unread(&self) -> u64 {
        self.read_model.total_unread()
    }

    /// Reconciliation passes run so far
    pub fn reconcile_passes(&self) -> u64 {
        self.reconciler.passes()
    }

    /// Stop background tasks and wait for them to finish
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Inbox task ended abnormally: {}", e);
            }
        }
        info!("Inbox session disposed for user {}", self.user_id);
    }

    async fn require_admin(&self, conversation_id: &str, action: &str) -> Result<(), InboxError> {
        if !self.config.role_guard_enabled {
            return Ok(());
        }
        match self
            .backend
            .fetch_participant(conversation_id, &self.user_id)
            .await?
        {
            Some(p) if p.is_active() && p.role == ParticipantRole::Admin => Ok(()),
            _ => Err(InboxError::Forbidden(action.to_string())),
        }
    }

    async fn refresh_after(&self, action: &str) {
        if let Err(e) = self.reconciler.reload(LoadOptions::silent()).await {
            warn!("Refresh after {} failed: {}", action, e);
        }
    }
}

impl Drop for InboxSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
