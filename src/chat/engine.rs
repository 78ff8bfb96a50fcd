//! ChatEngine: the facade the rendering surface talks to
//!
//! Wires the pending queue, normalizer, conversation store, poll scheduler,
//! send pipeline and flush controller around one backend, and tracks which
//! thread is active.
//!
//! Architecture:
//! - Sends go through [`SendPipeline`] for the active thread (or a draft)
//! - Replies arrive through the [`PollScheduler`], at most one poll alive
//! - Thread switches cancel the poll and load the authoritative history;
//!   a thread whose last turn is the user's re-arms the poll (cold resume)
//! - Host lifecycle signals go to the [`FlushController`]

use super::config::ChatConfig;
use super::pipeline::SendPipeline;
use super::store::ConversationStore;
use super::types::{ChatMessage, Role, SendOutcome, Thread};
use crate::auth::SessionProvider;
use crate::backend::{BeaconTransport, ChatBackend};
use crate::error::Result;
use crate::events::{EventBus, SyncEvent};
use crate::lifecycle::{FlushController, FlushReport, LifecycleSignal};
use crate::normalizer::Normalizer;
use crate::poll::{PollOutcome, PollScheduler, Visibility};
use crate::queue::{KeyValueStore, PendingItem, PendingQueue};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tracing::{debug, info};

pub struct ChatEngine {
    config: ChatConfig,
    backend: Arc<dyn ChatBackend>,
    events: EventBus,
    store: Arc<ConversationStore>,
    normalizer: Arc<Normalizer>,
    queue: Arc<PendingQueue>,
    poll: Arc<PollScheduler>,
    pipeline: SendPipeline,
    lifecycle: FlushController,
    active_thread: RwLock<Option<String>>,
}

impl ChatEngine {
    pub fn new(
        config: ChatConfig,
        backend: Arc<dyn ChatBackend>,
        beacon: Arc<dyn BeaconTransport>,
        sessions: Arc<dyn SessionProvider>,
        storage: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self::with_normalizer(config, backend, beacon, sessions, storage, Normalizer::new())
    }

    /// Like [`ChatEngine::new`] with a custom rule set for history cleaning.
    pub fn with_normalizer(
        config: ChatConfig,
        backend: Arc<dyn ChatBackend>,
        beacon: Arc<dyn BeaconTransport>,
        sessions: Arc<dyn SessionProvider>,
        storage: Arc<dyn KeyValueStore>,
        normalizer: Normalizer,
    ) -> Self {
        let events = EventBus::default();
        let store = Arc::new(ConversationStore::new(events.clone()));
        let normalizer = Arc::new(normalizer);
        let queue = Arc::new(PendingQueue::open(storage));
        let (visibility_tx, visibility_rx) = watch::channel(Visibility::Visible);

        let poll = Arc::new(PollScheduler::new(
            &config,
            backend.clone(),
            store.clone(),
            normalizer.clone(),
            events.clone(),
            visibility_rx,
        ));
        let pipeline = SendPipeline::new(
            &config,
            backend.clone(),
            sessions,
            store.clone(),
            queue.clone(),
            poll.clone(),
            events.clone(),
        );
        let lifecycle = FlushController::new(
            queue.clone(),
            backend.clone(),
            beacon,
            visibility_tx,
            events.clone(),
        );

        Self {
            config,
            backend,
            events,
            store,
            normalizer,
            queue,
            poll,
            pipeline,
            lifecycle,
            active_thread: RwLock::new(None),
        }
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Send `text` on the active thread, creating one if needed.
    pub async fn send(&self, text: &str) -> Result<SendOutcome> {
        let thread_id = self.active_thread.read().await.clone();
        let outcome = self.pipeline.send(text, thread_id.as_deref()).await?;

        if let SendOutcome::Sent {
            thread_id: Some(id),
            ..
        } = &outcome
        {
            *self.active_thread.write().await = Some(id.clone());
        }
        Ok(outcome)
    }

    /// Wait for the armed poll (if any) to finish.
    pub async fn wait_for_reply(&self) -> Option<PollOutcome> {
        self.poll.wait().await
    }

    pub async fn is_polling(&self) -> bool {
        self.poll.is_active().await
    }

    // ========================================================================
    // Threads
    // ========================================================================

    pub async fn active_thread(&self) -> Option<String> {
        self.active_thread.read().await.clone()
    }

    /// Leave the active thread; the next send starts a new one.
    pub async fn new_conversation(&self) {
        self.poll.cancel().await;
        *self.active_thread.write().await = None;
    }

    /// Make `thread_id` active and load its authoritative history.
    ///
    /// When the last turn is the user's, the reply may have been computed
    /// while nobody was watching: a placeholder is shown and the poll re-armed
    /// against the loaded snapshot.
    pub async fn select_thread(&self, thread_id: &str) -> Result<Vec<ChatMessage>> {
        self.poll.cancel().await;
        *self.active_thread.write().await = Some(thread_id.to_string());

        let raw = self.backend.fetch_messages(thread_id).await?;
        let snapshot = self.normalizer.normalize(&raw, Some(thread_id));

        if self.active_thread.read().await.as_deref() != Some(thread_id) {
            debug!(thread_id, "Thread switched during load, discarding snapshot");
            return Ok(snapshot);
        }

        self.store
            .replace_authoritative(thread_id, snapshot.clone())
            .await;

        if snapshot.last().is_some_and(|m| m.role == Role::User) {
            info!(thread_id, "Last turn awaits a reply, resuming poll");
            let baseline = self.store.baseline(Some(thread_id)).await;
            self.store
                .append_optimistic(
                    Some(thread_id),
                    vec![ChatMessage::processing(Some(thread_id.to_string()))],
                )
                .await;
            self.poll.start(thread_id, baseline).await;
        }

        Ok(snapshot)
    }

    /// Threads for the configured assistant type, most recent first.
    pub async fn list_threads(&self) -> Result<Vec<Thread>> {
        let threads = self
            .backend
            .list_threads(&self.config.assistant_type)
            .await?;
        self.store.set_threads(threads).await;
        Ok(self.store.threads().await)
    }

    pub async fn rename_thread(&self, thread_id: &str, title: &str) -> Result<Thread> {
        let thread = self.backend.rename_thread(thread_id, title).await?;
        self.store.upsert_thread(thread.clone()).await;
        Ok(thread)
    }

    /// Delete a thread. Deleting the active thread clears it and stops polling.
    pub async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.backend.delete_thread(thread_id).await?;
        self.store.remove_thread(thread_id).await;

        let mut active = self.active_thread.write().await;
        if active.as_deref() == Some(thread_id) {
            self.poll.cancel().await;
            *active = None;
        }
        Ok(())
    }

    /// Displayed messages for the active thread (or the draft)
    pub async fn messages(&self) -> Vec<ChatMessage> {
        let active = self.active_thread.read().await.clone();
        self.store.messages(active.as_deref()).await
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Opportunistic recovery of items left queued by a previous run.
    pub async fn startup(&self) -> FlushReport {
        self.lifecycle.recover_on_startup().await
    }

    pub async fn lifecycle(&self, signal: LifecycleSignal) -> FlushReport {
        self.lifecycle.handle(signal).await
    }

    /// Apply lifecycle signals until `Unload` or the sender closes.
    pub async fn run_lifecycle(&self, signals: mpsc::Receiver<LifecycleSignal>) {
        self.lifecycle.run(signals).await
    }

    /// Items not yet confirmed dispatched
    pub fn pending(&self) -> Vec<PendingItem> {
        self.queue.drain()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn pipeline(&self) -> &SendPipeline {
        &self.pipeline
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }
}
