//! Durable pending queue
//!
//! Holds every outbound message that has not been confirmed dispatched. The
//! whole queue is persisted as a JSON array of `{id, payload, enqueuedAt}`
//! under a single store key after every mutation, and hydrated from it on
//! construction.

use super::store::KeyValueStore;
use crate::chat::SendRequest;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};
use uuid::Uuid;

/// Store key the queue lives under
pub const PENDING_QUEUE_KEY: &str = "pending_chat_messages";

/// An outbound message awaiting confirmed dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingItem {
    /// The payload's `client_message_id`
    pub id: Uuid,
    pub payload: SendRequest,
    pub enqueued_at: DateTime<Utc>,
}

impl PendingItem {
    pub fn new(payload: SendRequest) -> Self {
        Self {
            id: payload.client_message_id,
            payload,
            enqueued_at: Utc::now(),
        }
    }
}

/// Persisted FIFO of [`PendingItem`]s keyed by idempotency id
pub struct PendingQueue {
    store: Arc<dyn KeyValueStore>,
    key: String,
    items: Mutex<Vec<PendingItem>>,
}

impl PendingQueue {
    /// Hydrate the queue from `store` under [`PENDING_QUEUE_KEY`].
    pub fn open(store: Arc<dyn KeyValueStore>) -> Self {
        Self::open_with_key(store, PENDING_QUEUE_KEY)
    }

    /// Hydrate the queue from `store` under a custom key.
    ///
    /// An unreadable or corrupt document hydrates as an empty queue; the
    /// next mutation overwrites it.
    pub fn open_with_key(store: Arc<dyn KeyValueStore>, key: &str) -> Self {
        let items = match store.get(key) {
            Ok(Some(doc)) => match serde_json::from_str::<Vec<PendingItem>>(&doc) {
                Ok(items) => items,
                Err(e) => {
                    warn!(key, "Discarding corrupt pending queue: {}", e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(key, "Failed to read pending queue, starting empty: {}", e);
                Vec::new()
            }
        };

        if !items.is_empty() {
            debug!(key, count = items.len(), "Pending queue hydrated");
        }

        Self {
            store,
            key: key.to_string(),
            items: Mutex::new(items),
        }
    }

    /// Add an item (replacing any item with the same id) and persist.
    ///
    /// The in-memory queue is updated even when persisting fails.
    pub fn enqueue(&self, item: PendingItem) -> Result<()> {
        let mut items = self.lock();
        match items.iter_mut().find(|i| i.id == item.id) {
            Some(existing) => *existing = item,
            None => items.push(item),
        }
        self.persist(&items)
    }

    /// Remove the item with `id` and persist. Returns whether it was present.
    pub fn dequeue(&self, id: Uuid) -> Result<bool> {
        let mut items = self.lock();
        let before = items.len();
        items.retain(|i| i.id != id);
        if items.len() == before {
            return Ok(false);
        }
        self.persist(&items)?;
        Ok(true)
    }

    /// Snapshot of all items in insertion order. Does not clear the queue.
    pub fn drain(&self) -> Vec<PendingItem> {
        self.lock().clone()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.lock().iter().any(|i| i.id == id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PendingItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, items: &[PendingItem]) -> Result<()> {
        if items.is_empty() {
            return self.store.remove(&self.key);
        }
        let doc = serde_json::to_string(items)?;
        self.store.set(&self.key, &doc)
    }
}
