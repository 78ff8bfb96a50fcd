//! Lifecycle flush controller
//!
//! Reacts to host lifecycle signals:
//! - `Hidden` / `Unload`: every pending item is handed to the beacon
//!   transport and removed from the queue without waiting for delivery
//! - `Visible`: polling resumes fetching on its next cycle
//!
//! On startup, leftovers from a previous run are re-sent through the normal
//! confirmable transport and only acknowledged items are removed.

use crate::backend::{BeaconTransport, ChatBackend};
use crate::events::{EventBus, SyncEvent};
use crate::poll::Visibility;
use crate::queue::PendingQueue;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Host lifecycle transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleSignal {
    Hidden,
    Visible,
    Unload,
}

/// What a flush did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Items handed to a transport
    pub attempted: usize,
    /// Items removed from the queue
    pub removed: usize,
    /// Items still queued afterwards
    pub remaining: usize,
    /// Whether removal was backed by an acknowledgment
    pub confirmed: bool,
}

pub struct FlushController {
    queue: Arc<PendingQueue>,
    backend: Arc<dyn ChatBackend>,
    beacon: Arc<dyn BeaconTransport>,
    visibility: watch::Sender<Visibility>,
    events: EventBus,
}

impl FlushController {
    pub fn new(
        queue: Arc<PendingQueue>,
        backend: Arc<dyn ChatBackend>,
        beacon: Arc<dyn BeaconTransport>,
        visibility: watch::Sender<Visibility>,
        events: EventBus,
    ) -> Self {
        Self {
            queue,
            backend,
            beacon,
            visibility,
            events,
        }
    }

    /// Current host visibility
    pub fn visibility(&self) -> Visibility {
        *self.visibility.borrow()
    }

    /// Re-send leftovers from a previous run through the primary transport.
    pub async fn recover_on_startup(&self) -> FlushReport {
        let items = self.queue.drain();
        if items.is_empty() {
            return FlushReport {
                confirmed: true,
                ..FlushReport::default()
            };
        }

        info!(count = items.len(), "Recovering pending messages from a previous run");
        let mut removed = 0;
        for item in &items {
            match self.backend.send_chat(&item.payload).await {
                Ok(()) => match self.queue.dequeue(item.id) {
                    Ok(_) => removed += 1,
                    Err(e) => warn!(client_message_id = %item.id, "Failed to dequeue recovered item: {}", e),
                },
                Err(e) => {
                    warn!(client_message_id = %item.id, "Recovery dispatch failed, keeping item: {}", e);
                }
            }
        }

        self.events.emit(SyncEvent::QueueFlushed {
            count: removed,
            confirmed: true,
        });
        FlushReport {
            attempted: items.len(),
            removed,
            remaining: self.queue.len(),
            confirmed: true,
        }
    }

    /// Apply a lifecycle signal.
    pub async fn handle(&self, signal: LifecycleSignal) -> FlushReport {
        debug!(?signal, "Lifecycle signal");
        match signal {
            LifecycleSignal::Visible => {
                self.visibility.send_replace(Visibility::Visible);
                FlushReport {
                    remaining: self.queue.len(),
                    ..FlushReport::default()
                }
            }
            LifecycleSignal::Hidden => {
                self.visibility.send_replace(Visibility::Hidden);
                self.flush_best_effort()
            }
            LifecycleSignal::Unload => self.flush_best_effort(),
        }
    }

    /// Apply signals from `signals` until the sender closes or `Unload`
    /// arrives.
    pub async fn run(&self, mut signals: mpsc::Receiver<LifecycleSignal>) {
        while let Some(signal) = signals.recv().await {
            self.handle(signal).await;
            if signal == LifecycleSignal::Unload {
                break;
            }
        }
        debug!("Lifecycle loop stopped");
    }

    /// Beacon every pending item and drop it from the queue.
    ///
    /// Delivery is assumed: nothing is awaited and a beacon that later fails
    /// loses the message.
    fn flush_best_effort(&self) -> FlushReport {
        let items = self.queue.drain();
        let mut removed = 0;
        for item in &items {
            self.beacon.send_beacon(&item.payload);
            match self.queue.dequeue(item.id) {
                Ok(_) => removed += 1,
                Err(e) => warn!(client_message_id = %item.id, "Failed to dequeue flushed item: {}", e),
            }
        }

        if !items.is_empty() {
            info!(count = items.len(), "Pending queue flushed via beacon");
            self.events.emit(SyncEvent::QueueFlushed {
                count: items.len(),
                confirmed: false,
            });
        }
        FlushReport {
            attempted: items.len(),
            removed,
            remaining: self.queue.len(),
            confirmed: false,
        }
    }
}
