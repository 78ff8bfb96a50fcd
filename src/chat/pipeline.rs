//! Send pipeline
//!
//! Turns a line of user text into a queued, dispatched message and an armed
//! poll. Ordering within one send is fixed: echo, thread resolution,
//! baseline snapshot, enqueue, dispatch, poll arming. Sends are serialized by
//! a reentrancy flag; a trigger arriving while another send is in flight is
//! dropped with [`SendOutcome::Busy`].

use super::config::ChatConfig;
use super::store::ConversationStore;
use super::types::{thread_title, ChatMessage, SendOutcome, SendRequest};
use crate::auth::SessionProvider;
use crate::backend::ChatBackend;
use crate::error::{Result, SyncError};
use crate::events::{EventBus, SyncEvent};
use crate::poll::PollScheduler;
use crate::queue::{PendingItem, PendingQueue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Text shown in the thread when there is no session
pub const SIGN_IN_REQUIRED: &str = "You need to be signed in to send messages.";

/// Clears the in-flight flag when the send finishes, however it finishes
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SendPipeline {
    assistant_type: String,
    title_max_chars: usize,
    backend: Arc<dyn ChatBackend>,
    sessions: Arc<dyn SessionProvider>,
    store: Arc<ConversationStore>,
    queue: Arc<PendingQueue>,
    poll: Arc<PollScheduler>,
    events: EventBus,
    in_flight: AtomicBool,
}

impl SendPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &ChatConfig,
        backend: Arc<dyn ChatBackend>,
        sessions: Arc<dyn SessionProvider>,
        store: Arc<ConversationStore>,
        queue: Arc<PendingQueue>,
        poll: Arc<PollScheduler>,
        events: EventBus,
    ) -> Self {
        Self {
            assistant_type: config.assistant_type.clone(),
            title_max_chars: config.title_max_chars,
            backend,
            sessions,
            store,
            queue,
            poll,
            events,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Whether a send is currently in flight
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Send `text` to `thread_id`, creating a thread when there is none.
    ///
    /// Returns `Err(SyncError::Unauthenticated)` when there is no session;
    /// no payload is created in that case. Dispatch failures are not errors:
    /// the item stays queued and the outcome reports `dispatched: false`.
    pub async fn send(&self, text: &str, thread_id: Option<&str>) -> Result<SendOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(SendOutcome::Ignored);
        }

        let Some(_in_flight) = InFlight::acquire(&self.in_flight) else {
            debug!("Send already in flight, dropping trigger");
            return Ok(SendOutcome::Busy);
        };

        let Some(session) = self.sessions.current_session().await else {
            warn!(thread_id, "Send rejected: no active session");
            self.store.show_error(thread_id, SIGN_IN_REQUIRED).await;
            self.events.emit(SyncEvent::SendFailed {
                thread_id: thread_id.map(str::to_string),
                client_message_id: None,
                reason: SyncError::Unauthenticated.to_string(),
            });
            return Err(SyncError::Unauthenticated);
        };

        // A new send supersedes whatever was being polled
        self.poll.cancel().await;

        // A placeholder left by a cold resume or an earlier send is stale now
        self.store.strip_processing(thread_id).await;

        let echo_thread = thread_id.map(str::to_string);
        self.store
            .append_optimistic(
                thread_id,
                vec![
                    ChatMessage::user(text, echo_thread.clone()),
                    ChatMessage::processing(echo_thread),
                ],
            )
            .await;

        let thread_id = match thread_id {
            Some(id) => Some(id.to_string()),
            None => self.create_thread(text).await,
        };

        let baseline = self.store.baseline(thread_id.as_deref()).await;

        let request = SendRequest {
            message: text.to_string(),
            thread_id: thread_id.clone(),
            user_id: session.user_id,
            assistant_type: self.assistant_type.clone(),
            client_message_id: Uuid::new_v4(),
        };
        let client_message_id = request.client_message_id;

        if let Err(e) = self.queue.enqueue(PendingItem::new(request.clone())) {
            warn!(%client_message_id, "Failed to persist pending item: {}", e);
        }

        let dispatched = self.dispatch(&request).await;

        match thread_id.as_deref() {
            Some(id) => {
                self.poll.start(id, baseline).await;
                self.store.touch_thread(id).await;
            }
            None => {
                warn!(
                    %client_message_id,
                    "No thread resolved; message left queued and no poll armed"
                );
            }
        }

        Ok(SendOutcome::Sent {
            thread_id,
            client_message_id,
            dispatched,
        })
    }

    /// Create a thread titled after `text` and move the draft under it.
    async fn create_thread(&self, text: &str) -> Option<String> {
        let title = thread_title(text, self.title_max_chars);
        match self.backend.create_thread(&title, &self.assistant_type).await {
            Ok(thread) => {
                info!(thread_id = %thread.id, title = %thread.title, "Thread created");
                let id = thread.id.clone();
                self.store.upsert_thread(thread).await;
                self.store.adopt_draft(&id).await;
                Some(id)
            }
            Err(e) => {
                warn!("Thread creation failed, continuing without a thread: {}", e);
                None
            }
        }
    }

    /// Attempt the primary transport once. Returns whether it acknowledged.
    async fn dispatch(&self, request: &SendRequest) -> bool {
        let client_message_id = request.client_message_id;
        match self.backend.send_chat(request).await {
            Ok(()) => {
                debug!(%client_message_id, "Dispatch acknowledged");
                if let Err(e) = self.queue.dequeue(client_message_id) {
                    warn!(%client_message_id, "Failed to dequeue dispatched item: {}", e);
                }
                true
            }
            Err(e) if e.is_synchronous_rejection() => {
                warn!(%client_message_id, "Dispatch rejected: {}", e);
                let thread_id = request.thread_id.as_deref();
                self.store
                    .show_error(thread_id, &format!("Failed to send message: {}", e))
                    .await;
                self.events.emit(SyncEvent::SendFailed {
                    thread_id: request.thread_id.clone(),
                    client_message_id: Some(client_message_id),
                    reason: e.to_string(),
                });
                false
            }
            Err(e) => {
                // The server saw the request; the reply may still arrive
                warn!(%client_message_id, "Dispatch failed after connect, item stays queued: {}", e);
                false
            }
        }
    }
}
