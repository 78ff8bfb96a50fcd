//! Event types observed by the rendering surface

use crate::chat::ChatMessage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// State changes produced by the sync engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// The displayed list for a thread changed (echo, reconciliation,
    /// placeholder removal). Carries the full list: consumers replace, never
    /// patch.
    MessagesReplaced {
        /// `None` for the draft conversation that has no thread yet
        thread_id: Option<String>,
        messages: Vec<ChatMessage>,
    },
    /// A poll found a new assistant reply
    PollResolved { thread_id: String, cycles: u32 },
    /// A poll gave up after the cycle cap
    PollTimedOut { thread_id: String, cycles: u32 },
    /// A poll was cancelled by a thread switch or a new send
    PollSuperseded { thread_id: String },
    /// A send was rejected synchronously; the reason is shown in the thread
    SendFailed {
        thread_id: Option<String>,
        client_message_id: Option<Uuid>,
        reason: String,
    },
    /// Pending items were handed to a transport by a lifecycle flush
    QueueFlushed { count: usize, confirmed: bool },
}

impl SyncEvent {
    /// Event type name (matches the serialized `type` tag)
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::MessagesReplaced { .. } => "messages_replaced",
            SyncEvent::PollResolved { .. } => "poll_resolved",
            SyncEvent::PollTimedOut { .. } => "poll_timed_out",
            SyncEvent::PollSuperseded { .. } => "poll_superseded",
            SyncEvent::SendFailed { .. } => "send_failed",
            SyncEvent::QueueFlushed { .. } => "queue_flushed",
        }
    }
}
