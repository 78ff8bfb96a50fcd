//! Chat types: threads, messages and the outbound send payload

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Map a backend role label to the canonical role.
    ///
    /// The backend mixes vocabularies (`human`/`ai` from the agent framework,
    /// `user`/`assistant` from the chat API); matching is case-insensitive.
    /// Returns `None` for labels with no user-visible meaning (`tool`,
    /// `function`, ...).
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "user" | "human" => Some(Role::User),
            "assistant" | "ai" | "bot" | "model" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// A persistent conversation context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "assistant_type")]
    pub assistant_type: String,
    #[serde(default = "Utc::now", alias = "created_at")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now", alias = "updated_at")]
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    /// Refresh `updated_at` after a successful send
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// A message as displayed to the user.
///
/// Optimistic messages (the local echo and the "processing" placeholder) and
/// authoritative ones (reconciled from a server snapshot) share this type;
/// the flags tell the rendering surface which is which.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Synthetic placeholder shown while the assistant reply is computed
    #[serde(default)]
    pub is_processing: bool,
    /// Client-side failure text shown in place of a reply
    #[serde(default)]
    pub is_error: bool,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>, thread_id: Option<String>) -> Self {
        Self {
            role,
            content: content.into(),
            thread_id,
            is_processing: false,
            is_error: false,
        }
    }

    pub fn user(content: impl Into<String>, thread_id: Option<String>) -> Self {
        Self::new(Role::User, content, thread_id)
    }

    pub fn assistant(content: impl Into<String>, thread_id: Option<String>) -> Self {
        Self::new(Role::Assistant, content, thread_id)
    }

    /// The "processing" placeholder appended after the user's echo
    pub fn processing(thread_id: Option<String>) -> Self {
        Self {
            is_processing: true,
            ..Self::new(Role::Assistant, "", thread_id)
        }
    }

    /// Assistant-turn error text surfaced to the user
    pub fn error(content: impl Into<String>, thread_id: Option<String>) -> Self {
        Self {
            is_error: true,
            ..Self::new(Role::Assistant, content, thread_id)
        }
    }

    /// True for turns that exist only on the client and never on the server
    pub fn is_synthetic(&self) -> bool {
        self.is_processing || self.is_error
    }
}

/// Body of `POST /chat`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub message: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    pub user_id: String,
    pub assistant_type: String,
    /// Idempotency key: a retried dispatch carries the same id
    pub client_message_id: Uuid,
}

/// Result of a [`SendPipeline::send`](super::SendPipeline::send) call
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// The message was accepted locally: queued, dispatch attempted, poll armed
    /// (when a thread could be resolved).
    Sent {
        thread_id: Option<String>,
        client_message_id: Uuid,
        /// Whether the primary transport acknowledged the dispatch
        dispatched: bool,
    },
    /// Another send is in flight; this trigger was dropped
    Busy,
    /// Empty input; nothing happened
    Ignored,
}

/// Title for a lazily created thread: the first `max_chars` characters of the
/// message, trimmed.
pub fn thread_title(message: &str, max_chars: usize) -> String {
    let trimmed = message.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((idx, _)) => trimmed[..idx].trim_end().to_string(),
        None => trimmed.to_string(),
    }
}
