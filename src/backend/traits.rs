//! Trait abstractions for the chat backend and the teardown-safe transport

use super::models::RawMessage;
use crate::chat::{SendRequest, Thread};
use crate::error::Result;
use async_trait::async_trait;

/// Request/response endpoints of the chat backend.
///
/// Every call is authenticated; implementations return
/// [`SyncError::Unauthenticated`](crate::SyncError::Unauthenticated) when no
/// session is available.
///
/// # Implementations
///
/// - [`HttpChatBackend`](super::HttpChatBackend): JSON over HTTP with a bearer token
/// - [`MockChatBackend`](super::MockChatBackend): scripted in-memory backend (for tests)
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// `POST /threads`
    async fn create_thread(&self, title: &str, assistant_type: &str) -> Result<Thread>;

    /// `GET /threads?assistant_type=`
    async fn list_threads(&self, assistant_type: &str) -> Result<Vec<Thread>>;

    /// `PATCH /threads`
    async fn rename_thread(&self, thread_id: &str, title: &str) -> Result<Thread>;

    /// `DELETE /threads`
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;

    /// `POST /chat`: accepted asynchronously; the reply shows up later in
    /// the thread history.
    async fn send_chat(&self, request: &SendRequest) -> Result<()>;

    /// `GET /messages?threadId=`: full raw history of a thread
    async fn fetch_messages(&self, thread_id: &str) -> Result<Vec<RawMessage>>;
}

/// Best-effort transport used when the process may be about to stop.
///
/// `send_beacon` must not block and must not require the caller to await a
/// response: delivery is assumed, never confirmed.
pub trait BeaconTransport: Send + Sync {
    fn send_beacon(&self, request: &SendRequest);
}
