//! In-memory mock implementations of `ChatBackend` and `BeaconTransport` for
//! testing without a real backend.

use super::models::RawMessage;
use super::traits::{BeaconTransport, ChatBackend};
use crate::chat::{SendRequest, Thread};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::RwLock;

/// One scripted answer to `fetch_messages`
#[derive(Debug, Clone)]
pub enum MockFetch {
    Messages(Vec<RawMessage>),
    /// Simulated transient failure
    Fail,
}

/// Failure mode for `send_chat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockSendFailure {
    /// Connection-level failure (synchronous rejection)
    Transport,
    /// Server rejected with the given status
    Api(u16),
}

/// Scripted in-memory chat backend.
///
/// History for each thread is a queue of [`MockFetch`] answers consumed one
/// per `fetch_messages` call; the last answer repeats forever.
///
/// # Example
///
/// ```rust
/// use assistant_sync::backend::{ChatBackend, MockChatBackend, RawMessage};
///
/// # tokio_test::block_on(async {
/// let backend = MockChatBackend::new();
/// let thread = backend.create_thread("Hello", "marketing").await.unwrap();
/// backend
///     .set_history(&thread.id, vec![RawMessage::new("human", "Hello")])
///     .await;
/// let history = backend.fetch_messages(&thread.id).await.unwrap();
/// assert_eq!(history.len(), 1);
/// # });
/// ```
#[derive(Default)]
pub struct MockChatBackend {
    threads: RwLock<Vec<Thread>>,
    histories: RwLock<HashMap<String, VecDeque<MockFetch>>>,
    sent: RwLock<Vec<SendRequest>>,
    send_failure: RwLock<Option<MockSendFailure>>,
    fail_thread_creation: AtomicBool,
    fetch_count: AtomicUsize,
    next_thread: AtomicUsize,
}

impl MockChatBackend {
    /// Create a new empty mock backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a thread's history with a single, repeating answer
    pub async fn set_history(&self, thread_id: &str, messages: Vec<RawMessage>) {
        self.script_history(thread_id, vec![MockFetch::Messages(messages)])
            .await;
    }

    /// Replace a thread's history with a sequence of answers
    pub async fn script_history(&self, thread_id: &str, script: Vec<MockFetch>) {
        self.histories
            .write()
            .await
            .insert(thread_id.to_string(), script.into());
    }

    /// Seed an existing thread
    pub async fn insert_thread(&self, thread: Thread) {
        self.threads.write().await.push(thread);
    }

    pub async fn fail_sends(&self, failure: Option<MockSendFailure>) {
        *self.send_failure.write().await = failure;
    }

    pub fn fail_thread_creation(&self, fail: bool) {
        self.fail_thread_creation.store(fail, Ordering::SeqCst);
    }

    /// Requests accepted by `send_chat`, in order
    pub async fn sent_requests(&self) -> Vec<SendRequest> {
        self.sent.read().await.clone()
    }

    /// Total `fetch_messages` calls so far
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    pub async fn threads(&self) -> Vec<Thread> {
        self.threads.read().await.clone()
    }
}

#[async_trait]
impl ChatBackend for MockChatBackend {
    async fn create_thread(&self, title: &str, assistant_type: &str) -> Result<Thread> {
        if self.fail_thread_creation.load(Ordering::SeqCst) {
            return Err(SyncError::Api {
                status: 500,
                message: "thread creation failed".into(),
            });
        }
        let n = self.next_thread.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let thread = Thread {
            id: format!("thread-{}", n),
            title: title.to_string(),
            assistant_type: assistant_type.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.threads.write().await.push(thread.clone());
        Ok(thread)
    }

    async fn list_threads(&self, assistant_type: &str) -> Result<Vec<Thread>> {
        Ok(self
            .threads
            .read()
            .await
            .iter()
            .filter(|t| t.assistant_type == assistant_type)
            .cloned()
            .collect())
    }

    async fn rename_thread(&self, thread_id: &str, title: &str) -> Result<Thread> {
        let mut threads = self.threads.write().await;
        let thread = threads
            .iter_mut()
            .find(|t| t.id == thread_id)
            .ok_or_else(|| SyncError::Api {
                status: 404,
                message: format!("thread {} not found", thread_id),
            })?;
        thread.title = title.to_string();
        thread.touch();
        Ok(thread.clone())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.threads.write().await.retain(|t| t.id != thread_id);
        self.histories.write().await.remove(thread_id);
        Ok(())
    }

    async fn send_chat(&self, request: &SendRequest) -> Result<()> {
        match *self.send_failure.read().await {
            Some(MockSendFailure::Transport) => {
                Err(SyncError::Transport("connection refused".into()))
            }
            Some(MockSendFailure::Api(status)) => Err(SyncError::Api {
                status,
                message: "rejected".into(),
            }),
            None => {
                self.sent.write().await.push(request.clone());
                Ok(())
            }
        }
    }

    async fn fetch_messages(&self, thread_id: &str) -> Result<Vec<RawMessage>> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        let mut histories = self.histories.write().await;
        let Some(script) = histories.get_mut(thread_id) else {
            return Ok(Vec::new());
        };
        let answer = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        match answer {
            Some(MockFetch::Messages(messages)) => Ok(messages),
            Some(MockFetch::Fail) => Err(SyncError::Transport("simulated fetch failure".into())),
            None => Ok(Vec::new()),
        }
    }
}

/// Beacon that records payloads instead of sending them
#[derive(Default)]
pub struct RecordingBeacon {
    sent: Mutex<Vec<SendRequest>>,
}

impl RecordingBeacon {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SendRequest> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl BeaconTransport for RecordingBeacon {
    fn send_beacon(&self, request: &SendRequest) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
    }
}
