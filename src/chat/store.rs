//! Conversation store: the state the rendering surface displays
//!
//! Keeps one message list per thread (plus a draft list for a conversation
//! whose thread doesn't exist yet) and the known thread metadata. A list is
//! either *optimistic* (local echo + placeholder on top of what was shown) or
//! *authoritative* (a normalized server snapshot). Reconciliation replaces a
//! list wholesale; nothing is ever patched into an authoritative snapshot.
//!
//! Every change to a list is published as `SyncEvent::MessagesReplaced`.

use super::types::{ChatMessage, Thread};
use crate::events::{EventBus, SyncEvent};
use crate::normalizer::{collapse_adjacent_duplicates, latest_assistant_content};
use crate::poll::PollBaseline;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Provenance of a thread's displayed list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Optimistic,
    Authoritative,
}

#[derive(Debug, Clone)]
struct ThreadView {
    mode: ViewMode,
    messages: Vec<ChatMessage>,
}

/// Per-thread message lists and thread metadata
pub struct ConversationStore {
    /// `None` key = draft conversation (no thread yet)
    views: RwLock<HashMap<Option<String>, ThreadView>>,
    threads: RwLock<HashMap<String, Thread>>,
    events: EventBus,
}

impl ConversationStore {
    pub fn new(events: EventBus) -> Self {
        Self {
            views: RwLock::new(HashMap::new()),
            threads: RwLock::new(HashMap::new()),
            events,
        }
    }

    // ========================================================================
    // Message lists
    // ========================================================================

    /// Displayed messages for a thread (`None` = draft)
    pub async fn messages(&self, thread_id: Option<&str>) -> Vec<ChatMessage> {
        self.views
            .read()
            .await
            .get(&thread_id.map(str::to_string))
            .map(|v| v.messages.clone())
            .unwrap_or_default()
    }

    pub async fn mode(&self, thread_id: Option<&str>) -> Option<ViewMode> {
        self.views
            .read()
            .await
            .get(&thread_id.map(str::to_string))
            .map(|v| v.mode)
    }

    /// Append client-authored turns; the list becomes optimistic.
    pub async fn append_optimistic(&self, thread_id: Option<&str>, turns: Vec<ChatMessage>) {
        let key = thread_id.map(str::to_string);
        let snapshot = {
            let mut views = self.views.write().await;
            let view = views.entry(key.clone()).or_insert_with(|| ThreadView {
                mode: ViewMode::Optimistic,
                messages: Vec::new(),
            });
            view.mode = ViewMode::Optimistic;
            view.messages.extend(turns);
            view.messages.clone()
        };
        self.publish(key, snapshot);
    }

    /// Replace a thread's list with a normalized server snapshot.
    pub async fn replace_authoritative(&self, thread_id: &str, snapshot: Vec<ChatMessage>) {
        let key = Some(thread_id.to_string());
        self.views.write().await.insert(
            key.clone(),
            ThreadView {
                mode: ViewMode::Authoritative,
                messages: snapshot.clone(),
            },
        );
        self.publish(key, snapshot);
    }

    /// Move the draft list under a freshly created thread id.
    pub async fn adopt_draft(&self, thread_id: &str) {
        let key = Some(thread_id.to_string());
        let snapshot = {
            let mut views = self.views.write().await;
            let Some(mut draft) = views.remove(&None) else {
                return;
            };
            for m in &mut draft.messages {
                m.thread_id = key.clone();
            }
            let snapshot = draft.messages.clone();
            views.insert(key.clone(), draft);
            snapshot
        };
        self.publish(key, snapshot);
    }

    /// Remove every "processing" placeholder. Returns whether any was present.
    pub async fn strip_processing(&self, thread_id: Option<&str>) -> bool {
        let key = thread_id.map(str::to_string);
        let snapshot = {
            let mut views = self.views.write().await;
            let Some(view) = views.get_mut(&key) else {
                return false;
            };
            let before = view.messages.len();
            view.messages.retain(|m| !m.is_processing);
            if view.messages.len() == before {
                return false;
            }
            view.messages.clone()
        };
        self.publish(key, snapshot);
        true
    }

    /// Show `text` as an assistant-turn error, in place of the latest
    /// placeholder if there is one, appended otherwise.
    pub async fn show_error(&self, thread_id: Option<&str>, text: &str) {
        let key = thread_id.map(str::to_string);
        let snapshot = {
            let mut views = self.views.write().await;
            let view = views.entry(key.clone()).or_insert_with(|| ThreadView {
                mode: ViewMode::Optimistic,
                messages: Vec::new(),
            });
            let error = ChatMessage::error(text, key.clone());
            match view.messages.iter().rposition(|m| m.is_processing) {
                Some(idx) => view.messages[idx] = error,
                None => view.messages.push(error),
            }
            view.mode = ViewMode::Optimistic;
            view.messages.clone()
        };
        self.publish(key, snapshot);
    }

    /// Novelty baseline: count of real (non-synthetic) displayed turns and
    /// the newest real assistant content.
    ///
    /// Turns are counted the way the normalizer counts a server snapshot,
    /// with adjacent identical turns collapsed.
    pub async fn baseline(&self, thread_id: Option<&str>) -> PollBaseline {
        let views = self.views.read().await;
        let Some(view) = views.get(&thread_id.map(str::to_string)) else {
            return PollBaseline::default();
        };
        let real: Vec<ChatMessage> = view
            .messages
            .iter()
            .filter(|m| !m.is_synthetic())
            .cloned()
            .collect();
        PollBaseline {
            message_count: collapse_adjacent_duplicates(real).len(),
            last_assistant_content: latest_assistant_content(&view.messages).map(str::to_string),
        }
    }

    /// Forget a thread's list and metadata.
    pub async fn remove_thread(&self, thread_id: &str) {
        self.views.write().await.remove(&Some(thread_id.to_string()));
        self.threads.write().await.remove(thread_id);
    }

    // ========================================================================
    // Thread metadata
    // ========================================================================

    pub async fn upsert_thread(&self, thread: Thread) {
        self.threads.write().await.insert(thread.id.clone(), thread);
    }

    /// Replace all known threads (after a listing).
    pub async fn set_threads(&self, threads: Vec<Thread>) {
        let map = threads.into_iter().map(|t| (t.id.clone(), t)).collect();
        *self.threads.write().await = map;
    }

    /// Refresh a thread's `updated_at`. Returns false for unknown threads.
    pub async fn touch_thread(&self, thread_id: &str) -> bool {
        match self.threads.write().await.get_mut(thread_id) {
            Some(thread) => {
                thread.touch();
                true
            }
            None => false,
        }
    }

    pub async fn thread(&self, thread_id: &str) -> Option<Thread> {
        self.threads.read().await.get(thread_id).cloned()
    }

    /// Known threads, most recently updated first
    pub async fn threads(&self) -> Vec<Thread> {
        let mut threads: Vec<Thread> = self.threads.read().await.values().cloned().collect();
        threads.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        threads
    }

    fn publish(&self, thread_id: Option<String>, messages: Vec<ChatMessage>) {
        self.events
            .emit(SyncEvent::MessagesReplaced { thread_id, messages });
    }
}
