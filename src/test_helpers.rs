//! Test helper factories and mock engine builders
//!
//! Provides convenience functions for creating test objects with sensible
//! defaults, and a helper wiring a [`ChatEngine`] over in-memory backends.
#![allow(dead_code)]

use crate::auth::{Session, StaticSessionProvider};
use crate::backend::{MockChatBackend, RawMessage, RecordingBeacon};
use crate::chat::{ChatConfig, ChatEngine, SendRequest, Thread};
use crate::queue::MemoryStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// Factories
// ============================================================================

pub fn raw(role: &str, content: &str) -> RawMessage {
    RawMessage::new(role, content)
}

pub fn send_request(message: &str, thread_id: Option<&str>) -> SendRequest {
    SendRequest {
        message: message.to_string(),
        thread_id: thread_id.map(str::to_string),
        user_id: "user-1".to_string(),
        assistant_type: "marketing".to_string(),
        client_message_id: Uuid::new_v4(),
    }
}

pub fn sample_thread(id: &str, title: &str) -> Thread {
    let now = Utc::now();
    Thread {
        id: id.to_string(),
        title: title.to_string(),
        assistant_type: "marketing".to_string(),
        created_at: now,
        updated_at: now,
    }
}

/// Chat config with the production cadence (1.5s × 80, 500ms arm delay)
pub fn test_chat_config() -> ChatConfig {
    ChatConfig {
        assistant_type: "marketing".to_string(),
        poll_interval: Duration::from_millis(1500),
        max_poll_cycles: 80,
        poll_arm_delay: Duration::from_millis(500),
        title_max_chars: 50,
    }
}

// ============================================================================
// Mock engine builder
// ============================================================================

/// Everything a test needs to drive and inspect an engine
pub struct MockEngine {
    pub engine: ChatEngine,
    pub backend: Arc<MockChatBackend>,
    pub beacon: Arc<RecordingBeacon>,
    pub sessions: Arc<StaticSessionProvider>,
    pub store: MemoryStore,
}

/// Signed-in engine over a fresh mock backend and memory store
pub fn mock_engine() -> MockEngine {
    mock_engine_with_store(MemoryStore::new())
}

/// Signed-in engine over `store` (pass a clone to simulate a restart)
pub fn mock_engine_with_store(store: MemoryStore) -> MockEngine {
    let backend = Arc::new(MockChatBackend::new());
    let beacon = Arc::new(RecordingBeacon::new());
    let sessions = Arc::new(StaticSessionProvider::new(Some(Session::new(
        "test-token",
        "user-1",
    ))));
    let engine = ChatEngine::new(
        test_chat_config(),
        backend.clone(),
        beacon.clone(),
        sessions.clone(),
        Arc::new(store.clone()),
    );

    MockEngine {
        engine,
        backend,
        beacon,
        sessions,
        store,
    }
}
