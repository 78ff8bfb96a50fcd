//! Chat module: message delivery and reply synchronization
//!
//! Provides the [`ChatEngine`] facade, the send pipeline it drives, and the
//! per-thread conversation state the rendering surface displays.

pub mod config;
pub mod engine;
pub mod pipeline;
pub mod store;
pub mod types;

pub use config::ChatConfig;
pub use engine::ChatEngine;
pub use pipeline::SendPipeline;
pub use store::{ConversationStore, ViewMode};
pub use types::{thread_title, ChatMessage, Role, SendOutcome, SendRequest, Thread};
