//! Chat backend collaborator
//!
//! Architecture follows the project pattern (trait + impl + mock):
//! - `ChatBackend` trait: thread CRUD, message dispatch and history fetch
//! - `HttpChatBackend`: JSON-over-HTTP client with bearer auth
//! - `BeaconTransport` / `HttpBeacon`: fire-and-forget dispatch for flushes
//! - `MockChatBackend` / `RecordingBeacon`: scripted doubles for tests

pub mod beacon;
pub mod client;
pub mod mock;
pub mod models;
pub mod traits;

pub use beacon::HttpBeacon;
pub use client::HttpChatBackend;
pub use mock::{MockChatBackend, MockFetch, MockSendFailure, RecordingBeacon};
pub use models::RawMessage;
pub use traits::{BeaconTransport, ChatBackend};
