//! Durable pending queue: outbound messages not yet confirmed dispatched

pub mod pending;
pub mod store;

pub use pending::{PendingItem, PendingQueue, PENDING_QUEUE_KEY};
pub use store::{FileStore, KeyValueStore, MemoryStore};
