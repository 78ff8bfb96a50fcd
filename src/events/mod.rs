//! Sync event system for the rendering surface
//!
//! This module provides:
//! - `SyncEvent`: typed state changes emitted by the engine
//! - `EventBus`: broadcast channel distributing them to observers

mod bus;
mod types;

pub use bus::EventBus;
pub use types::SyncEvent;
