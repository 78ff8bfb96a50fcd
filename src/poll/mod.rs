//! Reply polling
//!
//! This module provides:
//! - `PollScheduler`: the single armed timer that re-fetches a thread's history
//! - `PollState` / `PollBaseline`: what the client had already seen
//! - `Visibility`: host foreground/background state gating fetches

mod scheduler;
mod state;

pub use scheduler::PollScheduler;
pub use state::{Observation, PollBaseline, PollOutcome, PollState, Visibility};
