//! Authentication collaborator
//!
//! Provides the session (bearer token + user id) attached to backend
//! requests. Login flows live outside this crate.

pub mod session;

pub use session::{Session, SessionProvider, StaticSessionProvider};
