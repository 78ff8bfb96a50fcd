//! Session lookup for outbound requests.
//!
//! The sync engine never performs a login flow itself: it asks the external
//! session service for the current bearer token and user id before every
//! request, and aborts when there is none.

use async_trait::async_trait;
use std::fmt;
use tokio::sync::RwLock;

/// Identity attached to every backend request
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    /// Bearer token sent as `Authorization: Bearer <token>`
    pub access_token: String,
    /// Caller identity carried in `POST /chat` bodies
    pub user_id: String,
}

impl Session {
    pub fn new(access_token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            user_id: user_id.into(),
        }
    }
}

// Never print the token.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Source of the current session
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// The current session, or `None` when signed out / expired.
    async fn current_session(&self) -> Option<Session>;
}

/// Session provider holding a fixed (replaceable) session.
///
/// Used by the CLI (token from config/env) and by tests to simulate
/// sign-out.
#[derive(Default)]
pub struct StaticSessionProvider {
    session: RwLock<Option<Session>>,
}

impl StaticSessionProvider {
    pub fn new(session: Option<Session>) -> Self {
        Self {
            session: RwLock::new(session),
        }
    }

    /// Build from an optional token/user pair; both must be non-empty.
    pub fn from_parts(access_token: Option<String>, user_id: Option<String>) -> Self {
        let session = match (access_token, user_id) {
            (Some(token), Some(user)) if !token.is_empty() && !user.is_empty() => {
                Some(Session::new(token, user))
            }
            _ => None,
        };
        Self::new(session)
    }

    pub async fn set_session(&self, session: Option<Session>) {
        *self.session.write().await = session;
    }
}

#[async_trait]
impl SessionProvider for StaticSessionProvider {
    async fn current_session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }
}
