//! Error types for the sync engine.

/// Errors raised while delivering messages or talking to the chat backend.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// No valid session: the operation is aborted before any payload exists.
    #[error("not authenticated: no active session")]
    Unauthenticated,

    /// The request never reached the server (connection refused, DNS, timeout
    /// before any response).
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a non-success status.
    #[error("backend returned {status}: {message}")]
    Api { status: u16, message: String },

    /// The server answered but the body could not be decoded.
    #[error("failed to decode backend response: {0}")]
    Decode(String),

    /// Durable store I/O error.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Durable store (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// True when the request was rejected before the server acknowledged it.
    ///
    /// Only these failures are surfaced to the user in place of the
    /// "processing" placeholder; anything else may still have been accepted
    /// server-side and is left to the poll.
    pub fn is_synchronous_rejection(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Unauthenticated)
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synchronous_rejection_classification() {
        assert!(SyncError::Transport("connection refused".into()).is_synchronous_rejection());
        assert!(SyncError::Unauthenticated.is_synchronous_rejection());
        assert!(!SyncError::Api {
            status: 500,
            message: "boom".into()
        }
        .is_synchronous_rejection());
        assert!(!SyncError::Decode("bad json".into()).is_synchronous_rejection());
    }

    #[test]
    fn test_display_includes_status() {
        let err = SyncError::Api {
            status: 503,
            message: "worker offline".into(),
        };
        assert_eq!(err.to_string(), "backend returned 503: worker offline");
    }
}
