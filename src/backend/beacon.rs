//! Fire-and-forget HTTP transport for lifecycle flushes
//!
//! Posts the pending payload to `POST /chat` on a detached task. Errors are
//! logged but never reach the caller, and nothing waits for the response.
//!
//! Detached tasks live on the caller's runtime and die with it. A process
//! about to exit calls [`HttpBeacon::settle`] first so requests already
//! handed off get a bounded window to land.

use super::traits::BeaconTransport;
use crate::auth::SessionProvider;
use crate::chat::SendRequest;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Detached-request beacon targeting the backend's chat endpoint
#[derive(Clone)]
pub struct HttpBeacon {
    client: reqwest::Client,
    url: String,
    sessions: Arc<dyn SessionProvider>,
    tracker: TaskTracker,
}

impl HttpBeacon {
    /// Create a beacon for the backend rooted at `base_url`.
    ///
    /// Uses a short timeout: the request either goes out right away or not
    /// at all.
    pub fn new(base_url: &str, sessions: Arc<dyn SessionProvider>) -> Self {
        // Builder only fails on TLS backend init; fall back to defaults then.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();

        let url = format!("{}/chat", base_url.trim_end_matches('/'));

        Self {
            client,
            url,
            sessions,
            tracker: TaskTracker::new(),
        }
    }

    /// Beacons handed off and not finished yet
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait up to `grace` for in-flight beacons. Returns whether all of them
    /// finished in time.
    pub async fn settle(&self, grace: Duration) -> bool {
        self.tracker.close();
        let settled = tokio::time::timeout(grace, self.tracker.wait())
            .await
            .is_ok();
        self.tracker.reopen();

        if !settled {
            warn!(
                in_flight = self.tracker.len(),
                "Beacons still in flight after grace period"
            );
        }
        settled
    }
}

impl BeaconTransport for HttpBeacon {
    fn send_beacon(&self, request: &SendRequest) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                client_message_id = %request.client_message_id,
                "No async runtime available, beacon dropped"
            );
            return;
        };

        let client = self.client.clone();
        let url = self.url.clone();
        let sessions = self.sessions.clone();
        let request = request.clone();

        self.tracker.spawn_on(
            async move {
                let mut req = client.post(&url).json(&request);
                if let Some(session) = sessions.current_session().await {
                    req = req.bearer_auth(session.access_token);
                }
                match req.send().await {
                    Ok(response) => debug!(
                        client_message_id = %request.client_message_id,
                        status = %response.status(),
                        "Beacon delivered"
                    ),
                    Err(e) => warn!(
                        url = %url,
                        client_message_id = %request.client_message_id,
                        "Beacon delivery failed: {}",
                        e
                    ),
                }
            },
            &runtime,
        );
    }
}
