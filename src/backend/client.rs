//! HTTP implementation of `ChatBackend`
//!
//! All endpoints are JSON over HTTP relative to a base URL
//! (e.g. `https://dashboard.example.com/api`), authenticated with the bearer
//! token of the current session.

use super::models::{
    CreateThreadBody, DeleteThreadBody, MessageListEnvelope, RawMessage, RenameThreadBody,
    ThreadEnvelope, ThreadListEnvelope,
};
use super::traits::ChatBackend;
use crate::auth::SessionProvider;
use crate::chat::{SendRequest, Thread};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// HTTP chat backend client.
///
/// Cheaply cloneable (shares the reqwest client internally).
#[derive(Clone)]
pub struct HttpChatBackend {
    client: reqwest::Client,
    base_url: String,
    sessions: Arc<dyn SessionProvider>,
}

impl HttpChatBackend {
    /// Create a backend client for `base_url` with a per-request timeout.
    pub fn new(
        base_url: &str,
        timeout: Duration,
        sessions: Arc<dyn SessionProvider>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            sessions,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Attach the bearer token, or fail before anything is sent.
    async fn authed(&self, req: RequestBuilder) -> Result<RequestBuilder> {
        let session = self
            .sessions
            .current_session()
            .await
            .ok_or(SyncError::Unauthenticated)?;
        Ok(req.bearer_auth(session.access_token))
    }

    /// Send the request and map failures onto the error taxonomy.
    async fn execute(&self, req: RequestBuilder) -> Result<Response> {
        let response = self
            .authed(req)
            .await?
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| SyncError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn create_thread(&self, title: &str, assistant_type: &str) -> Result<Thread> {
        let body = CreateThreadBody {
            title,
            assistant_type,
        };
        let response = self
            .execute(self.client.post(self.url("/threads")).json(&body))
            .await?;
        let envelope: ThreadEnvelope = Self::decode(response).await?;
        debug!(thread_id = %envelope.thread.id, "Thread created");
        Ok(envelope.thread)
    }

    async fn list_threads(&self, assistant_type: &str) -> Result<Vec<Thread>> {
        let response = self
            .execute(
                self.client
                    .get(self.url("/threads"))
                    .query(&[("assistant_type", assistant_type)]),
            )
            .await?;
        let envelope: ThreadListEnvelope = Self::decode(response).await?;
        Ok(envelope.threads)
    }

    async fn rename_thread(&self, thread_id: &str, title: &str) -> Result<Thread> {
        let body = RenameThreadBody { thread_id, title };
        let response = self
            .execute(self.client.patch(self.url("/threads")).json(&body))
            .await?;
        let envelope: ThreadEnvelope = Self::decode(response).await?;
        Ok(envelope.thread)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let body = DeleteThreadBody { thread_id };
        self.execute(self.client.delete(self.url("/threads")).json(&body))
            .await?;
        Ok(())
    }

    async fn send_chat(&self, request: &SendRequest) -> Result<()> {
        // 202-style: the body (if any) carries nothing we need.
        self.execute(self.client.post(self.url("/chat")).json(request))
            .await?;
        debug!(
            client_message_id = %request.client_message_id,
            "Chat message accepted by backend"
        );
        Ok(())
    }

    async fn fetch_messages(&self, thread_id: &str) -> Result<Vec<RawMessage>> {
        let response = self
            .execute(
                self.client
                    .get(self.url("/messages"))
                    .query(&[("threadId", thread_id)]),
            )
            .await?;
        let envelope: MessageListEnvelope = Self::decode(response).await?;
        Ok(envelope.messages)
    }
}
