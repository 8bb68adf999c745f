//! The wire contract with the backend authority, and its HTTP binding.
//!
//! [`Authority`] abstracts the four remote calls a cycle can make: push,
//! pull, delete, and the health probe that gates automatic syncing.
//! [`HttpAuthority`] binds the trait to the courier-server endpoints via
//! reqwest; tests substitute their own implementations.

use crate::error::{Result, SyncError};
use crate::{Conversation, Entity, EntityId, Message, Version};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Body of `POST /sync/push`: every pending create/update, batched by
/// entity type. Deletes travel separately, one call per entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    /// Client's node id
    pub node_id: String,
    /// Conversations to upsert
    pub conversations: Vec<Conversation>,
    /// Messages to upsert
    pub messages: Vec<Message>,
}

impl PushRequest {
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty() && self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conversations.len() + self.messages.len()
    }
}

/// Response of `POST /sync/push`. A non-2xx status means the whole batch
/// was rejected; on success every submitted entity got a fresh version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    /// Confirmation message
    pub message: String,
    /// The authority's watermark after applying the batch
    pub new_watermark: Version,
    /// Version assigned to each submitted entity, keyed by entity id
    pub versions: HashMap<EntityId, Version>,
}

/// Response of `GET /sync/pull?since_version=N`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    /// Entities with version > since_version, ascending by version
    pub entities: Vec<Entity>,
    /// The authority's current watermark
    pub new_watermark: Version,
    /// Whether another page is available
    pub has_more: bool,
}

/// Response of `DELETE /entities/{id}`. Success and "already absent"
/// both confirm the deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub message: String,
    pub new_watermark: Version,
}

/// The remote calls one sync cycle can make.
#[async_trait]
pub trait Authority: Send + Sync {
    /// Push a batch of creates/updates. Atomic: all stamped or none.
    async fn push(&self, request: PushRequest) -> Result<PushResponse>;

    /// Pull entities with version strictly greater than `since_version`.
    async fn pull(&self, since_version: Version, limit: usize) -> Result<PullResponse>;

    /// Delete one entity. Deleting an unknown or already-deleted id is a
    /// confirmed no-op, not an error.
    async fn delete(&self, entity_id: &str) -> Result<()>;

    /// Probe availability; gates whether automatic syncing starts.
    async fn health(&self) -> Result<()>;
}

/// HTTP binding of [`Authority`] against a courier-server instance.
#[derive(Debug, Clone)]
pub struct HttpAuthority {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAuthority {
    /// Build an authority client with a per-call timeout.
    ///
    /// A timeout fails that call only; the retry policy lives in the
    /// reconciler, not here.
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SyncError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Map a reqwest failure onto the transient side of the taxonomy.
fn request_error(context: &str, err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Timeout(context.to_string())
    } else {
        SyncError::Connection(format!("{context}: {err}"))
    }
}

/// Classify a non-2xx response: 5xx is transient, everything else is a
/// permanent rejection.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    if status.is_server_error() {
        Err(SyncError::Server {
            status: status.as_u16(),
            message,
        })
    } else {
        Err(SyncError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl Authority for HttpAuthority {
    async fn push(&self, request: PushRequest) -> Result<PushResponse> {
        let response = self
            .client
            .post(self.url("/sync/push"))
            .json(&request)
            .send()
            .await
            .map_err(|e| request_error("push", e))?;
        check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| SyncError::InvalidResponse(format!("push: {e}")))
    }

    async fn pull(&self, since_version: Version, limit: usize) -> Result<PullResponse> {
        let response = self
            .client
            .get(self.url("/sync/pull"))
            .query(&[
                ("since_version", since_version.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .map_err(|e| request_error("pull", e))?;
        check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| SyncError::InvalidResponse(format!("pull: {e}")))
    }

    async fn delete(&self, entity_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/entities/{entity_id}")))
            .send()
            .await
            .map_err(|e| request_error("delete", e))?;
        check_status(response).await?;
        Ok(())
    }

    async fn health(&self) -> Result<()> {
        let response = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .map_err(|e| request_error("health", e))?;
        check_status(response).await?;
        Ok(())
    }
}
