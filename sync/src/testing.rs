//! Test doubles shared by the reconciler and coordinator tests.

use crate::changelog::ChangeLogEntry;
use crate::error::{Result, SyncError};
use crate::store::{LocalStore, MemoryStore};
use crate::transport::{Authority, PullResponse, PushRequest, PushResponse};
use crate::{ChangeOp, Entity, EntityType, Timestamp, Version};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct MockState {
    entities: BTreeMap<String, Entity>,
    version_counter: Version,
}

impl MockState {
    fn stamp(&mut self, mut entity: Entity) -> Version {
        self.version_counter += 1;
        entity.set_version(self.version_counter);
        self.entities.insert(entity.id().clone(), entity);
        self.version_counter
    }
}

/// An in-memory backend authority mimicking courier-server semantics:
/// a single global version counter, tombstoned deletes, paged pulls.
#[derive(Default)]
pub struct MockAuthority {
    state: Mutex<MockState>,
    /// When set, push calls fail with a clone of this error.
    pub fail_push: Mutex<Option<SyncError>>,
    /// When set, pull calls fail with a clone of this error.
    pub fail_pull: Mutex<Option<SyncError>>,
    /// Artificial latency added to push and pull.
    pub latency: Mutex<Duration>,
    pub push_calls: AtomicUsize,
    pub pull_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    /// since_version of every pull received, in order.
    pub pull_since: Mutex<Vec<Version>>,
}

impl MockAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preload backend state, stamping the entity with the next version.
    pub async fn seed(&self, entity: Entity) -> Version {
        self.state.lock().await.stamp(entity)
    }

    /// Preload backend state with an explicit version.
    pub async fn seed_with_version(&self, mut entity: Entity, version: Version) {
        let mut state = self.state.lock().await;
        entity.set_version(version);
        state.entities.insert(entity.id().clone(), entity);
        state.version_counter = state.version_counter.max(version);
    }

    pub async fn set_fail_push(&self, error: Option<SyncError>) {
        *self.fail_push.lock().await = error;
    }

    pub async fn set_latency(&self, latency: Duration) {
        *self.latency.lock().await = latency;
    }

    pub async fn entity(&self, id: &str) -> Option<Entity> {
        self.state.lock().await.entities.get(id).cloned()
    }
}

#[async_trait]
impl Authority for MockAuthority {
    async fn push(&self, request: PushRequest) -> Result<PushResponse> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock().await;
        tokio::time::sleep(latency).await;

        if let Some(err) = self.fail_push.lock().await.clone() {
            return Err(err);
        }

        let mut state = self.state.lock().await;
        let mut versions = HashMap::new();
        let count = request.len();
        for conv in request.conversations {
            let id = conv.id.clone();
            let v = state.stamp(Entity::Conversation(conv));
            versions.insert(id, v);
        }
        for msg in request.messages {
            let id = msg.id.clone();
            let v = state.stamp(Entity::Message(msg));
            versions.insert(id, v);
        }
        Ok(PushResponse {
            message: format!("accepted {count} entities"),
            new_watermark: state.version_counter,
            versions,
        })
    }

    async fn pull(&self, since_version: Version, limit: usize) -> Result<PullResponse> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        self.pull_since.lock().await.push(since_version);
        let latency = *self.latency.lock().await;
        tokio::time::sleep(latency).await;

        if let Some(err) = self.fail_pull.lock().await.clone() {
            return Err(err);
        }

        let state = self.state.lock().await;
        let mut newer: Vec<Entity> = state
            .entities
            .values()
            .filter(|e| e.version() > since_version)
            .cloned()
            .collect();
        newer.sort_by_key(|e| e.version());
        let has_more = newer.len() > limit;
        newer.truncate(limit);
        Ok(PullResponse {
            entities: newer,
            new_watermark: state.version_counter,
            has_more,
        })
    }

    async fn delete(&self, entity_id: &str) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        if let Some(mut entity) = state.entities.get(entity_id).cloned() {
            if !entity.is_deleted() {
                entity.mark_deleted();
                state.stamp(entity);
            }
        }
        // deleting an unknown id is a confirmed no-op
        Ok(())
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

/// A [`MemoryStore`] wrapper whose `put` fails for configured entity
/// ids, for exercising partial pull failures.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_put_ids: Mutex<HashSet<String>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_puts_for(&self, id: &str) {
        self.fail_put_ids.lock().await.insert(id.to_string());
    }
}

#[async_trait]
impl LocalStore for FlakyStore {
    async fn get(&self, entity_type: EntityType, id: &str) -> Result<Option<Entity>> {
        self.inner.get(entity_type, id).await
    }

    async fn put(&self, entity: Entity) -> Result<()> {
        if self.fail_put_ids.lock().await.contains(entity.id()) {
            return Err(SyncError::Storage(format!(
                "simulated write failure for {}",
                entity.id()
            )));
        }
        self.inner.put(entity).await
    }

    async fn remove(&self, entity_type: EntityType, id: &str) -> Result<()> {
        self.inner.remove(entity_type, id).await
    }

    async fn remove_conversation_messages(&self, conversation_id: &str) -> Result<()> {
        self.inner.remove_conversation_messages(conversation_id).await
    }

    async fn pending_changes(&self) -> Result<Vec<ChangeLogEntry>> {
        self.inner.pending_changes().await
    }

    async fn clear_changes(&self, confirmed: &[(String, Timestamp)]) -> Result<()> {
        self.inner.clear_changes(confirmed).await
    }

    async fn increment_attempt(&self, id: &str) -> Result<u32> {
        self.inner.increment_attempt(id).await
    }

    async fn mark_failed(&self, id: &str) -> Result<()> {
        self.inner.mark_failed(id).await
    }

    async fn retry_failed(&self) -> Result<usize> {
        self.inner.retry_failed().await
    }

    async fn watermark(&self) -> Result<Version> {
        self.inner.watermark().await
    }

    async fn set_watermark(&self, version: Version) -> Result<()> {
        self.inner.set_watermark(version).await
    }

    async fn stage_upsert(&self, entity: Entity, op: ChangeOp) -> Result<()> {
        self.inner.stage_upsert(entity, op).await
    }

    async fn stage_delete(&self, entity_type: EntityType, id: &str) -> Result<()> {
        self.inner.stage_delete(entity_type, id).await
    }
}
