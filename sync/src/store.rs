//! The local store: the client-side home of entities, the change log,
//! and the sync watermark.
//!
//! [`LocalStore`] is the collaborator surface the reconciler depends on.
//! The change log and watermark are mutated only through it, and only by
//! the reconciler (via `clear_changes`, `increment_attempt`,
//! `set_watermark`) or by local mutations (via `stage_upsert` /
//! `stage_delete`). Everything else reads.

use crate::changelog::{coalesce, ChangeLogEntry, ChangeOp};
use crate::error::{Result, SyncError};
use crate::{Conversation, Entity, EntityId, EntityType, Message, Timestamp, Version};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

/// Storage surface consumed by the sync engine.
///
/// Each method is one small atomic operation so concurrent readers never
/// observe a half-merged entity.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Fetch an entity, tombstones excluded.
    async fn get(&self, entity_type: EntityType, id: &str) -> Result<Option<Entity>>;

    /// Insert or replace an entity. Does not touch the change log; this
    /// is the merge path, not the local-mutation path.
    async fn put(&self, entity: Entity) -> Result<()>;

    /// Remove an entity outright.
    async fn remove(&self, entity_type: EntityType, id: &str) -> Result<()>;

    /// Remove every message belonging to a conversation.
    async fn remove_conversation_messages(&self, conversation_id: &str) -> Result<()>;

    /// All pending change log entries, oldest first.
    async fn pending_changes(&self) -> Result<Vec<ChangeLogEntry>>;

    /// Drop entries whose push the authority confirmed. Each pair is the
    /// entry id and the `staged_at` read before the push; an entry whose
    /// `staged_at` moved absorbed a newer mutation mid-flight, and that
    /// intent is not confirmed, so the entry stays.
    async fn clear_changes(&self, confirmed: &[(String, Timestamp)]) -> Result<()>;

    /// Bump an entry's attempt count, returning the new count.
    async fn increment_attempt(&self, id: &str) -> Result<u32>;

    /// Mark an entry failed: kept in the log, excluded from automatic
    /// pushes until retried explicitly.
    async fn mark_failed(&self, id: &str) -> Result<()>;

    /// Clear the failed flag (and attempt count) on every failed entry,
    /// returning how many were reset.
    async fn retry_failed(&self) -> Result<usize>;

    /// The highest version fully absorbed by this store.
    async fn watermark(&self) -> Result<Version>;

    /// Persist a new watermark.
    async fn set_watermark(&self, version: Version) -> Result<()>;

    /// Stage a local create/update: writes the entity and coalesces a
    /// change log entry for it.
    async fn stage_upsert(&self, entity: Entity, op: ChangeOp) -> Result<()>;

    /// Stage a local delete: removes the entity (cascading to a
    /// conversation's messages) and coalesces a delete intent.
    async fn stage_delete(&self, entity_type: EntityType, id: &str) -> Result<()>;
}

type ChangeKey = (EntityType, EntityId);

#[derive(Debug, Default)]
struct StoreInner {
    conversations: BTreeMap<EntityId, Conversation>,
    messages: BTreeMap<EntityId, Message>,
    changes: BTreeMap<ChangeKey, ChangeLogEntry>,
    watermark: Version,
}

/// In-memory implementation of [`LocalStore`].
///
/// Durability comes from [`StoreSnapshot`] export/import: the host
/// persists the snapshot and restores it at startup, so offline edits
/// and the watermark survive restarts.
///
/// [`StoreSnapshot`]: crate::snapshot::StoreSnapshot
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a store from a snapshot.
    pub fn from_snapshot(snapshot: crate::snapshot::StoreSnapshot) -> Self {
        let mut inner = StoreInner {
            conversations: snapshot.conversations,
            messages: snapshot.messages,
            watermark: snapshot.watermark,
            changes: BTreeMap::new(),
        };
        for entry in snapshot.changes {
            inner
                .changes
                .insert((entry.entity_type, entry.entity_id.clone()), entry);
        }
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Export the current state for persistence.
    pub async fn snapshot(&self) -> crate::snapshot::StoreSnapshot {
        let inner = self.inner.lock().await;
        crate::snapshot::StoreSnapshot {
            format_version: crate::snapshot::SNAPSHOT_FORMAT_VERSION,
            watermark: inner.watermark,
            conversations: inner.conversations.clone(),
            messages: inner.messages.clone(),
            changes: inner.changes.values().cloned().collect(),
        }
    }

    /// All live conversations, for UI reads.
    pub async fn conversations(&self) -> Vec<Conversation> {
        let inner = self.inner.lock().await;
        inner
            .conversations
            .values()
            .filter(|c| !c.deleted)
            .cloned()
            .collect()
    }

    /// All live messages of one conversation, for UI reads.
    pub async fn messages(&self, conversation_id: &str) -> Vec<Message> {
        let inner = self.inner.lock().await;
        inner
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation_id && !m.deleted)
            .cloned()
            .collect()
    }
}

impl StoreInner {
    fn stage_change(&mut self, entity_type: EntityType, id: &str, op: ChangeOp) {
        let key = (entity_type, id.to_string());
        match self.changes.get_mut(&key) {
            Some(entry) => {
                if coalesce(entry.op, op).is_none() {
                    // create followed by delete: nothing ever reached the
                    // authority, drop the intent entirely
                    self.changes.remove(&key);
                } else {
                    entry.absorb(op);
                }
            }
            None => {
                self.changes
                    .insert(key, ChangeLogEntry::new(entity_type, id, op));
            }
        }
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn get(&self, entity_type: EntityType, id: &str) -> Result<Option<Entity>> {
        let inner = self.inner.lock().await;
        let entity = match entity_type {
            EntityType::Conversation => inner
                .conversations
                .get(id)
                .filter(|c| !c.deleted)
                .cloned()
                .map(Entity::Conversation),
            EntityType::Message => inner
                .messages
                .get(id)
                .filter(|m| !m.deleted)
                .cloned()
                .map(Entity::Message),
        };
        Ok(entity)
    }

    async fn put(&self, entity: Entity) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match entity {
            Entity::Conversation(c) => {
                inner.conversations.insert(c.id.clone(), c);
            }
            Entity::Message(m) => {
                inner.messages.insert(m.id.clone(), m);
            }
        }
        Ok(())
    }

    async fn remove(&self, entity_type: EntityType, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match entity_type {
            EntityType::Conversation => {
                inner.conversations.remove(id);
            }
            EntityType::Message => {
                inner.messages.remove(id);
            }
        }
        Ok(())
    }

    async fn remove_conversation_messages(&self, conversation_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .messages
            .retain(|_, m| m.conversation_id != conversation_id);
        Ok(())
    }

    async fn pending_changes(&self) -> Result<Vec<ChangeLogEntry>> {
        let inner = self.inner.lock().await;
        let mut entries: Vec<_> = inner.changes.values().cloned().collect();
        entries.sort_by_key(|e| e.staged_at);
        Ok(entries)
    }

    async fn clear_changes(&self, confirmed: &[(String, Timestamp)]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.changes.retain(|_, e| {
            !confirmed
                .iter()
                .any(|(id, staged_at)| *id == e.id && *staged_at == e.staged_at)
        });
        Ok(())
    }

    async fn increment_attempt(&self, id: &str) -> Result<u32> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .changes
            .values_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| SyncError::Storage(format!("no change log entry {id}")))?;
        entry.attempt_count += 1;
        Ok(entry.attempt_count)
    }

    async fn mark_failed(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .changes
            .values_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| SyncError::Storage(format!("no change log entry {id}")))?;
        entry.failed = true;
        Ok(())
    }

    async fn retry_failed(&self) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let mut reset = 0;
        for entry in inner.changes.values_mut().filter(|e| e.failed) {
            entry.failed = false;
            entry.attempt_count = 0;
            reset += 1;
        }
        Ok(reset)
    }

    async fn watermark(&self) -> Result<Version> {
        Ok(self.inner.lock().await.watermark)
    }

    async fn set_watermark(&self, version: Version) -> Result<()> {
        self.inner.lock().await.watermark = version;
        Ok(())
    }

    async fn stage_upsert(&self, entity: Entity, op: ChangeOp) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let entity_type = entity.entity_type();
        let id = entity.id().clone();
        match entity {
            Entity::Conversation(c) => {
                inner.conversations.insert(c.id.clone(), c);
            }
            Entity::Message(m) => {
                inner.messages.insert(m.id.clone(), m);
            }
        }
        inner.stage_change(entity_type, &id, op);
        Ok(())
    }

    async fn stage_delete(&self, entity_type: EntityType, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match entity_type {
            EntityType::Conversation => {
                inner.conversations.remove(id);
                inner.messages.retain(|_, m| m.conversation_id != id);
            }
            EntityType::Message => {
                inner.messages.remove(id);
            }
        }
        inner.stage_change(entity_type, id, ChangeOp::Delete);
        Ok(())
    }
}
