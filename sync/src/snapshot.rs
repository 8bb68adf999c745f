//! Snapshot types for persisting and restoring client state.
//!
//! The snapshot is the bridge between the in-memory [`MemoryStore`] and
//! durable storage: the host serializes it on shutdown (or after each
//! cycle) and restores it at startup, so offline edits, the change log,
//! and the watermark survive process restarts.
//!
//! [`MemoryStore`]: crate::store::MemoryStore

use crate::changelog::ChangeLogEntry;
use crate::error::{Result, SyncError};
use crate::{Conversation, EntityId, Message, Version};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of the client-side state.
///
/// Uses BTreeMap for deterministic serialization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Highest version fully absorbed at snapshot time
    pub watermark: Version,
    /// All conversations, tombstones included
    pub conversations: BTreeMap<EntityId, Conversation>,
    /// All messages, tombstones included
    pub messages: BTreeMap<EntityId, Message>,
    /// Pending local mutations not yet confirmed
    pub changes: Vec<ChangeLogEntry>,
}

impl StoreSnapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            watermark: 0,
            conversations: BTreeMap::new(),
            messages: BTreeMap::new(),
            changes: Vec::new(),
        }
    }

    /// Total entity count, tombstones included.
    pub fn entity_count(&self) -> usize {
        self.conversations.len() + self.messages.len()
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| SyncError::Storage(e.to_string()))
    }

    /// Deserialize from JSON, rejecting snapshots from a newer format.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| SyncError::Storage(e.to_string()))?;
        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(SyncError::Storage(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }
        Ok(snapshot)
    }
}

impl Default for StoreSnapshot {
    fn default() -> Self {
        Self::new()
    }
}
