//! The change log: pending local mutations not yet confirmed by the
//! backend authority.
//!
//! The log is keyed by (entity type, entity id): at most one pending
//! entry exists per entity, and a newer mutation coalesces into the
//! latest intent instead of stacking duplicates. Entries are removed
//! only once the authority confirms the corresponding push.

use crate::{EntityId, EntityType, Timestamp};
use serde::{Deserialize, Serialize};

/// The mutation intent carried by a change log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Create,
    Update,
    Delete,
}

/// A pending local mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLogEntry {
    /// Unique entry id
    pub id: String,
    /// Kind of the mutated entity
    pub entity_type: EntityType,
    /// Id of the mutated entity
    pub entity_id: EntityId,
    /// Latest mutation intent for this entity
    pub op: ChangeOp,
    /// How many pushes of this entry have failed
    pub attempt_count: u32,
    /// Set once attempt_count crosses the configured maximum or the
    /// authority rejected the entry; excluded from automatic pushes
    /// until an explicit retry clears it
    pub failed: bool,
    /// When the mutation was staged (milliseconds since epoch)
    pub staged_at: Timestamp,
}

impl ChangeLogEntry {
    /// Create a fresh entry for a mutation.
    pub fn new(entity_type: EntityType, entity_id: impl Into<EntityId>, op: ChangeOp) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            entity_type,
            entity_id: entity_id.into(),
            op,
            attempt_count: 0,
            failed: false,
            staged_at: crate::now_millis(),
        }
    }

    /// Fold a newer mutation intent into this entry.
    ///
    /// The entry keeps its id but resets its retry bookkeeping: a new
    /// user intent deserves fresh attempts.
    pub fn absorb(&mut self, op: ChangeOp) {
        if let Some(folded) = coalesce(self.op, op) {
            self.op = folded;
            self.attempt_count = 0;
            self.failed = false;
            self.staged_at = crate::now_millis();
        }
    }
}

/// Fold an incoming mutation into an existing pending intent.
///
/// Returns `None` when the pair cancels out: deleting an entity whose
/// creation never reached the authority leaves nothing to tell it.
pub fn coalesce(existing: ChangeOp, incoming: ChangeOp) -> Option<ChangeOp> {
    match (existing, incoming) {
        (ChangeOp::Create, ChangeOp::Delete) => None,
        // Edits before the first sync still look like a create remotely.
        (ChangeOp::Create, _) => Some(ChangeOp::Create),
        (_, ChangeOp::Delete) => Some(ChangeOp::Delete),
        // Recreation after a pending delete: the authority upserts, so
        // the entity's prior existence does not matter.
        (ChangeOp::Delete, op) => Some(op),
        (ChangeOp::Update, _) => Some(ChangeOp::Update),
    }
}
