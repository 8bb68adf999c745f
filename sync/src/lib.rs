//! # Courier Sync
//!
//! The synchronization engine for Courier, a chat application whose data
//! lives in two places: a local, always-available store on the client and
//! a durable store on a backend service. This crate keeps the two
//! convergent despite offline use, concurrent edits, partial failures,
//! and out-of-order delivery.
//!
//! ## Core Concepts
//!
//! ### Entities
//!
//! Chat data is stored as entities ([`Conversation`], [`Message`]) wrapped
//! in the [`Entity`] enum. Every entity carries a version: a 64-bit
//! integer assigned exclusively by the backend authority on each accepted
//! write. Local copies cache the version they last observed; a version of
//! zero means the entity has never been synced.
//!
//! ### Change Log
//!
//! Local mutations are not pushed immediately. They are staged in a
//! change log keyed by (entity type, entity id), so a newer mutation for
//! the same entity coalesces into the latest intent rather than stacking
//! duplicates. Entries survive process restarts via [`StoreSnapshot`] and
//! are cleared only after the authority confirms the push.
//!
//! ### Reconciler
//!
//! One sync cycle is push-then-pull: pending deletes go out individually,
//! pending creates/updates as one atomic batch, then the client pulls
//! everything with a version above its watermark and merges it under the
//! last-writer-wins rule: an incoming entity is adopted only if its
//! version is strictly greater than the local one. The [`Reconciler`]
//! never raises errors across its boundary; every cycle yields a
//! [`CycleReport`].
//!
//! ### Sync Coordinator
//!
//! The [`SyncCoordinator`] schedules cycles (interval timer, manual
//! trigger, connectivity-change trigger), enforces single-flight
//! execution, and exposes a read-only [`SyncStatus`] snapshot for
//! observers.
//!
//! ## Conflict Policy
//!
//! Last-writer-wins by version number. Concurrent edits to the same
//! entity from two offline clients result in one being discarded. This is
//! a documented limitation, not a bug; there is no field-level merge.

pub mod changelog;
pub mod config;
pub mod coordinator;
pub mod entity;
pub mod error;
pub mod reconcile;
pub mod snapshot;
pub mod store;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types at crate root
pub use changelog::{ChangeLogEntry, ChangeOp};
pub use config::SyncConfig;
pub use coordinator::{
    AlwaysOnline, ChannelConnectivity, Connectivity, SyncCoordinator, SyncState, SyncStatus,
};
pub use entity::{Conversation, Entity, EntityType, Message};
pub use error::{SyncError, SyncIssue};
pub use reconcile::{CycleReport, Reconciler};
pub use snapshot::{StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{LocalStore, MemoryStore};
pub use transport::{Authority, DeleteResponse, HttpAuthority, PullResponse, PushRequest, PushResponse};

/// Type aliases for clarity
pub type EntityId = String;
pub type Version = u64;
pub type Timestamp = u64;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
