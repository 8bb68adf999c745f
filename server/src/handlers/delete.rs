//! Delete handler - tombstones an entity under a fresh version.
//!
//! Deletes never remove rows. The tombstone keeps the entity in the
//! version sequence so every client learns about the deletion through
//! its next pull. Deleting an unknown or already-deleted entity is
//! confirmed too; the client's intent is satisfied either way.

use crate::db;
use crate::error::Result;
use courier_sync::DeleteResponse;
use sqlx::SqlitePool;

/// Process a delete request from a client.
pub async fn handle_delete(pool: &SqlitePool, id: &str) -> Result<DeleteResponse> {
    // The check shares the write transaction so racing deletes of the
    // same id claim at most one version between them.
    let mut tx = pool.begin().await?;
    let already_gone = match db::get_entity(&mut *tx, id).await? {
        None => true,
        Some(stored) => stored.deleted,
    };
    if already_gone {
        let watermark = db::current_version(&mut *tx).await?;
        return Ok(DeleteResponse {
            message: format!("entity {id} already absent"),
            new_watermark: watermark as u64,
        });
    }

    let version = db::next_version(&mut *tx).await?;
    db::tombstone_entity(&mut *tx, id, version).await?;
    let watermark = db::current_version(&mut *tx).await?;
    tx.commit().await?;

    tracing::debug!(id, version, "entity tombstoned");
    Ok(DeleteResponse {
        message: format!("entity {id} deleted"),
        new_watermark: watermark as u64,
    })
}
