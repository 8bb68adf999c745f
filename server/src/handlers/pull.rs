//! Pull handler - serves entities above a client's watermark.

use crate::db;
use crate::error::{AppError, Result};
use courier_sync::PullResponse;
use serde::Deserialize;
use sqlx::SqlitePool;

/// Query parameters for pull sync.
#[derive(Debug, Deserialize)]
pub struct PullQuery {
    /// Client watermark; only entities with a strictly greater version
    /// are returned. Zero (the default) means everything.
    pub since_version: Option<u64>,
    /// Maximum number of entities to return
    pub limit: Option<i64>,
}

/// Default limit for pull pages.
const DEFAULT_LIMIT: i64 = 100;

/// Maximum limit for pull pages.
const MAX_LIMIT: i64 = 1000;

/// Process a pull request from a client.
pub async fn handle_pull(pool: &SqlitePool, query: PullQuery) -> Result<PullResponse> {
    // watermarks beyond i64 cannot exist in the store; clamp instead of
    // wrapping negative and replaying the full dataset
    let since = query.since_version.unwrap_or(0).min(i64::MAX as u64) as i64;
    let limit = query
        .limit
        .map(|l| l.clamp(1, MAX_LIMIT))
        .unwrap_or(DEFAULT_LIMIT);

    // Fetch one more than requested to learn whether another page exists
    let rows = db::entities_since(pool, since, limit + 1).await?;
    let has_more = rows.len() as i64 > limit;

    let mut entities = Vec::with_capacity(rows.len().min(limit as usize));
    for stored in rows.into_iter().take(limit as usize) {
        let entity = stored.to_entity().map_err(|e| {
            AppError::Internal(format!("corrupt payload for entity {}: {e}", stored.id))
        })?;
        entities.push(entity);
    }

    let watermark = db::current_version(pool).await?;
    Ok(PullResponse {
        entities,
        new_watermark: watermark as u64,
        has_more,
    })
}
