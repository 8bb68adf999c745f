//! Push handler - applies incoming creates/updates from clients.
//!
//! The whole batch is applied in one transaction. Every entity gets a
//! fresh version from the global counter; client-supplied versions are
//! ignored. A non-2xx response means nothing was stored.

use crate::db;
use crate::error::{AppError, Result};
use courier_sync::{Entity, PushRequest, PushResponse};
use sqlx::SqlitePool;
use std::collections::HashMap;

/// Process a push request from a client.
pub async fn handle_push(pool: &SqlitePool, request: PushRequest) -> Result<PushResponse> {
    validate(&request)?;

    if request.is_empty() {
        let watermark = db::current_version(pool).await?;
        return Ok(PushResponse {
            message: "nothing to push".to_string(),
            new_watermark: watermark as u64,
            versions: HashMap::new(),
        });
    }

    let count = request.len();
    let entities = request
        .conversations
        .into_iter()
        .map(Entity::from)
        .chain(request.messages.into_iter().map(Entity::from));

    let mut tx = pool.begin().await?;
    let mut versions = HashMap::with_capacity(count);
    for mut entity in entities {
        let version = db::next_version(&mut *tx).await?;
        entity.set_version(version as u64);
        let payload = serde_json::to_string(&entity)
            .map_err(|e| AppError::Internal(format!("serialize entity: {e}")))?;
        db::upsert_entity(&mut *tx, &entity, &payload, version).await?;
        versions.insert(entity.id().clone(), version as u64);
    }
    let watermark = db::current_version(&mut *tx).await?;
    tx.commit().await?;

    tracing::debug!(count, node_id = %request.node_id, watermark, "push applied");
    Ok(PushResponse {
        message: format!("accepted {count} entities"),
        new_watermark: watermark as u64,
        versions,
    })
}

fn validate(request: &PushRequest) -> Result<()> {
    for conv in &request.conversations {
        if conv.id.is_empty() {
            return Err(AppError::BadRequest(
                "conversation with empty id".to_string(),
            ));
        }
    }
    for msg in &request.messages {
        if msg.id.is_empty() {
            return Err(AppError::BadRequest("message with empty id".to_string()));
        }
        if msg.conversation_id.is_empty() {
            return Err(AppError::BadRequest(format!(
                "message {} without conversation id",
                msg.id
            )));
        }
    }
    Ok(())
}
