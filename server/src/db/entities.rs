//! Database operations for the entities table and the version counter.

use courier_sync::Entity;
use sqlx::{Row, SqliteExecutor};

/// A stored entity row from the database.
#[derive(Debug)]
pub struct StoredEntity {
    pub id: String,
    pub entity_type: String,
    pub payload: String,
    pub version: i64,
    pub deleted: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for StoredEntity {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(StoredEntity {
            id: row.try_get("id")?,
            entity_type: row.try_get("entity_type")?,
            payload: row.try_get("payload")?,
            version: row.try_get("version")?,
            deleted: row.try_get("deleted")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl StoredEntity {
    /// Reconstruct the wire entity. The version and deleted columns are
    /// authoritative; the payload may predate a tombstone.
    pub fn to_entity(&self) -> Result<Entity, serde_json::Error> {
        let mut entity: Entity = serde_json::from_str(&self.payload)?;
        entity.set_version(self.version as u64);
        if self.deleted {
            entity.mark_deleted();
        }
        Ok(entity)
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Claim the next version from the global counter. Run inside the same
/// transaction as the write it stamps.
pub async fn next_version<'e, E: SqliteExecutor<'e>>(executor: E) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "UPDATE sync_state SET version_counter = version_counter + 1 WHERE id = 1 \
         RETURNING version_counter",
    )
    .fetch_one(executor)
    .await
}

/// The current value of the global counter (the authority watermark).
pub async fn current_version<'e, E: SqliteExecutor<'e>>(executor: E) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT version_counter FROM sync_state WHERE id = 1")
        .fetch_one(executor)
        .await
}

/// Upsert an entity (insert or update). The caller stamps the version
/// into the entity before serializing so payload and column agree.
pub async fn upsert_entity<'e, E: SqliteExecutor<'e>>(
    executor: E,
    entity: &Entity,
    payload: &str,
    version: i64,
) -> Result<(), sqlx::Error> {
    let now = now_millis();
    sqlx::query(
        r#"
        INSERT INTO entities (id, entity_type, payload, version, deleted, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)
        ON CONFLICT (id) DO UPDATE SET
            payload = excluded.payload,
            version = excluded.version,
            deleted = 0,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(entity.id())
    .bind(entity.entity_type().to_string())
    .bind(payload)
    .bind(version)
    .bind(now)
    .execute(executor)
    .await?;

    Ok(())
}

/// Get an entity by ID, tombstoned or not.
pub async fn get_entity<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: &str,
) -> Result<Option<StoredEntity>, sqlx::Error> {
    sqlx::query_as::<_, StoredEntity>(
        r#"
        SELECT id, entity_type, payload, version, deleted, created_at, updated_at
        FROM entities
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await
}

/// Tombstone an entity under a fresh version so clients learn about the
/// deletion via pull. Returns false if the entity does not exist.
pub async fn tombstone_entity<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: &str,
    version: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE entities SET deleted = 1, version = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(version)
        .bind(now_millis())
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Get entities with a version strictly above `since`, ascending by
/// version, including tombstones.
pub async fn entities_since<'e, E: SqliteExecutor<'e>>(
    executor: E,
    since: i64,
    limit: i64,
) -> Result<Vec<StoredEntity>, sqlx::Error> {
    sqlx::query_as::<_, StoredEntity>(
        r#"
        SELECT id, entity_type, payload, version, deleted, created_at, updated_at
        FROM entities
        WHERE version > ?1
        ORDER BY version ASC
        LIMIT ?2
        "#,
    )
    .bind(since)
    .bind(limit)
    .fetch_all(executor)
    .await
}
