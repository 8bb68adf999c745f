//! Entity deletion routes.

use axum::{
    extract::{Path, State},
    routing::delete,
    Json, Router,
};
use courier_sync::DeleteResponse;

use crate::error::Result;
use crate::handlers::handle_delete;
use crate::AppState;

/// Create entity routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/entities/{id}", delete(delete_handler))
}

/// DELETE /entities/{id} - tombstone an entity.
async fn delete_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>> {
    let response = handle_delete(&state.pool, &id).await?;
    Ok(Json(response))
}
