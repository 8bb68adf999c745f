//! Sync endpoint routes.

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use courier_sync::{PullResponse, PushRequest, PushResponse};

use crate::error::Result;
use crate::handlers::{handle_pull, handle_push, PullQuery};
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync/push", post(push_handler))
        .route("/sync/pull", get(pull_handler))
}

/// POST /sync/push - apply a batch of creates/updates.
async fn push_handler(
    State(state): State<AppState>,
    Json(request): Json<PushRequest>,
) -> Result<Json<PushResponse>> {
    let response = handle_push(&state.pool, request).await?;
    Ok(Json(response))
}

/// GET /sync/pull - serve entities above the client's watermark.
async fn pull_handler(
    State(state): State<AppState>,
    Query(query): Query<PullQuery>,
) -> Result<Json<PullResponse>> {
    let response = handle_pull(&state.pool, query).await?;
    Ok(Json(response))
}
