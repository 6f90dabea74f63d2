//! Diary routes.

use axum::{extract::State, http::StatusCode, routing::{get, post}, Json, Router};
use keepsake_engine::collections::diary::{DiaryEntry, COLLECTION};
use keepsake_engine::Fields;

use crate::error::Result;
use crate::handlers::{handle_create_entry, handle_list_entries, handle_reload, Created, Reloaded};
use crate::AppState;

/// Create diary routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/diary", get(list_handler).post(create_handler))
        .route("/diary/reload", post(reload_handler))
}

/// GET /diary - All entries, newest first.
async fn list_handler(State(state): State<AppState>) -> Json<Vec<DiaryEntry>> {
    Json(handle_list_entries(&state.stores))
}

/// POST /diary - Write an entry.
async fn create_handler(
    State(state): State<AppState>,
    Json(draft): Json<Fields>,
) -> Result<(StatusCode, Json<Created>)> {
    let created = handle_create_entry(&state.stores, draft).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// POST /diary/reload - Reload entries from the remote.
async fn reload_handler(State(state): State<AppState>) -> Result<Json<Reloaded>> {
    Ok(Json(handle_reload(&state.stores, COLLECTION).await?))
}
