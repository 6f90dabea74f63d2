//! Wishlist routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use keepsake_engine::collections::gifts::{GiftItem, COLLECTION};
use keepsake_engine::Fields;

use crate::error::Result;
use crate::handlers::{
    handle_create_gift, handle_delete_gift, handle_list_gifts, handle_reload, handle_toggle_gift,
    handle_update_gift, Created, GiftList, GiftQuery, Reloaded,
};
use crate::AppState;

/// Create wishlist routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/gifts", get(list_handler).post(create_handler))
        .route("/gifts/reload", post(reload_handler))
        .route("/gifts/{id}", patch(update_handler).delete(delete_handler))
        .route("/gifts/{id}/toggle", post(toggle_handler))
}

/// GET /gifts?category= - Gifts in one category tab, or all.
async fn list_handler(
    State(state): State<AppState>,
    Query(query): Query<GiftQuery>,
) -> Result<Json<GiftList>> {
    Ok(Json(handle_list_gifts(&state.stores, query)?))
}

/// POST /gifts - Add a gift.
async fn create_handler(
    State(state): State<AppState>,
    Json(draft): Json<Fields>,
) -> Result<(StatusCode, Json<Created>)> {
    let created = handle_create_gift(&state.stores, draft).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// PATCH /gifts/{id} - Update fields of a gift.
async fn update_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<Fields>,
) -> Result<Json<GiftItem>> {
    Ok(Json(handle_update_gift(&state.stores, &id, patch).await?))
}

/// POST /gifts/{id}/toggle - Flip wanted and purchased.
async fn toggle_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<GiftItem>> {
    Ok(Json(handle_toggle_gift(&state.stores, &id).await?))
}

/// DELETE /gifts/{id} - Remove a gift.
async fn delete_handler(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode> {
    handle_delete_gift(&state.stores, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /gifts/reload - Reload the wishlist from the remote.
async fn reload_handler(State(state): State<AppState>) -> Result<Json<Reloaded>> {
    Ok(Json(handle_reload(&state.stores, COLLECTION).await?))
}
