//! Flower reward routes.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use keepsake_engine::collections::rewards::{RewardSummary, COLLECTION};

use crate::error::Result;
use crate::handlers::{
    handle_add_flower, handle_redeem, handle_reload, handle_summary, Created, Reloaded,
    RewardRequest,
};
use crate::AppState;

/// Create reward routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/rewards", get(summary_handler))
        .route("/rewards/flowers", post(add_flower_handler))
        .route("/rewards/redeem", post(redeem_handler))
        .route("/rewards/reload", post(reload_handler))
}

/// GET /rewards - Balance, redeemed count and history.
async fn summary_handler(State(state): State<AppState>) -> Json<RewardSummary> {
    Json(handle_summary(&state.stores, state.config.history_limit))
}

/// POST /rewards/flowers - Earn a flower.
async fn add_flower_handler(
    State(state): State<AppState>,
    body: Option<Json<RewardRequest>>,
) -> Result<(StatusCode, Json<Created>)> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let created = handle_add_flower(&state.stores, request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// POST /rewards/redeem - Spend flowers on a wish.
async fn redeem_handler(
    State(state): State<AppState>,
    body: Option<Json<RewardRequest>>,
) -> Result<(StatusCode, Json<Created>)> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let created = handle_redeem(&state.stores, request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// POST /rewards/reload - Reload the ledger from the remote.
async fn reload_handler(State(state): State<AppState>) -> Result<Json<Reloaded>> {
    Ok(Json(handle_reload(&state.stores, COLLECTION).await?))
}
