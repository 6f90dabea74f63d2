//! HTTP route definitions.

mod diary;
mod gifts;
mod health;
mod live;
mod rewards;

use crate::AppState;
use axum::Router;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(diary::routes())
        .merge(gifts::routes())
        .merge(rewards::routes())
        .merge(live::routes())
}
