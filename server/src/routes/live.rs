//! Live update route.

use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};

use crate::handlers::handle_live_connection;
use crate::AppState;

/// Create the WebSocket route.
pub fn routes() -> Router<AppState> {
    Router::new().route("/live", get(live_handler))
}

/// GET /live - Upgrade to a WebSocket carrying store events.
async fn live_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let stores = state.stores.clone();
    let conn_manager = state.conn_manager.clone();
    ws.on_upgrade(move |socket| handle_live_connection(socket, stores, conn_manager))
}
