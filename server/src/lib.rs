//! Keepsake Server - optimistic collection stores over a realtime database.
//!
//! One [`ReconcilingStore`] per collection mirrors a remote table (PostgreSQL,
//! or in-process when no database is configured). The HTTP surface reads
//! and writes through the stores; WebSocket clients on `/live` are told
//! about every change and failure the stores observe.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod observer;
pub mod remote;
pub mod routes;
pub mod store;
pub mod stores;
pub mod websocket;

pub use store::{PendingWrite, ReconcilingStore, StoreBuilder, StoreEvent, Subscription};
pub use stores::Stores;

use std::sync::Arc;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::websocket::{ConnectionManager, ServerMessage};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub stores: Arc<Stores>,
    pub config: Arc<Config>,
    pub conn_manager: Arc<ConnectionManager>,
}

impl AppState {
    /// Build the state and forward every store event to live connections.
    pub fn new(stores: Arc<Stores>, config: Config) -> Self {
        let conn_manager = ConnectionManager::new_shared();

        for store in stores.iter() {
            let conn_manager = Arc::clone(&conn_manager);
            store.watch(move |event| {
                conn_manager.broadcast_all(ServerMessage::from(event));
            });
        }

        Self {
            stores,
            config: Arc::new(config),
            conn_manager,
        }
    }
}

/// Build the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state)
}
