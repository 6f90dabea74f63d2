//! Remote collection boundary.
//!
//! A [`RemoteCollection`] is the source of truth for one collection: it
//! serves bulk reads, accepts writes and publishes a change feed that
//! echoes every write, from any client. The store is handed one explicitly
//! at construction.

mod memory;
mod postgres;

pub use memory::{Fault, MemoryCollection};
pub use postgres::{PgCollection, CHANGES_CHANNEL};

use async_trait::async_trait;
use futures::stream::BoxStream;
use keepsake_engine::{ChangeEvent, Fields};
use serde_json::Value;

/// Errors reported by a remote collection.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("row not found: {0}")]
    NotFound(String),

    #[error("write rejected: {0}")]
    Rejected(String),

    #[error("unreachable: {0}")]
    Unavailable(String),

    #[error("change feed interrupted: {0}")]
    Channel(String),

    #[error("invalid table name: {0}")]
    InvalidTable(String),
}

/// Parameters of a bulk read. Rows always come newest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectQuery {
    /// Maximum number of rows; all rows when `None`
    pub limit: Option<usize>,
}

impl SelectQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn limit(limit: usize) -> Self {
        Self { limit: Some(limit) }
    }
}

/// An item of the change feed.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    /// A row changed
    Change(ChangeEvent),
    /// The feed is live again after an interruption; changes made in the
    /// meantime were not delivered
    Resynced,
}

/// Standing change feed of one collection.
pub type ChangeStream = BoxStream<'static, Result<ChannelMessage, RemoteError>>;

/// A remote collection of rows.
#[async_trait]
pub trait RemoteCollection: Send + Sync {
    /// Collection (table) name.
    fn name(&self) -> &str;

    /// Read rows ordered by `created_at`, newest first.
    async fn select(&self, query: SelectQuery) -> Result<Vec<Value>, RemoteError>;

    /// Insert a row and return it as stored, including the assigned `id`
    /// and `created_at`.
    async fn insert(&self, fields: Fields) -> Result<Value, RemoteError>;

    /// Apply a partial update to a row.
    async fn update(&self, id: &str, patch: Fields) -> Result<(), RemoteError>;

    /// Delete a row. Deleting a row that does not exist succeeds.
    async fn delete(&self, id: &str) -> Result<(), RemoteError>;

    /// Open a change feed.
    async fn changes(&self) -> Result<ChangeStream, RemoteError>;
}
