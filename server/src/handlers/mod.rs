//! Request handlers for the collection endpoints.
//!
//! Handlers take the stores and a decoded request and return plain response
//! types; routing and extraction live in `routes`.

mod diary;
mod gifts;
mod live;
mod rewards;

pub use diary::*;
pub use gifts::*;
pub use live::*;
pub use rewards::*;

use keepsake_engine::{Record, RecordId};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::stores::Stores;

/// Response for a created record.
#[derive(Debug, Serialize)]
pub struct Created {
    pub id: RecordId,
}

/// Response for a reload.
#[derive(Debug, Serialize)]
pub struct Reloaded {
    pub collection: String,
    pub loaded: usize,
    pub generation: u64,
}

/// Reload one collection from the remote.
pub async fn handle_reload(stores: &Stores, collection: &str) -> Result<Reloaded> {
    let store = stores
        .get(collection)
        .ok_or_else(|| AppError::NotFound(format!("collection {collection}")))?;

    let loaded = store.load().await?;
    Ok(Reloaded {
        collection: collection.to_string(),
        loaded,
        generation: store.generation(),
    })
}

/// Convert records into a read model, skipping ones that do not fit it.
fn read_all<T>(
    records: &[Record],
    read: impl Fn(&Record) -> keepsake_engine::error::Result<T>,
) -> Vec<T> {
    records
        .iter()
        .filter_map(|record| match read(record) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!(id = %record.id, error = %e, "Skipping unreadable record");
                None
            }
        })
        .collect()
}
