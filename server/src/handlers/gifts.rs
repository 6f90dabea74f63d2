//! Wishlist handlers.

use std::collections::BTreeMap;

use keepsake_engine::collections::gifts::{self, Category, CategoryFilter, GiftItem};
use keepsake_engine::{Error as StoreError, Fields, Record};
use serde::{Deserialize, Serialize};

use super::{read_all, Created};
use crate::error::{AppError, Result};
use crate::stores::Stores;

/// Query parameters for listing gifts.
#[derive(Debug, Default, Deserialize)]
pub struct GiftQuery {
    /// Category tab; all categories when absent or `all`
    #[serde(default)]
    pub category: Option<String>,
}

/// Gifts in the selected tab plus per-category counts.
#[derive(Debug, Serialize)]
pub struct GiftList {
    pub items: Vec<GiftItem>,
    pub counts: BTreeMap<Category, usize>,
    pub total: usize,
}

/// List gifts, optionally restricted to one category.
pub fn handle_list_gifts(stores: &Stores, query: GiftQuery) -> Result<GiftList> {
    let filter: CategoryFilter = query
        .category
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(StoreError::from)?;

    let selected = stores.gifts.derive(&filter);
    let (counts, total) = stores.gifts.derive(&tab_counts);

    Ok(GiftList {
        items: read_all(&selected, GiftItem::from_record),
        counts,
        total,
    })
}

fn tab_counts(records: &[Record]) -> (BTreeMap<Category, usize>, usize) {
    (gifts::by_category(records), records.len())
}

/// Add a gift to the wishlist.
pub async fn handle_create_gift(stores: &Stores, draft: Fields) -> Result<Created> {
    let id = stores.gifts.insert(draft)?.await?;
    tracing::info!(id = %id, "Gift created");
    Ok(Created { id })
}

/// Patch a gift. The change is visible to other readers before the remote
/// confirms it.
pub async fn handle_update_gift(stores: &Stores, id: &str, patch: Fields) -> Result<GiftItem> {
    stores.gifts.update_field(id, patch)?.await?;

    let record = stores
        .gifts
        .get(id)
        .ok_or_else(|| AppError::NotFound(format!("gift {id}")))?;
    Ok(GiftItem::from_record(&record)?)
}

/// Flip a gift between wanted and purchased.
pub async fn handle_toggle_gift(stores: &Stores, id: &str) -> Result<GiftItem> {
    let current = stores
        .gifts
        .get(id)
        .ok_or_else(|| StoreError::RecordNotFound(id.to_string()))?;
    let status = GiftItem::from_record(&current)?.status.toggled();

    handle_update_gift(stores, id, gifts::status_patch(status)).await
}

/// Remove a gift from the wishlist.
pub async fn handle_delete_gift(stores: &Stores, id: &str) -> Result<()> {
    stores.gifts.remove(id)?.await?;
    tracing::info!(id = %id, "Gift deleted");
    Ok(())
}
