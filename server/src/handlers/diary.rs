//! Diary handlers.

use keepsake_engine::collections::diary::DiaryEntry;
use keepsake_engine::Fields;

use super::{read_all, Created};
use crate::error::Result;
use crate::stores::Stores;

/// All diary entries, newest first.
pub fn handle_list_entries(stores: &Stores) -> Vec<DiaryEntry> {
    read_all(&stores.diary.snapshot(), DiaryEntry::from_record)
}

/// Write a new entry. The mood defaults to happy.
pub async fn handle_create_entry(stores: &Stores, draft: Fields) -> Result<Created> {
    let id = stores.diary.insert(draft)?.await?;
    tracing::info!(id = %id, "Diary entry created");
    Ok(Created { id })
}
