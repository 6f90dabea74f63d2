//! Change notifications pushed by the remote store.
//!
//! Every mutation of a remote collection, by any client, is echoed as a
//! [`ChangeEvent`]. Delivery is at-least-once and may be reordered relative
//! to local optimistic actions, so consumers must apply events idempotently.

use crate::{record::row_id, CollectionName, Fields, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of row-level change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    #[serde(alias = "INSERT", alias = "insert")]
    Created,
    #[serde(alias = "UPDATE", alias = "update")]
    Updated,
    #[serde(alias = "DELETE", alias = "delete")]
    Deleted,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Created => write!(f, "created"),
            ChangeKind::Updated => write!(f, "updated"),
            ChangeKind::Deleted => write!(f, "deleted"),
        }
    }
}

/// A row-level change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// What happened to the row
    pub event_type: ChangeKind,
    /// Collection the row belongs to
    pub collection: CollectionName,
    /// Row before the change (deletes, and updates when the remote sends it)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    /// Row after the change (creates and updates; may be partial)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
}

impl ChangeEvent {
    /// A row was created.
    pub fn created(collection: impl Into<CollectionName>, row: Value) -> Self {
        Self {
            event_type: ChangeKind::Created,
            collection: collection.into(),
            before: None,
            after: Some(row),
        }
    }

    /// A row was updated. `after` may carry only the changed fields plus `id`.
    pub fn updated(collection: impl Into<CollectionName>, before: Option<Value>, after: Value) -> Self {
        Self {
            event_type: ChangeKind::Updated,
            collection: collection.into(),
            before,
            after: Some(after),
        }
    }

    /// A row was deleted. `before` needs at least the `id`.
    pub fn deleted(collection: impl Into<CollectionName>, before: Value) -> Self {
        Self {
            event_type: ChangeKind::Deleted,
            collection: collection.into(),
            before: Some(before),
            after: None,
        }
    }

    /// Identity of the affected record.
    pub fn record_id(&self) -> Option<RecordId> {
        self.after
            .as_ref()
            .and_then(row_id)
            .or_else(|| self.before.as_ref().and_then(row_id))
    }

    /// Fields reported by the event (the `after` image), if any.
    pub fn fields(&self) -> Option<&Fields> {
        self.after.as_ref().and_then(Value::as_object)
    }
}
