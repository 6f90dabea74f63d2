//! Record types mirrored from the remote collection.

use crate::{error::Result, Error, Fields, RecordId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Column holding the record identity.
pub const ID_FIELD: &str = "id";

/// Column holding the server-assigned creation time.
pub const CREATED_AT_FIELD: &str = "created_at";

/// A row of a remote collection.
///
/// Serializes flat, the way the remote store returns rows:
/// `{"id": .., "created_at": .., ...fields}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Identifier assigned by the remote store
    pub id: RecordId,
    /// Creation time assigned by the remote store
    pub created_at: Timestamp,
    /// Domain fields
    #[serde(flatten)]
    pub fields: Fields,
}

impl Record {
    /// Create a new record.
    pub fn new(id: impl Into<RecordId>, created_at: Timestamp, fields: Fields) -> Self {
        Self {
            id: id.into(),
            created_at,
            fields,
        }
    }

    /// Build a record from a full row as delivered by the remote store.
    ///
    /// Numeric ids are normalized to their decimal string form.
    pub fn from_row(row: &Value) -> Result<Self> {
        let obj = row
            .as_object()
            .ok_or_else(|| Error::InvalidRecord("row must be an object".into()))?;

        let id = row_id(row).ok_or_else(|| Error::InvalidRecord("row has no id".into()))?;

        let created_at = obj
            .get(CREATED_AT_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidRecord(format!("row {id} has no created_at")))?;
        let created_at = chrono::DateTime::parse_from_rfc3339(created_at)
            .map_err(|e| Error::InvalidRecord(format!("row {id}: bad created_at: {e}")))?
            .with_timezone(&chrono::Utc);

        let fields = obj
            .iter()
            .filter(|(k, _)| !is_identity_field(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            id,
            created_at,
            fields,
        })
    }

    /// Serialize back into a flat row.
    pub fn to_row(&self) -> Value {
        let mut row = self.fields.clone();
        row.insert(ID_FIELD.into(), Value::String(self.id.clone()));
        row.insert(
            CREATED_AT_FIELD.into(),
            Value::String(self.created_at.to_rfc3339()),
        );
        Value::Object(row)
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Get a string field.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// Get an integer field.
    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.fields.get(field).and_then(Value::as_i64)
    }

    /// Merge a patch into the fields in place.
    ///
    /// Identity fields in the patch are ignored. Returns true if anything
    /// changed.
    pub fn merge(&mut self, patch: &Fields) -> bool {
        let mut changed = false;
        for (key, value) in patch {
            if is_identity_field(key) {
                continue;
            }
            if self.fields.get(key) != Some(value) {
                self.fields.insert(key.clone(), value.clone());
                changed = true;
            }
        }
        changed
    }

    /// Capture the current values of the given fields.
    ///
    /// Absent fields are captured as `None` so a restore can remove them.
    pub fn capture<'a>(&self, keys: impl IntoIterator<Item = &'a String>) -> Vec<(String, Option<Value>)> {
        keys.into_iter()
            .map(|k| (k.clone(), self.fields.get(k).cloned()))
            .collect()
    }

    /// Restore previously captured field values.
    pub fn restore(&mut self, captured: &[(String, Option<Value>)]) -> bool {
        let mut changed = false;
        for (key, value) in captured {
            let current = self.fields.get(key);
            match value {
                Some(v) if current != Some(v) => {
                    self.fields.insert(key.clone(), v.clone());
                    changed = true;
                }
                None if current.is_some() => {
                    self.fields.remove(key);
                    changed = true;
                }
                _ => {}
            }
        }
        changed
    }
}

/// Extract the id of a (possibly partial) row.
pub fn row_id(row: &Value) -> Option<RecordId> {
    match row.get(ID_FIELD)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Whether a column is part of the record identity.
pub fn is_identity_field(name: &str) -> bool {
    name == ID_FIELD || name == CREATED_AT_FIELD
}
