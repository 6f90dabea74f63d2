//! The Keepsake collections: diary entries, the gift wishlist and the
//! flower reward ledger.
//!
//! Each module provides the collection name, its schema, typed read models,
//! draft constructors and the derived views its screen needs.

pub mod diary;
pub mod gifts;
pub mod rewards;

use crate::{error::ValidationError, Error, Fields, Record};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};

/// Business rule checked against the current records before an insert is
/// sent to the remote.
pub trait InsertGuard: Send + Sync {
    fn check(&self, records: &[Record], draft: &Fields) -> Result<(), ValidationError>;
}

/// Insert guard registered for a collection, if any.
pub fn insert_guard(collection: &str) -> Option<Box<dyn InsertGuard>> {
    match collection {
        rewards::COLLECTION => Some(Box::new(rewards::RedeemGuard)),
        _ => None,
    }
}

/// Read a record into a typed model.
pub(crate) fn read_record<T: DeserializeOwned>(record: &Record) -> crate::error::Result<T> {
    serde_json::from_value(record.to_row())
        .map_err(|e| Error::InvalidRecord(format!("record {}: {e}", record.id)))
}

/// Turn a draft struct into a field map.
pub(crate) fn to_fields<T: Serialize>(draft: &T) -> Result<Fields, ValidationError> {
    match serde_json::to_value(draft) {
        Ok(serde_json::Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(ValidationError::InvalidPayload("draft must be an object".into())),
        Err(e) => Err(ValidationError::InvalidPayload(e.to_string())),
    }
}

/// Read a missing or null column as the type's default.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}
