//! Error types for the Keepsake engine.

use crate::{CollectionName, RecordId};
use thiserror::Error;

/// A local validation failure. Never reaches the network.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("field '{0}' must not be empty")]
    EmptyField(String),

    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("invalid value '{value}' for field '{field}'")]
    InvalidEnumValue { field: String, value: String },

    #[error("field '{0}' cannot be changed")]
    ImmutableField(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("insufficient balance: have {balance}, need {required}")]
    InsufficientBalance { balance: i64, required: i64 },
}

/// Which remote write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for WriteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteKind::Insert => write!(f, "insert"),
            WriteKind::Update => write!(f, "update"),
            WriteKind::Delete => write!(f, "delete"),
        }
    }
}

/// All possible errors from the Keepsake engine and store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("event for collection '{got}' delivered to '{expected}'")]
    CollectionMismatch {
        expected: CollectionName,
        got: CollectionName,
    },

    #[error("failed to load collection: {0}")]
    Fetch(String),

    #[error("remote {op} failed{}: {message}", for_id(.id))]
    RemoteWrite {
        op: WriteKind,
        id: Option<RecordId>,
        message: String,
    },

    #[error("notification channel error: {0}")]
    NotificationChannel(String),
}

impl Error {
    /// Whether this error was produced locally, without contacting the remote.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::RecordNotFound(_)
                | Error::InvalidRecord(_)
                | Error::CollectionMismatch { .. }
        )
    }
}

fn for_id(id: &Option<RecordId>) -> String {
    id.as_ref().map(|id| format!(" for {id}")).unwrap_or_default()
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
