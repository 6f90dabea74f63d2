//! WebSocket message protocol definitions.
//!
//! All messages are JSON-encoded and use snake_case for field names.

use keepsake_engine::{CollectionName, Record};
use serde::{Deserialize, Serialize};

use crate::store::StoreEvent;

/// Messages sent from client to server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Request the current records of a collection.
    Snapshot {
        collection: String,
        /// Request ID for correlating responses
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The visible state of a collection changed.
    Changed {
        collection: CollectionName,
        generation: u64,
    },

    /// Current records of a collection, newest first.
    Snapshot {
        collection: CollectionName,
        generation: u64,
        records: Vec<Record>,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Response to ping.
    Pong,

    /// A store failure, or a request that could not be served.
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        collection: Option<CollectionName>,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

impl ServerMessage {
    /// Create an error reply to a request.
    pub fn error(message: impl Into<String>, request_id: Option<String>) -> Self {
        ServerMessage::Error {
            collection: None,
            message: message.into(),
            request_id,
        }
    }
}

impl From<&StoreEvent> for ServerMessage {
    fn from(event: &StoreEvent) -> Self {
        match event {
            StoreEvent::Changed {
                collection,
                generation,
            } => ServerMessage::Changed {
                collection: collection.clone(),
                generation: *generation,
            },
            StoreEvent::Failed { collection, error } => ServerMessage::Error {
                collection: Some(collection.clone()),
                message: error.to_string(),
                request_id: None,
            },
        }
    }
}
