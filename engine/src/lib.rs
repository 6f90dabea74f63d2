//! # Keepsake Engine
//!
//! The reconciliation core behind Keepsake: an in-memory mirror of a remote
//! collection that stays consistent with the remote while showing local
//! edits before the remote confirms them.
//!
//! This crate does no IO. The async driver that talks to the remote store,
//! spawns writes and fans out notifications lives in `keepsake-server`.
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] is a row of a remote collection: a remote-assigned `id` and
//! `created_at`, plus a JSON object of domain fields.
//!
//! ### Change events
//!
//! The remote echoes every mutation (from any client) as a [`ChangeEvent`]:
//! `created`, `updated` or `deleted`. Delivery is at-least-once and unordered
//! relative to local actions.
//!
//! ### Mirror
//!
//! The [`Mirror`] is the reconciliation state machine. It accepts bulk loads,
//! change events, and optimistic mutations identified by a
//! [`MutationTicket`], which are later confirmed or rolled back.
//!
//! ### Derived views
//!
//! A [`Selector`] projects the visible records into a value (a balance, a
//! count, a filtered list). Any `Fn(&[Record]) -> T` is a selector.
//!
//! ## Quick Start
//!
//! ```rust
//! use keepsake_engine::{ChangeEvent, Mirror, Sum};
//! use serde_json::json;
//!
//! let mut mirror = Mirror::new("reward_actions");
//! mirror
//!     .apply(&ChangeEvent::created(
//!         "reward_actions",
//!         json!({
//!             "id": "a1",
//!             "created_at": "2024-02-14T10:00:00Z",
//!             "action_type": "add_flower",
//!             "flower_amount": 1
//!         }),
//!     ))
//!     .unwrap();
//!
//! assert_eq!(mirror.derive(&Sum::of("flower_amount")), 1);
//!
//! // Optimistic edit, visible at once, undone when the remote rejects it.
//! let patch = json!({"flower_amount": 5}).as_object().cloned().unwrap();
//! let ticket = mirror.begin_update("a1", &patch).unwrap();
//! assert_eq!(mirror.derive(&Sum::of("flower_amount")), 5);
//!
//! mirror.roll_back(ticket);
//! assert_eq!(mirror.derive(&Sum::of("flower_amount")), 1);
//! ```

pub mod change;
pub mod collections;
pub mod error;
pub mod mirror;
pub mod record;
pub mod schema;
pub mod view;

// Re-export main types at crate root
pub use change::{ChangeEvent, ChangeKind};
pub use collections::InsertGuard;
pub use error::{Error, ValidationError, WriteKind};
pub use mirror::{Applied, LoadStamp, Mirror, MutationTicket, RecordState};
pub use record::{Record, CREATED_AT_FIELD, ID_FIELD};
pub use schema::{CollectionSchema, FieldDef, FieldType};
pub use view::{Count, FieldEq, Filter, Latest, Selector, SignedTotals, Sum, Totals};

/// Type aliases for clarity
pub type RecordId = String;
pub type CollectionName = String;
pub type Timestamp = chrono::DateTime<chrono::Utc>;
pub type Fields = serde_json::Map<String, serde_json::Value>;
