//! WebSocket support for live updates.
//!
//! Clients connect to `/live` and are pushed a `changed` message whenever a
//! store's visible state changes and an `error` message whenever a store
//! surfaces a failure. Clients may ask for a full snapshot of a collection
//! at any time.

mod manager;
mod protocol;

pub use manager::ConnectionManager;
pub use protocol::*;
