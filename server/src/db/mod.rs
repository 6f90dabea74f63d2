//! PostgreSQL setup for the database-backed collections.

mod pool;

pub use pool::*;
