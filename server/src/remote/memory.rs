//! In-process realtime collection.
//!
//! Behaves like a hosted table with a realtime channel: the collection
//! assigns ids and timestamps, and every write is broadcast to all open
//! change feeds. Failures and latency can be injected for tests and demos.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use keepsake_engine::{
    record::{row_id, CREATED_AT_FIELD, ID_FIELD},
    ChangeEvent, Fields,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

use super::{ChangeStream, ChannelMessage, RemoteCollection, RemoteError, SelectQuery};

const FEED_CAPACITY: usize = 1024;

/// Operation a failure can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Select,
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone)]
enum Signal {
    Change(ChangeEvent),
    Interrupted(String),
}

#[derive(Debug, Default)]
struct State {
    /// Rows in insertion order
    rows: Vec<Value>,
    last_created: Option<DateTime<Utc>>,
    faults: VecDeque<Fault>,
    latency: Duration,
}

/// A collection held in memory with a broadcast change feed.
#[derive(Debug)]
pub struct MemoryCollection {
    name: String,
    state: Mutex<State>,
    feed: broadcast::Sender<Signal>,
}

impl MemoryCollection {
    /// Create an empty collection.
    pub fn new(name: impl Into<String>) -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            name: name.into(),
            state: Mutex::new(State::default()),
            feed,
        }
    }

    /// Make the next call of `op` fail. Calls queue up.
    pub fn fail_next(&self, op: Fault) {
        self.state.lock().faults.push_back(op);
    }

    /// Delay every remote call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Drop the change feed of every open stream. Each stream reports the
    /// interruption and then [`ChannelMessage::Resynced`].
    pub fn interrupt(&self, reason: impl Into<String>) {
        let _ = self.feed.send(Signal::Interrupted(reason.into()));
    }

    /// Number of rows held.
    pub fn len(&self) -> usize {
        self.state.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows newest first, as `select` would return them.
    pub fn rows(&self) -> Vec<Value> {
        newest_first(&self.state.lock().rows, None)
    }

    async fn enter(&self, op: Fault) -> Result<(), RemoteError> {
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        if let Some(pos) = state.faults.iter().position(|f| *f == op) {
            state.faults.remove(pos);
            return Err(RemoteError::Unavailable(format!(
                "injected {op:?} failure on {}",
                self.name
            )));
        }
        Ok(())
    }

    fn publish(&self, event: ChangeEvent) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.feed.send(Signal::Change(event));
    }
}

#[async_trait]
impl RemoteCollection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn select(&self, query: SelectQuery) -> Result<Vec<Value>, RemoteError> {
        self.enter(Fault::Select).await?;
        Ok(newest_first(&self.state.lock().rows, query.limit))
    }

    async fn insert(&self, fields: Fields) -> Result<Value, RemoteError> {
        self.enter(Fault::Insert).await?;

        let row = {
            let mut state = self.state.lock();
            // Strictly increasing, so creation order is never ambiguous.
            let now = Utc::now();
            let created_at = match state.last_created {
                Some(last) if now <= last => last + chrono::Duration::microseconds(1),
                _ => now,
            };
            state.last_created = Some(created_at);

            let mut row = fields;
            row.insert(
                ID_FIELD.into(),
                Value::String(uuid::Uuid::new_v4().to_string()),
            );
            row.insert(
                CREATED_AT_FIELD.into(),
                Value::String(created_at.to_rfc3339()),
            );
            let row = Value::Object(row);
            state.rows.push(row.clone());
            row
        };

        self.publish(ChangeEvent::created(&self.name, row.clone()));
        Ok(row)
    }

    async fn update(&self, id: &str, patch: Fields) -> Result<(), RemoteError> {
        self.enter(Fault::Update).await?;

        let (before, after) = {
            let mut state = self.state.lock();
            let row = state
                .rows
                .iter_mut()
                .find(|r| row_id(r).as_deref() == Some(id))
                .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;

            let before = row.clone();
            if let Value::Object(obj) = &mut *row {
                for (key, value) in patch {
                    if key != ID_FIELD && key != CREATED_AT_FIELD {
                        obj.insert(key, value);
                    }
                }
            }
            (before, row.clone())
        };

        self.publish(ChangeEvent::updated(&self.name, Some(before), after));
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), RemoteError> {
        self.enter(Fault::Delete).await?;

        let removed = {
            let mut state = self.state.lock();
            let pos = state
                .rows
                .iter()
                .position(|r| row_id(r).as_deref() == Some(id));
            pos.map(|pos| state.rows.remove(pos))
        };

        if let Some(before) = removed {
            self.publish(ChangeEvent::deleted(&self.name, before));
        }
        Ok(())
    }

    async fn changes(&self) -> Result<ChangeStream, RemoteError> {
        let rx = self.feed.subscribe();

        let stream = futures::stream::unfold((rx, false), |(mut rx, resync)| async move {
            if resync {
                return Some((Ok(ChannelMessage::Resynced), (rx, false)));
            }
            match rx.recv().await {
                Ok(Signal::Change(event)) => Some((Ok(ChannelMessage::Change(event)), (rx, false))),
                Ok(Signal::Interrupted(reason)) => Some((Err(RemoteError::Channel(reason)), (rx, true))),
                Err(broadcast::error::RecvError::Lagged(missed)) => Some((
                    Err(RemoteError::Channel(format!("missed {missed} changes"))),
                    (rx, true),
                )),
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });

        Ok(stream.boxed())
    }
}

fn newest_first(rows: &[Value], limit: Option<usize>) -> Vec<Value> {
    rows.iter()
        .rev()
        .take(limit.unwrap_or(usize::MAX))
        .cloned()
        .collect()
}
