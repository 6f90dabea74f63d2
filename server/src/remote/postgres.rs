//! PostgreSQL-backed collection.
//!
//! Rows are read as `to_jsonb` objects so every column reaches the store
//! without a per-table row type. Writes bind the field map as one JSONB
//! parameter and expand it with `jsonb_populate_record`, which applies the
//! table's column types. The change feed is `LISTEN keepsake_changes`, fed
//! by the trigger installed in `migrations/`.
//!
//! Notification payloads are capped at 8000 bytes, so the trigger publishes
//! only the operation, table and row id. Created and updated rows are read
//! back by id when the notification arrives.

use async_trait::async_trait;
use futures::StreamExt;
use keepsake_engine::{ChangeEvent, ChangeKind, Fields};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::postgres::PgListener;
use sqlx::PgPool;

use super::{ChangeStream, ChannelMessage, RemoteCollection, RemoteError, SelectQuery};

/// Notification channel the change trigger publishes on.
pub const CHANGES_CHANNEL: &str = "keepsake_changes";

/// Payload published by the change trigger.
#[derive(Debug, Deserialize)]
struct TriggerPayload {
    op: ChangeKind,
    table: String,
    id: String,
}

/// Turn a trigger payload into a change event, reading the current row for
/// creates and updates. `None` when the row is already gone; its delete
/// notification follows.
async fn resolve(pool: &PgPool, payload: TriggerPayload) -> Result<Option<ChangeEvent>, RemoteError> {
    let TriggerPayload { op, table, id } = payload;
    if op == ChangeKind::Deleted {
        return Ok(Some(ChangeEvent::deleted(table, json!({ "id": id }))));
    }

    let sql = format!("SELECT to_jsonb(t) FROM {table} t WHERE t.id::text = $1");
    let row = sqlx::query_scalar::<_, Value>(&sql)
        .bind(&id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|row| ChangeEvent {
        event_type: op,
        collection: table,
        before: None,
        after: Some(row),
    }))
}

/// A table in PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgCollection {
    pool: PgPool,
    table: String,
}

impl PgCollection {
    /// Wrap `table`. The name is interpolated into SQL, so only lowercase
    /// identifiers are accepted.
    pub fn new(pool: PgPool, table: impl Into<String>) -> Result<Self, RemoteError> {
        let table = table.into();
        let valid = !table.is_empty()
            && table
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            && !table.starts_with(|c: char| c.is_ascii_digit());
        if !valid {
            return Err(RemoteError::InvalidTable(table));
        }
        Ok(Self { pool, table })
    }

    fn columns(fields: &Fields) -> String {
        fields
            .keys()
            .map(|k| quote_ident(k))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl RemoteCollection for PgCollection {
    fn name(&self) -> &str {
        &self.table
    }

    async fn select(&self, query: SelectQuery) -> Result<Vec<Value>, RemoteError> {
        let sql = format!(
            "SELECT to_jsonb(t) FROM {} t ORDER BY t.created_at DESC LIMIT $1",
            self.table
        );
        let limit = query.limit.map(|l| l as i64);

        let rows = sqlx::query_scalar::<_, Value>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn insert(&self, fields: Fields) -> Result<Value, RemoteError> {
        if fields.is_empty() {
            return Err(RemoteError::Rejected("empty row".into()));
        }
        let columns = Self::columns(&fields);
        let sql = format!(
            "INSERT INTO {t} AS t ({columns}) \
             SELECT {columns} FROM jsonb_populate_record(NULL::{t}, $1) \
             RETURNING to_jsonb(t)",
            t = self.table
        );

        let row = sqlx::query_scalar::<_, Value>(&sql)
            .bind(Value::Object(fields))
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }

    async fn update(&self, id: &str, patch: Fields) -> Result<(), RemoteError> {
        if patch.is_empty() {
            return Err(RemoteError::Rejected("empty patch".into()));
        }
        let columns = Self::columns(&patch);
        let sql = format!(
            "UPDATE {t} AS t SET ({columns}) = \
             (SELECT {columns} FROM jsonb_populate_record(NULL::{t}, $2)) \
             WHERE t.id::text = $1",
            t = self.table
        );

        let result = sqlx::query(&sql)
            .bind(id)
            .bind(Value::Object(patch))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RemoteError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), RemoteError> {
        let sql = format!("DELETE FROM {} WHERE id::text = $1", self.table);
        sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(())
    }

    async fn changes(&self) -> Result<ChangeStream, RemoteError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CHANGES_CHANNEL).await?;
        tracing::debug!(table = %self.table, channel = CHANGES_CHANNEL, "Listening for changes");

        let state = (listener, self.pool.clone(), self.table.clone(), false);
        let stream = futures::stream::unfold(state, |(mut listener, pool, table, resync)| async move {
            if resync {
                return Some((Ok(ChannelMessage::Resynced), (listener, pool, table, false)));
            }
            loop {
                match listener.try_recv().await {
                    Ok(Some(notification)) => {
                        let payload: TriggerPayload = match serde_json::from_str(notification.payload()) {
                            Ok(payload) => payload,
                            Err(e) => {
                                tracing::warn!(error = %e, "Malformed change notification");
                                continue;
                            }
                        };
                        if payload.table != table {
                            continue;
                        }
                        match resolve(&pool, payload).await {
                            Ok(Some(event)) => {
                                return Some((Ok(ChannelMessage::Change(event)), (listener, pool, table, false)));
                            }
                            Ok(None) => continue,
                            // The change is lost; a resync reloads it.
                            Err(e) => return Some((Err(e), (listener, pool, table, true))),
                        }
                    }
                    // The connection was lost; the next receive reconnects.
                    Ok(None) => {
                        let err = RemoteError::Channel("listener connection lost".into());
                        return Some((Err(err), (listener, pool, table, true)));
                    }
                    Err(e) => {
                        return Some((Err(RemoteError::Channel(e.to_string())), (listener, pool, table, true)));
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}
