//! Reconciling store: drives a [`Mirror`] against a [`RemoteCollection`].
//!
//! The mirror holds the state; this module does the IO around it. Updates
//! and removals are applied to the mirror first and the remote write is
//! spawned, so callers see the change at once and settle it later through
//! the returned [`PendingWrite`]. Inserts are validated locally and sent
//! as-is; the record shows up when the remote echoes it on the change feed.
//!
//! The mirror lock is a short critical section. It is never held across an
//! await point, and observers are notified only after it is released.
//!
//! Spawned tasks hold a weak reference to the store. A write whose store is
//! gone or [closed](ReconcilingStore::close) still runs to completion and
//! reports its outcome, but leaves the state alone.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::StreamExt;
use keepsake_engine::{
    collections::InsertGuard, record::row_id, Applied, ChangeEvent, CollectionName,
    CollectionSchema, Error, Fields, LoadStamp, Mirror, MutationTicket, Record, RecordId,
    RecordState, Selector, WriteKind,
};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::observer::{Observers, WatchId};
use crate::remote::{ChannelMessage, RemoteCollection, SelectQuery};

pub type Result<T> = std::result::Result<T, Error>;

/// Event delivered to local observers.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// Visible state changed; `generation` is the mirror generation after
    /// the change
    Changed {
        collection: CollectionName,
        generation: u64,
    },
    /// An operation or the change feed failed
    Failed {
        collection: CollectionName,
        error: Error,
    },
}

struct Inner {
    name: CollectionName,
    remote: Arc<dyn RemoteCollection>,
    schema: CollectionSchema,
    guard: Option<Box<dyn InsertGuard>>,
    load_limit: Option<usize>,
    mirror: Mutex<Mirror>,
    observers: Observers<StoreEvent>,
    closed: AtomicBool,
}

/// Optimistic store for one remote collection. Cloning is cheap and shares
/// the state.
#[derive(Clone)]
pub struct ReconcilingStore {
    inner: Arc<Inner>,
}

/// Builder for [`ReconcilingStore`].
pub struct StoreBuilder {
    remote: Arc<dyn RemoteCollection>,
    schema: CollectionSchema,
    guard: Option<Box<dyn InsertGuard>>,
    load_limit: Option<usize>,
}

impl StoreBuilder {
    /// Business rule checked before every insert.
    pub fn guard(mut self, guard: Box<dyn InsertGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Load at most `limit` rows, newest first.
    pub fn load_limit(mut self, limit: usize) -> Self {
        self.load_limit = Some(limit);
        self
    }

    pub fn build(self) -> ReconcilingStore {
        let name = self.remote.name().to_string();
        ReconcilingStore {
            inner: Arc::new(Inner {
                mirror: Mutex::new(Mirror::new(name.clone())),
                name,
                remote: self.remote,
                schema: self.schema,
                guard: self.guard,
                load_limit: self.load_limit,
                observers: Observers::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }
}

impl ReconcilingStore {
    /// Start building a store over `remote`, validating writes against
    /// `schema`.
    pub fn builder(remote: Arc<dyn RemoteCollection>, schema: CollectionSchema) -> StoreBuilder {
        StoreBuilder {
            remote,
            schema,
            guard: None,
            load_limit: None,
        }
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Copy of the visible records, newest first.
    pub fn snapshot(&self) -> Vec<Record> {
        self.inner.mirror.lock().records().to_vec()
    }

    pub fn get(&self, id: &str) -> Option<Record> {
        self.inner.mirror.lock().get(id).cloned()
    }

    pub fn state_of(&self, id: &str) -> RecordState {
        self.inner.mirror.lock().state_of(id)
    }

    pub fn generation(&self) -> u64 {
        self.inner.mirror.lock().generation()
    }

    /// Number of optimistic mutations awaiting their remote outcome.
    pub fn pending_count(&self) -> usize {
        self.inner.mirror.lock().pending_count()
    }

    /// Compute a view over the current records.
    ///
    /// The selector runs under the store lock and must not call back into
    /// this store.
    pub fn derive<S: Selector>(&self, selector: &S) -> S::Output {
        self.inner.mirror.lock().derive(selector)
    }

    /// Replace the local state with the remote collection.
    ///
    /// On failure the previous state is kept and the error is also reported
    /// to observers. Returns the number of records loaded.
    pub async fn load(&self) -> Result<usize> {
        self.inner.load().await
    }

    /// Open the change feed and apply every notification it delivers.
    ///
    /// An interrupted feed is reported as [`Error::NotificationChannel`];
    /// once the feed reports it is live again the store reloads.
    pub async fn subscribe(&self) -> Result<Subscription> {
        let mut feed = self
            .inner
            .remote
            .changes()
            .await
            .map_err(|e| self.inner.report(Error::NotificationChannel(e.to_string())))?;

        let weak = Arc::downgrade(&self.inner);
        let collection = self.inner.name.clone();
        let task = tokio::spawn(async move {
            while let Some(message) = feed.next().await {
                let Some(inner) = live(&weak) else { break };
                match message {
                    Ok(ChannelMessage::Change(event)) => inner.apply(&event),
                    Ok(ChannelMessage::Resynced) => {
                        tracing::info!(collection = %inner.name, "Change feed resynced, reloading");
                        // Failures are reported to observers by load.
                        let _ = inner.load().await;
                    }
                    Err(e) => {
                        inner.report(Error::NotificationChannel(e.to_string()));
                    }
                }
            }
            tracing::debug!("Change feed ended");
        });

        tracing::info!(collection = %collection, "Subscribed to changes");
        Ok(Subscription { collection, task })
    }

    /// Validate `draft` and send it to the remote.
    ///
    /// Nothing is shown locally until the remote echoes the created row.
    /// The pending write resolves to the id the remote assigned.
    pub fn insert(&self, draft: Fields) -> Result<PendingWrite<RecordId>> {
        let fields = self
            .inner
            .schema
            .prepare_draft(draft)
            .map_err(|e| self.inner.report(e.into()))?;

        if let Some(guard) = &self.inner.guard {
            let checked = {
                let mirror = self.inner.mirror.lock();
                guard.check(mirror.records(), &fields)
            };
            checked.map_err(|e| self.inner.report(e.into()))?;
        }

        let weak = Arc::downgrade(&self.inner);
        let remote = Arc::clone(&self.inner.remote);
        let task = tokio::spawn(async move {
            let outcome = match remote.insert(fields).await {
                Ok(row) => row_id(&row)
                    .ok_or_else(|| Error::InvalidRecord("inserted row has no id".into())),
                Err(e) => Err(Error::RemoteWrite {
                    op: WriteKind::Insert,
                    id: None,
                    message: e.to_string(),
                }),
            };

            if let Some(inner) = live(&weak) {
                match &outcome {
                    Ok(id) => tracing::debug!(collection = %inner.name, id = %id, "Insert accepted"),
                    Err(e) => {
                        inner.report(e.clone());
                    }
                }
            }
            outcome
        });

        Ok(PendingWrite {
            kind: WriteKind::Insert,
            id: None,
            task,
        })
    }

    /// Patch a record now and write the patch to the remote.
    ///
    /// If the remote rejects it, the patched fields go back to their values
    /// from before the call, or to newer ones a notification reported in the
    /// meantime.
    pub fn update_field(&self, id: &str, patch: Fields) -> Result<PendingWrite<()>> {
        self.inner
            .schema
            .validate_patch(&patch)
            .map_err(|e| self.inner.report(e.into()))?;

        let begun = {
            let mut mirror = self.inner.mirror.lock();
            let ticket = mirror.begin_update(id, &patch);
            ticket.map(|ticket| (ticket, mirror.generation()))
        };
        let (ticket, generation) = begun.map_err(|e| self.inner.report(e))?;
        self.inner.changed(generation);

        let record_id = id.to_string();
        let weak = Arc::downgrade(&self.inner);
        let remote = Arc::clone(&self.inner.remote);
        let task = tokio::spawn(async move {
            let outcome = remote
                .update(&record_id, patch)
                .await
                .map_err(|e| Error::RemoteWrite {
                    op: WriteKind::Update,
                    id: Some(record_id.clone()),
                    message: e.to_string(),
                });
            if let Some(inner) = live(&weak) {
                inner.settle(ticket, &outcome);
            }
            outcome
        });

        Ok(PendingWrite {
            kind: WriteKind::Update,
            id: Some(id.to_string()),
            task,
        })
    }

    /// Hide a record now and delete it on the remote.
    ///
    /// If the remote rejects the delete, the record is put back where it
    /// was.
    pub fn remove(&self, id: &str) -> Result<PendingWrite<()>> {
        let begun = {
            let mut mirror = self.inner.mirror.lock();
            let ticket = mirror.begin_remove(id);
            ticket.map(|ticket| (ticket, mirror.generation()))
        };
        let (ticket, generation) = begun.map_err(|e| self.inner.report(e))?;
        self.inner.changed(generation);

        let record_id = id.to_string();
        let weak = Arc::downgrade(&self.inner);
        let remote = Arc::clone(&self.inner.remote);
        let task = tokio::spawn(async move {
            let outcome = remote
                .delete(&record_id)
                .await
                .map_err(|e| Error::RemoteWrite {
                    op: WriteKind::Delete,
                    id: Some(record_id.clone()),
                    message: e.to_string(),
                });
            if let Some(inner) = live(&weak) {
                inner.settle(ticket, &outcome);
            }
            outcome
        });

        Ok(PendingWrite {
            kind: WriteKind::Delete,
            id: Some(id.to_string()),
            task,
        })
    }

    /// Register a listener for local changes and errors.
    pub fn watch(&self, listener: impl Fn(&StoreEvent) + Send + Sync + 'static) -> WatchId {
        self.inner.observers.watch(listener)
    }

    pub fn unwatch(&self, id: WatchId) -> bool {
        self.inner.observers.unwatch(id)
    }

    /// Detach the store from the remote. Writes still in flight complete
    /// without touching the state, and the change feed stops being applied.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(collection = %self.inner.name, "Store closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl std::fmt::Debug for ReconcilingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcilingStore")
            .field("name", &self.inner.name)
            .field("generation", &self.generation())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Upgrade a task's handle on the store, unless the store is gone or closed.
fn live(weak: &Weak<Inner>) -> Option<Arc<Inner>> {
    weak.upgrade().filter(|inner| !inner.is_closed())
}

impl Inner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn load(&self) -> Result<usize> {
        let query = match self.load_limit {
            Some(limit) => SelectQuery::limit(limit),
            None => SelectQuery::all(),
        };

        // Notifications applied while the read is in flight are newer than
        // the rows it returns.
        let mut window = LoadWindow::open(self);

        let rows = self
            .remote
            .select(query)
            .await
            .map_err(|e| self.report(Error::Fetch(e.to_string())))?;

        let records: Vec<Record> = rows
            .iter()
            .filter_map(|row| match Record::from_row(row) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(collection = %self.name, error = %e, "Skipping malformed row");
                    None
                }
            })
            .collect();
        let count = records.len();

        if self.is_closed() {
            return Ok(count);
        }

        let generation = window.finish(records);
        tracing::debug!(collection = %self.name, count, "Collection loaded");
        self.changed(generation);
        Ok(count)
    }

    fn apply(&self, event: &ChangeEvent) {
        if event.collection != self.name {
            return;
        }

        let (result, generation) = {
            let mut mirror = self.mirror.lock();
            let result = mirror.apply(event);
            (result, mirror.generation())
        };

        match result {
            Ok(Applied::Inserted | Applied::Updated | Applied::Removed) => self.changed(generation),
            Ok(applied) => {
                tracing::trace!(collection = %self.name, event = %event.event_type, ?applied, "Notification changed nothing");
            }
            Err(e) => {
                self.report(e);
            }
        }
    }

    fn settle(&self, ticket: MutationTicket, outcome: &Result<()>) {
        match outcome {
            Ok(()) => {
                let (confirmed, generation) = {
                    let mut mirror = self.mirror.lock();
                    (mirror.confirm(ticket), mirror.generation())
                };
                if confirmed {
                    self.changed(generation);
                }
            }
            Err(e) => {
                let rolled_back = {
                    let mut mirror = self.mirror.lock();
                    let id = mirror.roll_back(ticket);
                    id.map(|id| (id, mirror.generation()))
                };
                if let Some((id, generation)) = rolled_back {
                    tracing::debug!(collection = %self.name, id = %id, %ticket, "Rolled back");
                    self.changed(generation);
                }
                self.report(e.clone());
            }
        }
    }

    fn changed(&self, generation: u64) {
        self.observers.notify(&StoreEvent::Changed {
            collection: self.name.clone(),
            generation,
        });
    }

    /// Log `error`, hand it to observers and give it back.
    fn report(&self, error: Error) -> Error {
        if error.is_local() {
            tracing::debug!(collection = %self.name, error = %error, "Rejected locally");
        } else {
            tracing::warn!(collection = %self.name, error = %error, "Remote operation failed");
        }
        self.observers.notify(&StoreEvent::Failed {
            collection: self.name.clone(),
            error: error.clone(),
        });
        error
    }
}

/// A load in progress on the mirror. Abandoned on drop unless finished, so a
/// failed or cancelled read does not keep the window open.
struct LoadWindow<'a> {
    inner: &'a Inner,
    stamp: Option<LoadStamp>,
}

impl<'a> LoadWindow<'a> {
    fn open(inner: &'a Inner) -> Self {
        let stamp = inner.mirror.lock().begin_load();
        Self {
            inner,
            stamp: Some(stamp),
        }
    }

    /// Install the loaded records and return the new generation.
    fn finish(&mut self, records: Vec<Record>) -> u64 {
        let mut mirror = self.inner.mirror.lock();
        if let Some(stamp) = self.stamp.take() {
            mirror.finish_load(stamp, records);
        }
        mirror.generation()
    }
}

impl Drop for LoadWindow<'_> {
    fn drop(&mut self) {
        if let Some(stamp) = self.stamp.take() {
            self.inner.mirror.lock().abandon_load(stamp);
        }
    }
}

/// A remote write in flight.
///
/// Awaiting it yields the remote outcome. Dropping it does not cancel the
/// write.
#[must_use = "the write runs either way; await it to learn the outcome"]
pub struct PendingWrite<T> {
    kind: WriteKind,
    id: Option<RecordId>,
    task: JoinHandle<Result<T>>,
}

impl<T> PendingWrite<T> {
    pub fn kind(&self) -> WriteKind {
        self.kind
    }

    /// Record being written; `None` for inserts.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<T> Future for PendingWrite<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match Pin::new(&mut this.task).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(join)) => Poll::Ready(Err(Error::RemoteWrite {
                op: this.kind,
                id: this.id.clone(),
                message: join.to_string(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// A standing change feed. Dropping it stops applying notifications.
#[derive(Debug)]
pub struct Subscription {
    collection: CollectionName,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Whether the feed has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn close(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
