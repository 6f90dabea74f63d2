//! Mirror - the in-memory copy of one remote collection.
//!
//! The mirror is fed from three sources:
//!
//! 1. bulk loads ([`Mirror::begin_load`] then [`Mirror::finish_load`], or
//!    [`Mirror::replace_all`] in one step),
//! 2. local optimistic mutations ([`Mirror::begin_update`],
//!    [`Mirror::begin_remove`]), later settled with [`Mirror::confirm`] or
//!    [`Mirror::roll_back`],
//! 3. change notifications ([`Mirror::apply`]).
//!
//! # Reconciliation rules
//!
//! - Records are ordered by `created_at`, newest first. A record arriving with
//!   the same timestamp as existing ones is placed before them.
//! - A notification is the newest observed truth. It is applied as-is, and it
//!   refreshes the values a pending update would restore on rollback.
//! - `created` for an id already held is a no-op (duplicate or late echo).
//! - `updated` for an unknown id inserts the row if it is complete.
//! - `deleted` settles any pending mutation on that id.
//! - A record removed optimistically stays hidden until the removal is
//!   confirmed or rolled back; notifications refresh the copy that a rollback
//!   would restore.
//! - A load snapshot can be older than notifications applied while it was
//!   being read. For ids notified after the load began, the notified state
//!   wins over the snapshot.
//!
//! The mirror does no IO and never blocks; it is driven by the caller.

use crate::{
    change::{ChangeEvent, ChangeKind},
    error::Result,
    record::is_identity_field,
    view::Selector,
    CollectionName, Error, Fields, Record, RecordId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Handle for one optimistic mutation awaiting its remote outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MutationTicket(u64);

impl std::fmt::Display for MutationTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Marks the start of a bulk load. Hand it back to [`Mirror::finish_load`]
/// with the rows read, or to [`Mirror::abandon_load`] if the read failed.
#[derive(Debug)]
#[must_use = "a started load must be finished or abandoned"]
pub struct LoadStamp {
    notified: u64,
}

/// Visible lifecycle state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordState {
    /// Not held (never seen, deleted, or not yet echoed after insert)
    Absent,
    /// Matches the last observed remote state
    Confirmed,
    /// Shows an optimistic patch not yet confirmed
    PendingUpdate,
    /// Hidden by an optimistic removal not yet confirmed
    PendingDelete,
}

/// Outcome of applying a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Updated,
    Removed,
    /// Valid event that changed nothing visible
    Unchanged,
    /// Event about a record the mirror cannot place (e.g. partial update for
    /// an unknown id)
    Ignored,
}

#[derive(Debug, Clone)]
enum Pending {
    Update {
        id: RecordId,
        /// Values to restore on rollback, per patched field
        prior: Vec<(String, Option<Value>)>,
    },
    Remove {
        record: Record,
        index: usize,
    },
}

impl Pending {
    fn record_id(&self) -> &str {
        match self {
            Pending::Update { id, .. } => id,
            Pending::Remove { record, .. } => &record.id,
        }
    }
}

/// In-memory mirror of a remote collection.
#[derive(Debug, Clone)]
pub struct Mirror {
    collection: CollectionName,
    /// Visible records, newest first
    records: Vec<Record>,
    /// Unsettled optimistic mutations
    pending: BTreeMap<MutationTicket, Pending>,
    next_ticket: u64,
    /// Bumped on every visible change
    generation: u64,
    /// Notifications applied so far
    notified: u64,
    /// Loads begun and not yet finished or abandoned
    loads_in_flight: usize,
    /// Per id touched while a load was in flight: the notification count at
    /// the time, and whether the row still exists
    touched: HashMap<RecordId, (u64, bool)>,
}

impl Mirror {
    /// Create an empty mirror for a collection.
    pub fn new(collection: impl Into<CollectionName>) -> Self {
        Self {
            collection: collection.into(),
            records: Vec::new(),
            pending: BTreeMap::new(),
            next_ticket: 0,
            generation: 0,
            notified: 0,
            loads_in_flight: 0,
            touched: HashMap::new(),
        }
    }

    /// Collection this mirror follows.
    pub fn collection(&self) -> &CollectionName {
        &self.collection
    }

    /// Visible records, newest first.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Get a visible record by ID.
    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Count of visible records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if no records are visible.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Monotonic counter of visible changes.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Count of unsettled optimistic mutations.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Lifecycle state of a record.
    pub fn state_of(&self, id: &str) -> RecordState {
        let mut updating = false;
        for p in self.pending.values() {
            match p {
                Pending::Remove { record, .. } if record.id == id => {
                    return RecordState::PendingDelete
                }
                Pending::Update { id: pid, .. } if pid.as_str() == id => updating = true,
                _ => {}
            }
        }

        match (self.position(id), updating) {
            (None, _) => RecordState::Absent,
            (Some(_), true) => RecordState::PendingUpdate,
            (Some(_), false) => RecordState::Confirmed,
        }
    }

    /// Compute a derived view over the visible records.
    pub fn derive<S: Selector>(&self, selector: &S) -> S::Output {
        selector.select(&self.records)
    }

    /// Replace the visible state with a freshly loaded snapshot.
    ///
    /// Records with a pending removal stay hidden. Loaded values become the
    /// rollback target of pending updates.
    pub fn replace_all(&mut self, records: Vec<Record>) {
        let stamp = self.begin_load();
        self.finish_load(stamp, records);
    }

    /// Note that a bulk read is about to start.
    pub fn begin_load(&mut self) -> LoadStamp {
        self.loads_in_flight += 1;
        LoadStamp {
            notified: self.notified,
        }
    }

    /// Replace the visible state with rows read since `stamp` was taken.
    ///
    /// Like [`Mirror::replace_all`], except that ids notified after the
    /// stamp keep their notified state: rows created or updated since stay
    /// as notified, rows deleted since stay gone.
    pub fn finish_load(&mut self, stamp: LoadStamp, records: Vec<Record>) {
        let mut records = records;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut seen = HashSet::new();
        records.retain(|r| seen.insert(r.id.clone()));

        let mut fresh = HashSet::new();
        for (id, &(at, exists)) in &self.touched {
            if at <= stamp.notified {
                continue;
            }
            if !exists {
                records.retain(|r| r.id != *id);
                fresh.insert(id.clone());
            } else if let Some(current) = self.get(id) {
                records.retain(|r| r.id != *id);
                records.push(current.clone());
                fresh.insert(id.clone());
            } else if self.pending_removal(id).is_some() {
                fresh.insert(id.clone());
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        for pending in self.pending.values_mut() {
            match pending {
                Pending::Remove { record, .. } => {
                    if let Some(pos) = records.iter().position(|r| r.id == record.id) {
                        let loaded = records.remove(pos);
                        if !fresh.contains(record.id.as_str()) {
                            *record = loaded;
                        }
                    }
                }
                Pending::Update { id, prior } => {
                    if fresh.contains(id.as_str()) {
                        continue;
                    }
                    if let Some(loaded) = records.iter().find(|r| r.id == *id) {
                        refresh_prior(prior, &loaded.fields);
                    }
                }
            }
        }

        self.records = records;
        self.generation += 1;
        self.end_load();
    }

    /// Drop a load whose read failed or whose rows are not wanted.
    pub fn abandon_load(&mut self, _stamp: LoadStamp) {
        self.end_load();
    }

    fn end_load(&mut self) {
        self.loads_in_flight = self.loads_in_flight.saturating_sub(1);
        if self.loads_in_flight == 0 {
            self.touched.clear();
        }
    }

    /// Apply a change notification.
    pub fn apply(&mut self, event: &ChangeEvent) -> Result<Applied> {
        if event.collection != self.collection {
            return Err(Error::CollectionMismatch {
                expected: self.collection.clone(),
                got: event.collection.clone(),
            });
        }

        let id = event
            .record_id()
            .ok_or_else(|| Error::InvalidRecord(format!("{} event without id", event.event_type)))?;

        self.notified += 1;
        if self.loads_in_flight > 0 {
            let exists = event.event_type != ChangeKind::Deleted;
            self.touched.insert(id.clone(), (self.notified, exists));
        }

        match event.event_type {
            ChangeKind::Created => self.apply_created(&id, event),
            ChangeKind::Updated => self.apply_updated(&id, event),
            ChangeKind::Deleted => Ok(self.apply_deleted(&id)),
        }
    }

    fn apply_created(&mut self, id: &str, event: &ChangeEvent) -> Result<Applied> {
        if self.position(id).is_some() || self.pending_removal(id).is_some() {
            return Ok(Applied::Unchanged);
        }

        let row = event
            .after
            .as_ref()
            .ok_or_else(|| Error::InvalidRecord(format!("created event for {id} without row")))?;
        let record = Record::from_row(row)?;
        self.insert_ordered(record);
        Ok(Applied::Inserted)
    }

    fn apply_updated(&mut self, id: &str, event: &ChangeEvent) -> Result<Applied> {
        let fields = event
            .fields()
            .ok_or_else(|| Error::InvalidRecord(format!("updated event for {id} without row")))?;

        for pending in self.pending.values_mut() {
            match pending {
                Pending::Update { id: pid, prior } if pid.as_str() == id => {
                    refresh_prior(prior, fields)
                }
                Pending::Remove { record, .. } if record.id == id => {
                    record.merge(fields);
                }
                _ => {}
            }
        }

        if self.pending_removal(id).is_some() {
            return Ok(Applied::Unchanged);
        }

        if let Some(pos) = self.position(id) {
            if self.records[pos].merge(fields) {
                self.generation += 1;
                return Ok(Applied::Updated);
            }
            return Ok(Applied::Unchanged);
        }

        // An update can overtake its create; a complete row is enough to
        // place it.
        match event.after.as_ref().map(Record::from_row) {
            Some(Ok(record)) => {
                self.insert_ordered(record);
                Ok(Applied::Inserted)
            }
            _ => Ok(Applied::Ignored),
        }
    }

    fn apply_deleted(&mut self, id: &str) -> Applied {
        let before = self.pending.len();
        self.pending.retain(|_, p| p.record_id() != id);
        let settled = before != self.pending.len();

        if let Some(pos) = self.position(id) {
            self.records.remove(pos);
            self.generation += 1;
            Applied::Removed
        } else if settled {
            Applied::Unchanged
        } else {
            Applied::Ignored
        }
    }

    /// Apply a patch optimistically.
    ///
    /// The values being overwritten are captured now and restored by
    /// [`Mirror::roll_back`] unless a notification reports newer ones first.
    pub fn begin_update(&mut self, id: &str, patch: &Fields) -> Result<MutationTicket> {
        let pos = self
            .position(id)
            .ok_or_else(|| Error::RecordNotFound(id.to_string()))?;

        let record = &mut self.records[pos];
        let prior = record.capture(patch.keys().filter(|k| !is_identity_field(k)));
        if record.merge(patch) {
            self.generation += 1;
        }

        let ticket = self.next_ticket();
        self.pending.insert(
            ticket,
            Pending::Update {
                id: id.to_string(),
                prior,
            },
        );
        Ok(ticket)
    }

    /// Remove a record optimistically.
    pub fn begin_remove(&mut self, id: &str) -> Result<MutationTicket> {
        let index = self
            .position(id)
            .ok_or_else(|| Error::RecordNotFound(id.to_string()))?;

        let record = self.records.remove(index);
        self.generation += 1;

        let ticket = self.next_ticket();
        self.pending.insert(ticket, Pending::Remove { record, index });
        Ok(ticket)
    }

    /// Settle a mutation the remote accepted.
    ///
    /// Returns false if the ticket was already settled.
    pub fn confirm(&mut self, ticket: MutationTicket) -> bool {
        self.pending.remove(&ticket).is_some()
    }

    /// Undo a mutation the remote rejected.
    ///
    /// Returns the affected record id, or `None` if the ticket was already
    /// settled (confirmed, rolled back, or overtaken by a delete
    /// notification).
    pub fn roll_back(&mut self, ticket: MutationTicket) -> Option<RecordId> {
        match self.pending.remove(&ticket)? {
            Pending::Update { id, prior } => {
                let restore = self.hand_over(ticket, &id, prior);
                self.restore_fields(&id, &restore);
                Some(id)
            }
            Pending::Remove { record, index } => {
                let id = record.id.clone();
                if self.position(&id).is_none() {
                    self.insert_near(index, record);
                }
                Some(id)
            }
        }
    }

    /// Pass captured values of fields that a later pending update on the same
    /// record also patched over to that update; it overwrote a value that
    /// never reached the remote. Returns the fields to restore now.
    fn hand_over(
        &mut self,
        ticket: MutationTicket,
        id: &str,
        prior: Vec<(String, Option<Value>)>,
    ) -> Vec<(String, Option<Value>)> {
        let mut restore = Vec::with_capacity(prior.len());
        for (key, value) in prior {
            let later_slot = self
                .pending
                .range_mut(ticket..)
                .find_map(|(_, later)| match later {
                    Pending::Update {
                        id: later_id,
                        prior: later_prior,
                    } if later_id.as_str() == id => {
                        later_prior.iter_mut().find(|(k, _)| *k == key)
                    }
                    _ => None,
                });

            match later_slot {
                Some(slot) => slot.1 = value,
                None => restore.push((key, value)),
            }
        }
        restore
    }

    fn restore_fields(&mut self, id: &str, captured: &[(String, Option<Value>)]) {
        if let Some(pos) = self.position(id) {
            if self.records[pos].restore(captured) {
                self.generation += 1;
            }
            return;
        }

        // Hidden behind a pending removal: fix the copy a rollback of the
        // removal would bring back.
        for pending in self.pending.values_mut() {
            if let Pending::Remove { record, .. } = pending {
                if record.id == id {
                    record.restore(captured);
                }
            }
        }
    }

    fn pending_removal(&self, id: &str) -> Option<MutationTicket> {
        self.pending.iter().find_map(|(t, p)| match p {
            Pending::Remove { record, .. } if record.id == id => Some(*t),
            _ => None,
        })
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }

    fn next_ticket(&mut self) -> MutationTicket {
        self.next_ticket += 1;
        MutationTicket(self.next_ticket)
    }

    fn insert_ordered(&mut self, record: Record) {
        let pos = self
            .records
            .partition_point(|r| r.created_at > record.created_at);
        self.records.insert(pos, record);
        self.generation += 1;
    }

    /// Put a record back at `index` if that keeps the order, otherwise at its
    /// ordered position.
    fn insert_near(&mut self, index: usize, record: Record) {
        let fits = index <= self.records.len()
            && (index == 0 || self.records[index - 1].created_at >= record.created_at)
            && self
                .records
                .get(index)
                .map_or(true, |next| next.created_at <= record.created_at);

        if fits {
            self.records.insert(index, record);
            self.generation += 1;
        } else {
            self.insert_ordered(record);
        }
    }
}

fn refresh_prior(prior: &mut [(String, Option<Value>)], fields: &Fields) {
    for (key, value) in prior.iter_mut() {
        if let Some(reported) = fields.get(key.as_str()) {
            *value = Some(reported.clone());
        }
    }
}
