//! Store behavior against the in-memory remote.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keepsake_engine::collections::{diary, gifts, rewards};
use keepsake_engine::{
    Error, Fields, RecordState, Sum, ValidationError, WriteKind,
};
use keepsake_server::remote::{
    ChangeStream, Fault, MemoryCollection, RemoteCollection, RemoteError, SelectQuery,
};
use keepsake_server::{ReconcilingStore, StoreEvent, Stores, Subscription};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Notify;

fn fields(value: Value) -> Fields {
    value.as_object().cloned().unwrap()
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Collects everything a store reports to observers.
fn record_events(store: &ReconcilingStore) -> Arc<Mutex<Vec<StoreEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    store.watch(move |event| sink.lock().push(event.clone()));
    events
}

fn failures(events: &Mutex<Vec<StoreEvent>>) -> Vec<Error> {
    events
        .lock()
        .iter()
        .filter_map(|event| match event {
            StoreEvent::Failed { error, .. } => Some(error.clone()),
            StoreEvent::Changed { .. } => None,
        })
        .collect()
}

/// A gift store over a remote seeded with `names`, loaded and subscribed.
async fn wishlist(names: &[&str]) -> (Arc<MemoryCollection>, ReconcilingStore, Subscription, Vec<String>) {
    let remote = Arc::new(MemoryCollection::new(gifts::COLLECTION));
    let mut ids = Vec::new();
    for name in names {
        let row = remote.insert(fields(json!({"name": name, "status": "wanted"}))).await.unwrap();
        ids.push(row["id"].as_str().unwrap().to_string());
    }

    let store = ReconcilingStore::builder(remote.clone(), gifts::schema()).build();
    store.load().await.unwrap();
    let subscription = store.subscribe().await.unwrap();
    (remote, store, subscription, ids)
}

fn status_of(store: &ReconcilingStore, id: &str) -> String {
    store.get(id).unwrap().get_str("status").unwrap().to_string()
}

#[tokio::test]
async fn update_is_visible_before_the_remote_answers() {
    let (remote, store, _sub, ids) = wishlist(&["Scarf", "Perfume"]).await;
    remote.set_latency(Duration::from_millis(40));

    let pending = store
        .update_field(&ids[0], gifts::status_patch(gifts::GiftStatus::Purchased))
        .unwrap();

    let purchased = store.derive(&|records: &[keepsake_engine::Record]| {
        records
            .iter()
            .filter(|r| r.get_str("status") == Some("purchased"))
            .count()
    });
    assert_eq!(purchased, 1);
    assert_eq!(store.state_of(&ids[0]), RecordState::PendingUpdate);
    assert!(!pending.is_finished());

    pending.await.unwrap();
    assert_eq!(store.state_of(&ids[0]), RecordState::Confirmed);
    assert_eq!(status_of(&store, &ids[0]), "purchased");
}

#[tokio::test]
async fn failed_gift_update_reverts_and_reports() {
    let (remote, store, _sub, ids) = wishlist(&["Scarf"]).await;
    let events = record_events(&store);
    remote.fail_next(Fault::Update);

    let pending = store
        .update_field(&ids[0], gifts::status_patch(gifts::GiftStatus::Purchased))
        .unwrap();
    assert_eq!(status_of(&store, &ids[0]), "purchased");

    match pending.await {
        Err(Error::RemoteWrite { op, id, .. }) => {
            assert_eq!(op, WriteKind::Update);
            assert_eq!(id.as_deref(), Some(ids[0].as_str()));
        }
        other => panic!("expected a remote write error, got {other:?}"),
    }

    assert_eq!(status_of(&store, &ids[0]), "wanted");
    assert_eq!(store.state_of(&ids[0]), RecordState::Confirmed);
    assert!(matches!(
        failures(&events).as_slice(),
        [Error::RemoteWrite { op: WriteKind::Update, .. }]
    ));
}

/// Remote whose updates block until released and then fail.
struct StalledUpdates {
    inner: Arc<MemoryCollection>,
    release: Arc<Notify>,
}

#[async_trait]
impl RemoteCollection for StalledUpdates {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn select(&self, query: SelectQuery) -> Result<Vec<Value>, RemoteError> {
        self.inner.select(query).await
    }

    async fn insert(&self, fields: Fields) -> Result<Value, RemoteError> {
        self.inner.insert(fields).await
    }

    async fn update(&self, _id: &str, _patch: Fields) -> Result<(), RemoteError> {
        self.release.notified().await;
        Err(RemoteError::Unavailable("offline".into()))
    }

    async fn delete(&self, id: &str) -> Result<(), RemoteError> {
        self.inner.delete(id).await
    }

    async fn changes(&self) -> Result<ChangeStream, RemoteError> {
        self.inner.changes().await
    }
}

#[tokio::test]
async fn rollback_yields_to_a_newer_notification() {
    let memory = Arc::new(MemoryCollection::new(gifts::COLLECTION));
    let row = memory.insert(fields(json!({"name": "Scarf", "note": "red"}))).await.unwrap();
    let id = row["id"].as_str().unwrap().to_string();

    let release = Arc::new(Notify::new());
    let remote = Arc::new(StalledUpdates {
        inner: memory.clone(),
        release: release.clone(),
    });
    let store = ReconcilingStore::builder(remote, gifts::schema()).build();
    store.load().await.unwrap();
    let _sub = store.subscribe().await.unwrap();

    let pending = store.update_field(&id, fields(json!({"note": "blue"}))).unwrap();
    assert_eq!(store.get(&id).unwrap().get_str("note"), Some("blue"));

    // Another client writes the same field while ours is in flight.
    memory.update(&id, fields(json!({"note": "green"}))).await.unwrap();
    eventually("the notification", || {
        store.get(&id).unwrap().get_str("note") == Some("green")
    })
    .await;

    release.notify_one();
    assert!(pending.await.is_err());
    assert_eq!(store.get(&id).unwrap().get_str("note"), Some("green"));
}

/// Reads a snapshot, then lets another client insert a row before the
/// read returns.
struct RacingSelect {
    inner: Arc<MemoryCollection>,
    late: Mutex<Option<Fields>>,
}

impl RacingSelect {
    fn new(inner: Arc<MemoryCollection>, late: Value) -> Self {
        Self {
            inner,
            late: Mutex::new(Some(fields(late))),
        }
    }
}

#[async_trait]
impl RemoteCollection for RacingSelect {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn select(&self, query: SelectQuery) -> Result<Vec<Value>, RemoteError> {
        let rows = self.inner.select(query).await?;
        let late = self.late.lock().take();
        if let Some(late) = late {
            self.inner.insert(late).await?;
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Ok(rows)
    }

    async fn insert(&self, fields: Fields) -> Result<Value, RemoteError> {
        self.inner.insert(fields).await
    }

    async fn update(&self, id: &str, patch: Fields) -> Result<(), RemoteError> {
        self.inner.update(id, patch).await
    }

    async fn delete(&self, id: &str) -> Result<(), RemoteError> {
        self.inner.delete(id).await
    }

    async fn changes(&self) -> Result<ChangeStream, RemoteError> {
        self.inner.changes().await
    }
}

#[tokio::test]
async fn insert_during_load_is_kept() {
    let memory = Arc::new(MemoryCollection::new(gifts::COLLECTION));
    memory.insert(fields(json!({"name": "Scarf"}))).await.unwrap();
    let remote = Arc::new(RacingSelect::new(memory.clone(), json!({"name": "Late"})));

    let store = ReconcilingStore::builder(remote, gifts::schema()).build();
    let _sub = store.subscribe().await.unwrap();
    assert_eq!(store.load().await.unwrap(), 1);

    let remote_rows = memory.select(SelectQuery::all()).await.unwrap().len();
    assert_eq!(remote_rows, 2);
    eventually("the late row", || store.snapshot().len() == remote_rows).await;
    assert!(store
        .snapshot()
        .iter()
        .any(|record| record.get_str("name") == Some("Late")));
}

#[tokio::test]
async fn start_sees_writes_made_while_loading() {
    let gifts_remote = Arc::new(MemoryCollection::new(gifts::COLLECTION));
    let stores = Stores::new(
        Arc::new(MemoryCollection::new(diary::COLLECTION)),
        Arc::new(RacingSelect::new(gifts_remote.clone(), json!({"name": "Late"}))),
        Arc::new(MemoryCollection::new(rewards::COLLECTION)),
    );
    stores.start().await.unwrap();

    eventually("the row written during start", || stores.gifts.snapshot().len() == 1).await;
    stores.close();
}

#[tokio::test]
async fn failed_remove_restores_position() {
    let (remote, store, _sub, _ids) = wishlist(&["one", "two", "three"]).await;
    let order: Vec<String> = store.snapshot().into_iter().map(|r| r.id).collect();
    remote.fail_next(Fault::Delete);

    let pending = store.remove(&order[1]).unwrap();
    assert_eq!(store.snapshot().len(), 2);
    assert_eq!(store.state_of(&order[1]), RecordState::PendingDelete);

    assert!(matches!(
        pending.await,
        Err(Error::RemoteWrite { op: WriteKind::Delete, .. })
    ));
    let restored: Vec<String> = store.snapshot().into_iter().map(|r| r.id).collect();
    assert_eq!(restored, order);
}

#[tokio::test]
async fn confirmed_remove_stays_gone() {
    let (remote, store, _sub, ids) = wishlist(&["one", "two"]).await;

    store.remove(&ids[0]).unwrap().await.unwrap();
    eventually("the delete echo", || store.pending_count() == 0).await;

    assert!(store.get(&ids[0]).is_none());
    assert_eq!(store.state_of(&ids[0]), RecordState::Absent);
    assert_eq!(remote.len(), 1);
}

#[tokio::test]
async fn insert_waits_for_the_echo() {
    let remote = Arc::new(MemoryCollection::new(diary::COLLECTION));
    let store = ReconcilingStore::builder(remote.clone(), diary::schema()).build();
    store.load().await.unwrap();

    let draft = diary::DiaryDraft::new("Monday", "Rain all day").to_fields().unwrap();
    let id = store.insert(draft.clone()).unwrap().await.unwrap();

    // Not subscribed: the write succeeded but nothing is shown.
    assert!(store.get(&id).is_none());
    assert_eq!(remote.len(), 1);

    let _sub = store.subscribe().await.unwrap();
    let id = store.insert(draft).unwrap().await.unwrap();
    eventually("the created echo", || store.get(&id).is_some()).await;

    let entry = diary::DiaryEntry::from_record(&store.get(&id).unwrap()).unwrap();
    assert_eq!(entry.mood, diary::Mood::Happy);
}

#[tokio::test]
async fn invalid_draft_is_rejected_locally() {
    let remote = Arc::new(MemoryCollection::new(diary::COLLECTION));
    let store = ReconcilingStore::builder(remote.clone(), diary::schema()).build();
    let events = record_events(&store);

    let result = store.insert(fields(json!({"content": "no title"})));
    assert!(matches!(
        result,
        Err(Error::Validation(ValidationError::MissingRequiredField(ref f))) if f == "title"
    ));
    assert!(remote.is_empty());
    assert_eq!(failures(&events).len(), 1);
}

#[tokio::test]
async fn failed_insert_leaves_state_alone() {
    let remote = Arc::new(MemoryCollection::new(gifts::COLLECTION));
    let store = ReconcilingStore::builder(remote.clone(), gifts::schema()).build();
    let _sub = store.subscribe().await.unwrap();
    remote.fail_next(Fault::Insert);

    let result = store.insert(gifts::GiftDraft::new("Watch").to_fields().unwrap()).unwrap().await;
    assert!(matches!(
        result,
        Err(Error::RemoteWrite { op: WriteKind::Insert, id: None, .. })
    ));
    assert!(store.snapshot().is_empty());
}

#[tokio::test]
async fn ledger_redeem_needs_enough_flowers() {
    let stores = Stores::in_memory();
    stores.start().await.unwrap();
    let ledger = &stores.rewards;

    let draft = rewards::RewardDraft::add_flower(Some("first date".into()));
    let id = ledger.insert(draft.to_fields().unwrap()).unwrap().await.unwrap();
    eventually("the flower", || ledger.get(&id).is_some()).await;
    assert_eq!(ledger.derive(&rewards::balance), 1);

    let redeem = rewards::RewardDraft::redeem_wish(None).to_fields().unwrap();
    assert!(matches!(
        ledger.insert(redeem),
        Err(Error::Validation(ValidationError::InsufficientBalance {
            balance: 1,
            required: 10
        }))
    ));
    assert_eq!(ledger.derive(&Sum::of(rewards::AMOUNT_FIELD)), 1);
    assert_eq!(ledger.snapshot().len(), 1);
}

#[tokio::test]
async fn ledger_rejects_forged_amounts() {
    let stores = Stores::in_memory();
    stores.start().await.unwrap();
    let ledger = &stores.rewards;

    let forged = fields(json!({"action_type": "add_flower", "flower_amount": 500}));
    assert!(matches!(
        ledger.insert(forged),
        Err(Error::Validation(ValidationError::InvalidPayload(_)))
    ));
    let forged = fields(json!({"action_type": "redeem_wish", "flower_amount": -1}));
    assert!(matches!(
        ledger.insert(forged),
        Err(Error::Validation(ValidationError::InvalidPayload(_)))
    ));
    assert!(ledger.snapshot().is_empty());
}

#[tokio::test]
async fn redeem_spends_ten_flowers() {
    let stores = Stores::in_memory();
    stores.start().await.unwrap();
    let ledger = &stores.rewards;

    for _ in 0..rewards::REDEEM_COST {
        let draft = rewards::RewardDraft::add_flower(None).to_fields().unwrap();
        ledger.insert(draft).unwrap().await.unwrap();
    }
    eventually("ten flowers", || ledger.derive(&rewards::balance) == 10).await;

    let redeem = rewards::RewardDraft::redeem_wish(Some("concert".into())).to_fields().unwrap();
    ledger.insert(redeem).unwrap().await.unwrap();
    eventually("the redeem", || ledger.derive(&rewards::balance) == 0).await;

    let summary = ledger.derive(&rewards::Summary { history_limit: 5 });
    assert_eq!(summary.redeemed, 1);
    assert_eq!(summary.history.len(), 5);
    assert_eq!(summary.history[0].action_type, rewards::ActionType::RedeemWish);
}

#[tokio::test]
async fn completion_after_close_is_ignored() {
    let (remote, store, _sub, ids) = wishlist(&["Scarf"]).await;
    let events = record_events(&store);
    remote.set_latency(Duration::from_millis(20));
    remote.fail_next(Fault::Update);

    let pending = store.update_field(&ids[0], fields(json!({"note": "gift wrap"}))).unwrap();
    store.close();

    assert!(pending.await.is_err());
    assert_eq!(store.get(&ids[0]).unwrap().get_str("note"), Some("gift wrap"));
    assert_eq!(store.state_of(&ids[0]), RecordState::PendingUpdate);
    assert!(failures(&events).is_empty());
}

#[tokio::test]
async fn channel_drop_is_reported_then_reloaded() {
    let (remote, store, _sub, _ids) = wishlist(&["Scarf"]).await;
    let events = record_events(&store);
    let generation = store.generation();

    remote.interrupt("connection reset");

    eventually("the reload", || store.generation() > generation).await;
    assert!(matches!(
        failures(&events).as_slice(),
        [Error::NotificationChannel(_)]
    ));
    assert_eq!(store.snapshot().len(), 1);
}

#[tokio::test]
async fn failed_load_keeps_the_last_snapshot() {
    let (remote, store, _sub, _ids) = wishlist(&["Scarf", "Perfume"]).await;
    let events = record_events(&store);
    remote.fail_next(Fault::Select);

    assert!(matches!(store.load().await, Err(Error::Fetch(_))));
    assert_eq!(store.snapshot().len(), 2);
    assert!(matches!(failures(&events).as_slice(), [Error::Fetch(_)]));

    assert_eq!(store.load().await.unwrap(), 2);
}

#[tokio::test]
async fn limited_load_keeps_the_newest() {
    let remote = Arc::new(MemoryCollection::new(diary::COLLECTION));
    for title in ["a", "b", "c"] {
        let draft = diary::DiaryDraft::new(title, "text").to_fields().unwrap();
        remote.insert(draft).await.unwrap();
    }

    let store = ReconcilingStore::builder(remote, diary::schema())
        .load_limit(2)
        .build();
    assert_eq!(store.load().await.unwrap(), 2);

    let titles: Vec<String> = store
        .snapshot()
        .iter()
        .map(|r| r.get_str("title").unwrap().to_string())
        .collect();
    assert_eq!(titles, ["c", "b"]);
}

#[tokio::test]
async fn derive_over_an_empty_store() {
    let stores = Stores::in_memory();
    let summary = stores.rewards.derive(&rewards::Summary::default());

    assert_eq!(summary.balance, 0);
    assert_eq!(summary.redeemed, 0);
    assert!(summary.history.is_empty());
}

#[tokio::test]
async fn observers_see_changes_until_unwatched() {
    let (_remote, store, _sub, ids) = wishlist(&["Scarf"]).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let watch = store.watch(move |event| {
        if let StoreEvent::Changed { generation, .. } = event {
            sink.lock().push(*generation);
        }
    });

    store.update_field(&ids[0], fields(json!({"note": "a"}))).unwrap().await.unwrap();
    assert!(store.unwatch(watch));
    let count = seen.lock().len();
    store.update_field(&ids[0], fields(json!({"note": "b"}))).unwrap().await.unwrap();

    let seen = seen.lock();
    assert!(count >= 1);
    assert_eq!(seen.len(), count);
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
}
