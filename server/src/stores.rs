//! The service's collection stores: diary, gifts and the reward ledger.

use std::sync::Arc;

use keepsake_engine::collections::{self, diary, gifts, rewards};
use keepsake_engine::CollectionSchema;
use parking_lot::Mutex;

use crate::config::Config;
use crate::db;
use crate::error::AppError;
use crate::remote::{MemoryCollection, PgCollection, RemoteCollection, RemoteError};
use crate::store::{ReconcilingStore, Subscription};

/// One store per collection, plus their change feeds once started.
#[derive(Debug)]
pub struct Stores {
    pub diary: ReconcilingStore,
    pub gifts: ReconcilingStore,
    pub rewards: ReconcilingStore,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl Stores {
    /// Build stores over the given remotes. Nothing is loaded yet.
    pub fn new(
        diary: Arc<dyn RemoteCollection>,
        gifts: Arc<dyn RemoteCollection>,
        rewards: Arc<dyn RemoteCollection>,
    ) -> Self {
        Self {
            diary: build_store(diary, diary::schema()),
            gifts: build_store(gifts, gifts::schema()),
            rewards: build_store(rewards, rewards::schema()),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Stores over in-process collections.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryCollection::new(diary::COLLECTION)),
            Arc::new(MemoryCollection::new(gifts::COLLECTION)),
            Arc::new(MemoryCollection::new(rewards::COLLECTION)),
        )
    }

    /// Stores over the PostgreSQL tables of the same names.
    pub fn postgres(pool: db::Pool) -> Result<Self, RemoteError> {
        Ok(Self::new(
            Arc::new(PgCollection::new(pool.clone(), diary::COLLECTION)?),
            Arc::new(PgCollection::new(pool.clone(), gifts::COLLECTION)?),
            Arc::new(PgCollection::new(pool, rewards::COLLECTION)?),
        ))
    }

    /// Build the stores for `config`: PostgreSQL when a database URL is
    /// configured, in memory otherwise.
    pub async fn connect(config: &Config) -> Result<Self, AppError> {
        match &config.database_url {
            Some(url) => {
                let pool = db::create_pool(url, config.max_connections).await?;

                tracing::info!("Running database migrations...");
                db::run_migrations(&pool).await?;

                Ok(Self::postgres(pool)?)
            }
            None => {
                tracing::warn!("DATABASE_URL not set, collections are kept in memory");
                Ok(Self::in_memory())
            }
        }
    }

    /// Subscribe to every collection's changes, then load it.
    ///
    /// The feed is opened first so writes landing during the load are
    /// delivered. A failed load leaves that collection empty until it is
    /// reloaded. A change feed that cannot be opened fails the start.
    pub async fn start(&self) -> Result<(), AppError> {
        for store in self.iter() {
            let subscription = store.subscribe().await?;
            self.subscriptions.lock().push(subscription);
            match store.load().await {
                Ok(count) => tracing::info!(collection = %store.name(), count, "Loaded"),
                Err(e) => tracing::warn!(collection = %store.name(), error = %e, "Initial load failed"),
            }
        }
        Ok(())
    }

    /// Look a store up by collection name.
    pub fn get(&self, collection: &str) -> Option<&ReconcilingStore> {
        self.iter().find(|store| store.name() == collection)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReconcilingStore> {
        [&self.diary, &self.gifts, &self.rewards].into_iter()
    }

    /// Drop the change feeds and close every store.
    pub fn close(&self) {
        self.subscriptions.lock().clear();
        for store in self.iter() {
            store.close();
        }
    }
}

fn build_store(remote: Arc<dyn RemoteCollection>, schema: CollectionSchema) -> ReconcilingStore {
    let guard = collections::insert_guard(&schema.name);
    let builder = ReconcilingStore::builder(remote, schema);
    match guard {
        Some(guard) => builder.guard(guard).build(),
        None => builder.build(),
    }
}
