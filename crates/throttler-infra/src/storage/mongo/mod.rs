//! MongoDB throttler storage backed by a TTL-indexed counter collection.
//!
//! The connection is established in the background. Until it settles, increments
//! wait on an explicit readiness state (bounded by `ready_timeout`); once it has
//! failed or been shut down they fail fast with a connectivity error. Index
//! creation is retried with backoff by the background task and never sits on
//! the increment path.

mod config;
mod document;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::{Document, doc};
use mongodb::options::{ClientOptions, IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, IndexModel};
use tokio::runtime::Handle;
use tokio::sync::{OnceCell, watch};

use throttler_core::domain::{StorageRecord, expiry_after};
use throttler_core::ports::{Clock, SystemClock, ThrottlerStorage};
use throttler_core::StorageError;

pub use config::{DEFAULT_COLLECTION, MongoConfig};
use document::{connectivity, increment_pipeline, is_duplicate_key, parse_counter};

/// Database used when neither the config nor the URL names one.
const DEFAULT_DATABASE: &str = "test";

const INDEX_RETRY_INITIAL: Duration = Duration::from_secs(1);
const INDEX_RETRY_MAX: Duration = Duration::from_secs(60);

enum ConnectionState {
    Connecting,
    Ready {
        client: Client,
        collection: Collection<Document>,
    },
    Failed(String),
    Closed,
}

/// MongoDB-backed counter store.
///
/// One document per key, updated with a single atomic `findOneAndUpdate` upsert.
/// Expired documents are removed by the server's TTL monitor; until that happens
/// the update itself treats them as absent.
pub struct MongoThrottlerStorage {
    state: Arc<watch::Sender<ConnectionState>>,
    indexes: Arc<OnceCell<()>>,
    clock: Arc<dyn Clock>,
    config: MongoConfig,
}

impl MongoThrottlerStorage {
    /// Start connecting in the background and return immediately.
    ///
    /// Must be called from within a Tokio runtime; otherwise the storage is
    /// left in a failed state.
    pub fn new(config: MongoConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: MongoConfig, clock: Arc<dyn Clock>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let storage = Self {
            state: Arc::new(state),
            indexes: Arc::new(OnceCell::new()),
            clock,
            config,
        };
        storage.spawn_setup();
        storage
    }

    /// Connect and create the indexes before returning.
    pub async fn connect(config: MongoConfig) -> Result<Self, StorageError> {
        Self::connect_with_clock(config, Arc::new(SystemClock)).await
    }

    pub async fn connect_with_clock(
        config: MongoConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StorageError> {
        let storage = Self::with_clock(config, clock);
        let collection = storage.collection().await?;
        ensure_indexes(&collection).await.map_err(connectivity)?;
        let _ = storage.indexes.set(());
        Ok(storage)
    }

    /// Create from environment configuration.
    pub async fn from_env() -> Result<Self, StorageError> {
        Self::connect(MongoConfig::from_env()).await
    }

    /// The driver client, once built. Shares the adapter's connection pool.
    ///
    /// The driver reconnects on its own, so this may be returned while the
    /// server is unreachable; see [`is_ready`](Self::is_ready).
    pub fn client(&self) -> Option<Client> {
        match &*self.state.borrow() {
            ConnectionState::Ready { client, .. } => Some(client.clone()),
            _ => None,
        }
    }

    /// Connected, with the server having confirmed the counter indexes.
    pub fn is_ready(&self) -> bool {
        self.indexes.initialized()
            && matches!(*self.state.borrow(), ConnectionState::Ready { .. })
    }

    pub fn config(&self) -> &MongoConfig {
        &self.config
    }

    fn spawn_setup(&self) {
        let state = self.state.clone();
        let indexes = self.indexes.clone();
        let config = self.config.clone();

        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(setup(config, state, indexes));
            }
            Err(e) => {
                tracing::error!(error = %e, "No Tokio runtime, MongoDB storage cannot connect");
                publish(&state, ConnectionState::Failed(e.to_string()));
            }
        }
    }

    /// Wait for the background setup to settle and hand out the collection.
    async fn collection(&self) -> Result<Collection<Document>, StorageError> {
        let mut state = self.state.subscribe();
        let settled = tokio::time::timeout(
            self.config.ready_timeout,
            state.wait_for(|s| !matches!(s, ConnectionState::Connecting)),
        )
        .await;

        let settled = match settled {
            Ok(Ok(settled)) => settled,
            Ok(Err(_)) => {
                return Err(StorageError::Connectivity(
                    "connection state dropped".to_string(),
                ));
            }
            Err(_) => {
                return Err(StorageError::Connectivity(format!(
                    "not connected after {:?}",
                    self.config.ready_timeout
                )));
            }
        };

        match &*settled {
            ConnectionState::Ready { collection, .. } => Ok(collection.clone()),
            ConnectionState::Failed(reason) => Err(StorageError::Connectivity(reason.clone())),
            ConnectionState::Closed => Err(StorageError::Connectivity(
                "storage has been shut down".to_string(),
            )),
            ConnectionState::Connecting => {
                Err(StorageError::Connectivity("still connecting".to_string()))
            }
        }
    }

    async fn find_and_increment(
        &self,
        collection: &Collection<Document>,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<Document>, mongodb::error::Error> {
        let now = self.clock.now();
        let expire_at = expiry_after(now, ttl);

        collection
            .find_one_and_update(doc! { "key": key }, increment_pipeline(now, expire_at))
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
    }
}

#[async_trait]
impl ThrottlerStorage for MongoThrottlerStorage {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<StorageRecord, StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey);
        }

        let collection = self.collection().await?;

        let document = match self.find_and_increment(&collection, key, ttl).await {
            Err(e) if is_duplicate_key(&e) => {
                tracing::warn!(key = %key, "Concurrent first hit, retrying increment");
                self.find_and_increment(&collection, key, ttl).await
            }
            result => result,
        }
        .map_err(connectivity)?
        .ok_or_else(|| StorageError::DataShape(format!("no document returned for key {key:?}")))?;

        let record = parse_counter(key, &document)?;
        tracing::debug!(key = %key, total_hits = record.total_hits, "Counter incremented");

        Ok(record.to_storage_record(self.clock.now()))
    }

    async fn shutdown(&self) {
        let previous = self.state.send_replace(ConnectionState::Closed);

        if let ConnectionState::Ready { client, .. } = previous {
            client.shutdown().await;
            tracing::info!("MongoDB throttler storage closed");
        }
    }
}

/// Replace `Connecting` with `next`. Returns false if setup lost the race with shutdown.
fn publish(state: &watch::Sender<ConnectionState>, next: ConnectionState) -> bool {
    state.send_if_modified(|current| {
        if matches!(current, ConnectionState::Connecting) {
            *current = next;
            true
        } else {
            false
        }
    })
}

async fn setup(
    config: MongoConfig,
    state: Arc<watch::Sender<ConnectionState>>,
    indexes: Arc<OnceCell<()>>,
) {
    let (client, collection) = match open_collection(&config).await {
        Ok(opened) => opened,
        Err(e) => {
            tracing::error!(error = %e, "Error connecting to MongoDB");
            publish(&state, ConnectionState::Failed(e.to_string()));
            return;
        }
    };

    let ready = ConnectionState::Ready {
        client: client.clone(),
        collection: collection.clone(),
    };
    if !publish(&state, ready) {
        client.shutdown().await;
        return;
    }

    // Only watch for shutdown from here on, so dropping the storage ends the task
    let watcher = state.subscribe();
    drop(state);
    maintain_indexes(&config, &collection, &indexes, watcher).await;
}

/// Create the indexes, retrying with backoff until they exist or the storage is closed.
async fn maintain_indexes(
    config: &MongoConfig,
    collection: &Collection<Document>,
    indexes: &OnceCell<()>,
    state: watch::Receiver<ConnectionState>,
) {
    let closed = closed(state);
    tokio::pin!(closed);
    let mut backoff = INDEX_RETRY_INITIAL;

    loop {
        match ensure_indexes(collection).await {
            Ok(()) => {
                let _ = indexes.set(());
                tracing::info!(
                    collection = %config.collection,
                    "Connected to MongoDB throttler storage"
                );
                return;
            }
            Err(e) => tracing::error!(
                error = %e,
                retry_in = ?backoff,
                "Error creating throttler indexes"
            ),
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = &mut closed => return,
        }
        backoff = (backoff * 2).min(INDEX_RETRY_MAX);
    }
}

/// Resolves once the storage is shut down or dropped.
async fn closed(mut state: watch::Receiver<ConnectionState>) {
    while !matches!(*state.borrow_and_update(), ConnectionState::Closed) {
        if state.changed().await.is_err() {
            return;
        }
    }
}

async fn open_collection(
    config: &MongoConfig,
) -> Result<(Client, Collection<Document>), mongodb::error::Error> {
    let mut options = ClientOptions::parse(&config.url).await?;
    if let Some(timeout) = config.connect_timeout {
        options.connect_timeout = Some(timeout);
    }
    if let Some(timeout) = config.server_selection_timeout {
        options.server_selection_timeout = Some(timeout);
    }
    if let Some(size) = config.max_pool_size {
        options.max_pool_size = Some(size);
    }
    if let Some(app_name) = &config.app_name {
        options.app_name = Some(app_name.clone());
    }

    let client = Client::with_options(options)?;
    let database = match &config.database {
        Some(name) => client.database(name),
        None => client
            .default_database()
            .unwrap_or_else(|| client.database(DEFAULT_DATABASE)),
    };
    let collection = database.collection::<Document>(&config.collection);

    Ok((client, collection))
}

/// TTL index on `expireAt` (documents expire the instant it is reached) and a
/// unique index on `key` so racing upserts cannot create duplicates.
async fn ensure_indexes(collection: &Collection<Document>) -> Result<(), mongodb::error::Error> {
    let expiry = IndexModel::builder()
        .keys(doc! { "expireAt": 1 })
        .options(IndexOptions::builder().expire_after(Duration::ZERO).build())
        .build();
    let identity = IndexModel::builder()
        .keys(doc! { "key": 1 })
        .options(IndexOptions::builder().unique(true).build())
        .build();

    collection.create_indexes([expiry, identity]).await?;
    Ok(())
}
