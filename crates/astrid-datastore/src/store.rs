//! The datastore: point operations, queries, batches and transactions over
//! a shared engine.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::batch::Batch;
use crate::config::DatastoreConfig;
use crate::engine::{Engine, MemoryEngine, SurrealKvEngine};
use crate::error::{StorageError, StorageResult};
use crate::key::{Key, encode_key};
use crate::kv::{KvStore, check_value_size};
use crate::query::Query;
use crate::results::Results;
use crate::shutdown::{ShutdownCoordinator, StoreHandle};
use crate::txn::Transaction;

/// A key-value datastore over an ordered engine.
///
/// Clones share the same engine. The engine is closed by [`close`](Self::close)
/// or when the last clone is dropped; batches, transactions and results only
/// hold a non-owning handle and fail with [`StorageError::ClosedStore`]
/// afterwards.
#[derive(Debug, Clone)]
pub struct Datastore {
    coordinator: Arc<ShutdownCoordinator>,
    config: Arc<DatastoreConfig>,
}

impl Datastore {
    /// Open a datastore as described by `config`.
    ///
    /// Without a path the data lives in memory; with one it is persisted in
    /// a `SurrealKV` tree under that directory.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] for an invalid config, or the
    /// engine's error if the data directory cannot be opened.
    pub fn open(config: DatastoreConfig) -> StorageResult<Self> {
        config.validate()?;
        let engine: Box<dyn Engine> = match &config.path {
            None => Box::new(MemoryEngine::new()),
            Some(path) => Box::new(SurrealKvEngine::open(path, config.create_if_missing)?),
        };
        info!(path = ?config.path, "datastore opened");
        Ok(Self::with_engine(engine, config))
    }

    /// An empty in-memory datastore.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_engine(Box::new(MemoryEngine::new()), DatastoreConfig::in_memory())
    }

    /// Wrap an existing engine. The datastore takes ownership of it.
    #[must_use]
    pub fn with_engine(engine: Box<dyn Engine>, config: DatastoreConfig) -> Self {
        Self {
            coordinator: Arc::new(ShutdownCoordinator::new(engine)),
            config: Arc::new(config),
        }
    }

    /// The configuration this store was opened with.
    #[must_use]
    pub fn config(&self) -> &DatastoreConfig {
        &self.config
    }

    fn handle(&self) -> StoreHandle {
        StoreHandle::new(&self.coordinator)
    }

    /// Start an empty batch bound to this store.
    #[must_use]
    pub fn batch(&self) -> Batch {
        Batch::new(self.handle(), self.config.max_value_size)
    }

    /// Start a transaction reading from the store's current state.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ClosedStore`] once the store is closed, or
    /// the engine's error if it cannot provide a snapshot.
    pub async fn new_transaction(&self, read_only: bool) -> StorageResult<Transaction> {
        let snapshot = self.coordinator.enter().await?.snapshot()?;
        debug!(read_only, "transaction started");
        Ok(Transaction::new(
            self.handle(),
            snapshot,
            read_only,
            self.config.max_value_size,
            self.config.stream_buffer,
        ))
    }

    /// Bytes of persisted data. In-memory stores report `0`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ClosedStore`] once the store is closed, or
    /// [`StorageError::Io`] if the data cannot be measured.
    pub async fn disk_usage(&self) -> StorageResult<u64> {
        self.coordinator.enter().await?.disk_usage()
    }

    /// Close the store, waiting for engine calls already in progress.
    ///
    /// Every later operation on this store, its clones, and any batch,
    /// transaction or result set created from it fails with
    /// [`StorageError::ClosedStore`]. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the engine's error if it fails to shut down cleanly. The
    /// store is closed either way.
    pub async fn close(&self) -> StorageResult<()> {
        self.coordinator.close().await.map(|_| ())
    }

    /// Whether [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.coordinator.is_closed()
    }
}

#[async_trait]
impl KvStore for Datastore {
    async fn get(&self, key: &Key) -> StorageResult<Vec<u8>> {
        self.coordinator
            .enter()
            .await?
            .get(&encode_key(key))?
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn has(&self, key: &Key) -> StorageResult<bool> {
        self.coordinator.enter().await?.has(&encode_key(key))
    }

    async fn put(&self, key: &Key, value: Vec<u8>) -> StorageResult<()> {
        check_value_size(key, &value, self.config.max_value_size)?;
        self.coordinator
            .enter()
            .await?
            .put(&encode_key(key), &value)
            .await
    }

    async fn delete(&self, key: &Key) -> StorageResult<()> {
        let existed = self
            .coordinator
            .enter()
            .await?
            .delete(&encode_key(key))
            .await?;
        if !existed {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(())
    }

    async fn query(&self, query: Query) -> StorageResult<Results> {
        let snapshot = self.coordinator.enter().await?.snapshot()?;
        let cursor = snapshot.cursor(query.range(), query.direction())?;
        debug!(
            prefix = %query.prefix,
            limit = query.limit,
            offset = query.offset,
            "query opened"
        );
        Ok(Results::new(
            query,
            cursor,
            self.handle(),
            self.config.stream_buffer,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Order;

    #[tokio::test]
    async fn test_point_operations() {
        let store = Datastore::in_memory();
        let key = Key::new("/a/b");
        assert!(store.get(&key).await.unwrap_err().is_not_found());
        assert!(!store.has(&key).await.unwrap());

        store.put(&key, b"v".to_vec()).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), b"v");
        assert!(store.has(&key).await.unwrap());

        store.delete(&key).await.unwrap();
        assert!(store.delete(&key).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_missing_leaves_keyspace_unchanged() {
        let store = Datastore::in_memory();
        store.put(&Key::new("/a"), b"1".to_vec()).await.unwrap();
        store.put(&Key::new("/b"), b"2".to_vec()).await.unwrap();

        let err = store.delete(&Key::new("/missing")).await.unwrap_err();
        assert!(err.is_not_found());
        let entries = store.query(Query::new()).await.unwrap().rest().unwrap();
        let keys: Vec<_> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["/a", "/b"]);
        assert_eq!(store.get(&Key::new("/a")).await.unwrap(), b"1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deletes_succeed_once() {
        let store = Datastore::in_memory();
        let key = Key::new("/contended");
        store.put(&key, b"v".to_vec()).await.unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let key = key.clone();
                tokio::spawn(async move { store.delete(&key).await })
            })
            .collect();
        let mut outcomes = Vec::new();
        for task in tasks {
            outcomes.push(task.await.unwrap());
        }
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes.iter().flat_map(|r| r.as_ref().err()).all(StorageError::is_not_found));
    }

    #[tokio::test]
    async fn test_empty_value_is_stored() {
        let store = Datastore::in_memory();
        let key = Key::new("/empty");
        store.put(&key, Vec::new()).await.unwrap();
        assert!(store.has(&key).await.unwrap());
        assert!(store.get(&key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_max_value_size_enforced() {
        let store = Datastore::open(DatastoreConfig::in_memory().with_max_value_size(3)).unwrap();
        let err = store.put(&Key::new("/k"), vec![1; 4]).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidValueType(_)));
        assert!(store.batch().put(&Key::new("/k"), vec![1; 4]).is_err());
        let txn = store.new_transaction(false).await.unwrap();
        assert!(txn.put(&Key::new("/k"), vec![1; 4]).await.is_err());
    }

    #[tokio::test]
    async fn test_query_order_and_paging() {
        let store = Datastore::in_memory();
        for i in 0..10 {
            store
                .put(&Key::new(format!("/n/{i}")), vec![i])
                .await
                .unwrap();
        }
        let query = Query::new()
            .with_prefix("/n/")
            .with_order(Order::ByKeyDescending)
            .with_offset(1)
            .with_limit(3);
        let entries = store.query(query).await.unwrap().rest().unwrap();
        let keys: Vec<_> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["/n/8", "/n/7", "/n/6"]);
    }

    #[tokio::test]
    async fn test_query_is_snapshot_at_open() {
        let store = Datastore::in_memory();
        store.put(&Key::new("/a"), vec![]).await.unwrap();
        let results = store.query(Query::new()).await.unwrap();
        store.put(&Key::new("/b"), vec![]).await.unwrap();
        assert_eq!(results.rest().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_json_helpers() {
        #[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
        struct Profile {
            name: String,
            age: u32,
        }

        let store = Datastore::in_memory();
        let key = Key::new("/profile");
        let profile = Profile {
            name: "alice".into(),
            age: 30,
        };
        store.put_json(&key, &profile).await.unwrap();
        let loaded: Profile = store.get_json(&key).await.unwrap();
        assert_eq!(loaded, profile);

        store.put(&key, b"not json".to_vec()).await.unwrap();
        assert!(matches!(
            store.get_json::<Profile>(&key).await,
            Err(StorageError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_close_rejects_everything() {
        let store = Datastore::in_memory();
        let key = Key::new("/k");
        store.put(&key, b"v".to_vec()).await.unwrap();
        let clone = store.clone();
        store.close().await.unwrap();
        store.close().await.unwrap();

        assert!(clone.is_closed());
        assert!(clone.get(&key).await.unwrap_err().is_closed());
        assert!(clone.has(&key).await.unwrap_err().is_closed());
        assert!(clone.put(&key, vec![]).await.unwrap_err().is_closed());
        assert!(clone.delete(&key).await.unwrap_err().is_closed());
        assert!(clone.query(Query::new()).await.unwrap_err().is_closed());
        assert!(clone.new_transaction(true).await.unwrap_err().is_closed());
        assert!(clone.disk_usage().await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn test_dropping_last_clone_closes_handles() {
        let store = Datastore::in_memory();
        let mut batch = store.batch();
        batch.put(&Key::new("/k"), vec![]).unwrap();
        drop(store);
        assert!(batch.commit().await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatastoreConfig::at_path(dir.path());
        let key = Key::new("/persisted");
        {
            let store = Datastore::open(config.clone()).unwrap();
            store.put(&key, b"v".to_vec()).await.unwrap();
            assert!(store.disk_usage().await.unwrap() > 0);
            store.close().await.unwrap();
        }
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_some());

        let store = Datastore::open(config).unwrap();
        assert_eq!(store.get(&key).await.unwrap(), b"v");
    }

    #[test]
    fn test_open_missing_dir_without_create_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatastoreConfig::at_path(dir.path().join("absent")).with_create_if_missing(false);
        assert!(Datastore::open(config).is_err());
    }
}
