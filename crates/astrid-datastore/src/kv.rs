//! The key-value surface shared by stores and transactions.
//!
//! [`KvStore`] is implemented by [`Datastore`](crate::Datastore), where every
//! call is applied to the engine immediately, and by
//! [`Transaction`](crate::Transaction), where writes are buffered until
//! commit and reads see them. Code written against the trait works with
//! either.
//!
//! # Typed access
//!
//! [`get_json`](KvStore::get_json) / [`put_json`](KvStore::put_json) store
//! values as JSON on top of the raw byte calls.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{StorageError, StorageResult};
use crate::key::Key;
use crate::query::Query;
use crate::results::Results;

/// Byte-level key-value operations over [`Key`]s.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read the value stored at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the key does not exist and
    /// [`StorageError::ClosedStore`] once the store is closed.
    async fn get(&self, key: &Key) -> StorageResult<Vec<u8>>;

    /// Whether `key` exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ClosedStore`] once the store is closed.
    async fn has(&self, key: &Key) -> StorageResult<bool>;

    /// Store `value` at `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidValueType`] if the value exceeds the
    /// configured size limit and [`StorageError::ClosedStore`] once the
    /// store is closed.
    async fn put(&self, key: &Key, value: Vec<u8>) -> StorageResult<()>;

    /// Remove `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the key does not exist and
    /// [`StorageError::ClosedStore`] once the store is closed.
    async fn delete(&self, key: &Key) -> StorageResult<()>;

    /// Run `query` and return its lazily produced results.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ClosedStore`] once the store is closed.
    async fn query(&self, query: Query) -> StorageResult<Results>;

    // -- Typed convenience (JSON) --

    /// Read and deserialize a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if the stored bytes are not
    /// valid JSON for `T`, plus any error from [`get`](Self::get).
    async fn get_json<T>(&self, key: &Key) -> StorageResult<T>
    where
        T: DeserializeOwned + Send,
        Self: Sized,
    {
        let bytes = self.get(key).await?;
        serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// Serialize `value` as JSON and store it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if `value` cannot be
    /// serialized, plus any error from [`put`](Self::put).
    async fn put_json<T>(&self, key: &Key, value: &T) -> StorageResult<()>
    where
        T: Serialize + Sync,
        Self: Sized,
    {
        let bytes =
            serde_json::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.put(key, bytes).await
    }
}

/// Reject values larger than `max` bytes. `0` disables the check.
pub(crate) fn check_value_size(key: &Key, value: &[u8], max: usize) -> StorageResult<()> {
    if max > 0 && value.len() > max {
        return Err(StorageError::InvalidValueType(format!(
            "value for {key} is {} bytes, limit is {max}",
            value.len()
        )));
    }
    Ok(())
}
