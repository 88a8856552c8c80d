//! Buffered atomic writes.

use tracing::{debug, warn};

use crate::engine::WriteOp;
use crate::error::StorageResult;
use crate::key::{Key, encode_key};
use crate::kv::check_value_size;
use crate::shutdown::StoreHandle;

/// Accumulates puts and deletes and applies them as one atomic write.
///
/// Buffering never touches the engine. Deleting a key that does not exist
/// is not an error here; the delete is simply a no-op when applied.
#[derive(Debug)]
pub struct Batch {
    store: StoreHandle,
    ops: Vec<WriteOp>,
    max_value_size: usize,
}

impl Batch {
    pub(crate) fn new(store: StoreHandle, max_value_size: usize) -> Self {
        Self {
            store,
            ops: Vec::new(),
            max_value_size,
        }
    }

    /// Buffer a put.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidValueType`](crate::StorageError::InvalidValueType)
    /// if the value exceeds the configured size limit.
    pub fn put(&mut self, key: &Key, value: Vec<u8>) -> StorageResult<&mut Self> {
        check_value_size(key, &value, self.max_value_size)?;
        self.ops.push(WriteOp::Put {
            key: encode_key(key),
            value,
        });
        Ok(self)
    }

    /// Buffer a delete.
    pub fn delete(&mut self, key: &Key) -> &mut Self {
        self.ops.push(WriteOp::Delete {
            key: encode_key(key),
        });
        self
    }

    /// Number of buffered operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply every buffered operation, in order, as one atomic write.
    ///
    /// On success the buffer is cleared, so committing again is a no-op. On
    /// failure nothing was applied and the buffer is kept.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ClosedStore`](crate::StorageError::ClosedStore)
    /// if the store closed first, or the engine's error if the write fails.
    pub async fn commit(&mut self) -> StorageResult<()> {
        let coordinator = self.store.upgrade().inspect_err(|_| {
            warn!(ops = self.ops.len(), "batch commit after store close");
        })?;
        if self.ops.is_empty() {
            return Ok(());
        }
        coordinator.enter().await?.write(&self.ops).await?;
        debug!(ops = self.ops.len(), "batch committed");
        self.ops.clear();
        Ok(())
    }
}
