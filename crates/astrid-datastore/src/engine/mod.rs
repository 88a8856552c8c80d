//! The ordered byte-keyed engine contract.
//!
//! The datastore never talks to storage directly. It goes through an
//! [`Engine`], which must provide:
//!
//! - point `get` / `has` / `put`, and a `delete` that reports whether the
//!   key existed, checked and removed in one atomic step
//! - an atomic multi-operation [`write`](Engine::write)
//! - point-in-time [`Snapshot`]s that open ordered [`Cursor`]s over a
//!   [`KeyRange`] in either [`Direction`]
//!
//! Two engines ship with the crate:
//!
//! - [`MemoryEngine`]: ordered in-memory map, copy-on-write snapshots
//! - [`SurrealKvEngine`]: persistent `SurrealKV` tree, MVCC snapshots

mod memory;
mod surreal;

use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StorageResult;

pub use memory::MemoryEngine;
pub use surreal::SurrealKvEngine;

/// One operation of an atomic write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Set `key` to `value`.
    Put {
        /// Encoded key.
        key: Vec<u8>,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Remove `key`. Absent keys are ignored.
    Delete {
        /// Encoded key.
        key: Vec<u8>,
    },
}

impl WriteOp {
    /// The key this operation touches.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// Walk direction of a cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    /// Ascending key order.
    #[default]
    Forward,
    /// Descending key order.
    Reverse,
}

/// A contiguous range of encoded keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    /// Lower bound.
    pub start: Bound<Vec<u8>>,
    /// Upper bound.
    pub end: Bound<Vec<u8>>,
}

impl KeyRange {
    /// Every key.
    #[must_use]
    pub fn all() -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
        }
    }

    /// Every key that starts with `prefix`. An empty prefix is [`KeyRange::all`].
    #[must_use]
    pub fn prefix(prefix: &[u8]) -> Self {
        if prefix.is_empty() {
            return Self::all();
        }
        Self {
            start: Bound::Included(prefix.to_vec()),
            end: prefix_successor(prefix).map_or(Bound::Unbounded, Bound::Excluded),
        }
    }

    /// Whether `key` falls inside the range.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        let above = match &self.start {
            Bound::Included(s) => key >= s.as_slice(),
            Bound::Excluded(s) => key > s.as_slice(),
            Bound::Unbounded => true,
        };
        let below = match &self.end {
            Bound::Included(e) => key <= e.as_slice(),
            Bound::Excluded(e) => key < e.as_slice(),
            Bound::Unbounded => true,
        };
        above && below
    }
}

/// Smallest byte string greater than every string starting with `prefix`.
///
/// `None` when the prefix is all `0xff`, i.e. the range has no upper bound.
fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last.saturating_add(1));
            return Some(end);
        }
    }
    None
}

/// A positioned walk over an ordered key range.
///
/// A fresh cursor sits before the first entry; the first
/// [`advance`](Cursor::advance) positions it. `key` and `value` borrow
/// cursor-internal buffers and are only meaningful after `advance`
/// returned `true`. Dropping the cursor releases it.
pub trait Cursor: Send {
    /// Move to the next entry. Returns `false` once the range is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails while reading.
    fn advance(&mut self) -> StorageResult<bool>;

    /// Current key, empty when not positioned.
    fn key(&self) -> &[u8];

    /// Current value, empty when not positioned.
    fn value(&self) -> &[u8];
}

/// A consistent point-in-time view of the engine.
pub trait Snapshot: Send + Sync {
    /// Read a key as of the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails while reading.
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Check for a key as of the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails while reading.
    fn has(&self, key: &[u8]) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Open a cursor over `range`. The cursor stays valid after the
    /// snapshot handle is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot open the cursor.
    fn cursor(&self, range: KeyRange, direction: Direction) -> StorageResult<Box<dyn Cursor>>;
}

/// An ordered byte-keyed storage engine.
///
/// Implementations must be safe for concurrent use. The datastore serializes
/// `close` against every other call, so engines do not need to handle
/// operations racing their own shutdown.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Read a key.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails while reading.
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Check for a key.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails while reading.
    fn has(&self, key: &[u8]) -> StorageResult<bool>;

    /// Set a key, overwriting any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()>;

    /// Remove a key. Returns whether it existed.
    ///
    /// The existence check and the removal are one atomic step: of two
    /// concurrent deletes of the same key, at most one reports `true`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn delete(&self, key: &[u8]) -> StorageResult<bool>;

    /// Apply `ops` in order as one atomic write: either all become visible
    /// or none does.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails; nothing was applied.
    async fn write(&self, ops: &[WriteOp]) -> StorageResult<()>;

    /// Capture a point-in-time view.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot provide a snapshot.
    fn snapshot(&self) -> StorageResult<Arc<dyn Snapshot>>;

    /// Bytes of persisted data. In-memory engines report `0`.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted data cannot be measured.
    fn disk_usage(&self) -> StorageResult<u64>;

    /// Flush and release the engine's resources. Called at most once.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    async fn close(&self) -> StorageResult<()>;
}
