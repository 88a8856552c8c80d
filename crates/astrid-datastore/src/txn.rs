//! Buffered transactions with read-your-own-writes.
//!
//! A [`Transaction`] reads from a snapshot taken when it was created and
//! keeps its own writes in a pending set. Reads consult the pending set
//! first, so a transaction sees its own puts and deletes but nothing other
//! writers committed after it started. [`Transaction::commit`] submits the
//! pending set as one atomic engine write; [`Transaction::discard`] drops it
//! without touching the engine.
//!
//! ```text
//! Active ──commit──▶ Committed
//!    │
//!    └────discard──▶ Discarded
//! ```

use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::engine::{Cursor, Direction, Snapshot, WriteOp};
use crate::error::{StorageError, StorageResult};
use crate::key::{Key, encode_key};
use crate::kv::{KvStore, check_value_size};
use crate::query::Query;
use crate::results::Results;
use crate::shutdown::StoreHandle;

/// Where a transaction is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Accepting reads and writes.
    Active,
    /// Pending writes were applied. Terminal.
    Committed,
    /// Pending writes were dropped. Terminal.
    Discarded,
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Committed => write!(f, "committed"),
            Self::Discarded => write!(f, "discarded"),
        }
    }
}

/// Pending writes keyed by encoded key. `None` marks a delete.
type Pending = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

#[derive(Debug)]
struct TxnInner {
    state: TxnState,
    pending: Pending,
}

/// An isolated, buffered view of a [`Datastore`](crate::Datastore).
pub struct Transaction {
    store: StoreHandle,
    snapshot: Arc<dyn Snapshot>,
    read_only: bool,
    max_value_size: usize,
    stream_buffer: usize,
    inner: Mutex<TxnInner>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Transaction");
        d.field("read_only", &self.read_only);
        if let Ok(inner) = self.inner.try_lock() {
            d.field("state", &inner.state);
        }
        d.finish_non_exhaustive()
    }
}

impl Transaction {
    pub(crate) fn new(
        store: StoreHandle,
        snapshot: Arc<dyn Snapshot>,
        read_only: bool,
        max_value_size: usize,
        stream_buffer: usize,
    ) -> Self {
        Self {
            store,
            snapshot,
            read_only,
            max_value_size,
            stream_buffer,
            inner: Mutex::new(TxnInner {
                state: TxnState::Active,
                pending: Pending::new(),
            }),
        }
    }

    /// Current lifecycle state. Waits for a commit in progress.
    pub async fn state(&self) -> TxnState {
        self.inner.lock().await.state
    }

    /// Whether writes are rejected.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Number of pending writes.
    pub async fn pending_len(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    /// Lock the inner state, failing unless the transaction is active and
    /// its store is still open.
    async fn active(&self) -> StorageResult<MutexGuard<'_, TxnInner>> {
        let inner = self.inner.lock().await;
        if inner.state != TxnState::Active {
            return Err(StorageError::TransactionFinished(inner.state));
        }
        if self.store.is_closed() {
            return Err(StorageError::ClosedStore);
        }
        Ok(inner)
    }

    async fn writable(&self) -> StorageResult<MutexGuard<'_, TxnInner>> {
        let inner = self.active().await?;
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        Ok(inner)
    }

    /// Pending entry for `key`, falling back to the snapshot.
    fn lookup(&self, inner: &TxnInner, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        match inner.pending.get(key) {
            Some(pending) => Ok(pending.clone()),
            None => self.snapshot.get(key),
        }
    }

    /// Apply the pending set to the store as one atomic write.
    ///
    /// On success the transaction becomes [`TxnState::Committed`] and every
    /// later call fails with [`StorageError::TransactionFinished`]. On
    /// failure nothing was applied and the transaction stays active.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ClosedStore`] if the store closed first,
    /// [`StorageError::TransactionFinished`] if already committed or
    /// discarded, or the engine's error if the write fails.
    pub async fn commit(&self) -> StorageResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != TxnState::Active {
            return Err(StorageError::TransactionFinished(inner.state));
        }
        let coordinator = self.store.upgrade().inspect_err(|_| {
            warn!(pending = inner.pending.len(), "transaction commit after store close");
        })?;

        if !inner.pending.is_empty() {
            let ops: Vec<WriteOp> = inner
                .pending
                .iter()
                .map(|(key, value)| match value {
                    Some(value) => WriteOp::Put {
                        key: key.clone(),
                        value: value.clone(),
                    },
                    None => WriteOp::Delete { key: key.clone() },
                })
                .collect();
            let engine = coordinator.enter().await.inspect_err(|e| {
                if e.is_closed() {
                    warn!(pending = ops.len(), "store closed before transaction commit");
                }
            })?;
            engine.write(&ops).await?;
        }

        debug!(ops = inner.pending.len(), "transaction committed");
        inner.state = TxnState::Committed;
        inner.pending.clear();
        Ok(())
    }

    /// Drop the pending set without touching the store.
    ///
    /// Idempotent. After a commit this does nothing.
    pub async fn discard(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == TxnState::Active {
            debug!(ops = inner.pending.len(), "transaction discarded");
            inner.state = TxnState::Discarded;
            inner.pending.clear();
        }
    }
}

#[async_trait]
impl KvStore for Transaction {
    async fn get(&self, key: &Key) -> StorageResult<Vec<u8>> {
        let inner = self.active().await?;
        self.lookup(&inner, &encode_key(key))?
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn has(&self, key: &Key) -> StorageResult<bool> {
        let inner = self.active().await?;
        let encoded = encode_key(key);
        match inner.pending.get(&encoded) {
            Some(pending) => Ok(pending.is_some()),
            None => self.snapshot.has(&encoded),
        }
    }

    async fn put(&self, key: &Key, value: Vec<u8>) -> StorageResult<()> {
        check_value_size(key, &value, self.max_value_size)?;
        let mut inner = self.writable().await?;
        inner.pending.insert(encode_key(key), Some(value));
        Ok(())
    }

    async fn delete(&self, key: &Key) -> StorageResult<()> {
        let mut inner = self.writable().await?;
        let encoded = encode_key(key);
        if self.lookup(&inner, &encoded)?.is_none() {
            return Err(StorageError::NotFound(key.to_string()));
        }
        inner.pending.insert(encoded, None);
        Ok(())
    }

    async fn query(&self, query: Query) -> StorageResult<Results> {
        let range = query.range();
        let direction = query.direction();
        let overlay: VecDeque<(Vec<u8>, Option<Vec<u8>>)> = {
            let inner = self.active().await?;
            let start = range.start.as_ref().map(Vec::as_slice);
            let end = range.end.as_ref().map(Vec::as_slice);
            let in_range = inner
                .pending
                .range::<[u8], _>((start, end))
                .map(|(k, v)| (k.clone(), v.clone()));
            match direction {
                Direction::Forward => in_range.collect(),
                Direction::Reverse => in_range.rev().collect(),
            }
        };
        let base = self.snapshot.cursor(range, direction)?;
        let cursor = MergeCursor::new(base, overlay, direction);
        Ok(Results::new(
            query,
            Box::new(cursor),
            self.store.clone(),
            self.stream_buffer,
        ))
    }
}

// ---------------------------------------------------------------------------
// Merge cursor
// ---------------------------------------------------------------------------

/// Merges a transaction's pending writes into a snapshot cursor.
///
/// Both inputs are in walk order. On equal keys the pending entry wins and
/// the base entry is skipped; pending deletes are never emitted.
struct MergeCursor {
    base: Box<dyn Cursor>,
    base_valid: bool,
    base_stale: bool,
    overlay: VecDeque<(Vec<u8>, Option<Vec<u8>>)>,
    direction: Direction,
    current: Option<(Vec<u8>, Vec<u8>)>,
}

enum Source {
    Base,
    Overlay,
}

impl MergeCursor {
    fn new(
        base: Box<dyn Cursor>,
        overlay: VecDeque<(Vec<u8>, Option<Vec<u8>>)>,
        direction: Direction,
    ) -> Self {
        Self {
            base,
            base_valid: false,
            base_stale: true,
            overlay,
            direction,
            current: None,
        }
    }

    fn next_source(&mut self) -> Option<Source> {
        match (self.base_valid, self.overlay.front()) {
            (false, None) => None,
            (true, None) => Some(Source::Base),
            (false, Some(_)) => Some(Source::Overlay),
            (true, Some((pending, _))) => {
                let ord = self.base.key().cmp(pending.as_slice());
                let ord = match self.direction {
                    Direction::Forward => ord,
                    Direction::Reverse => ord.reverse(),
                };
                match ord {
                    Ordering::Less => Some(Source::Base),
                    Ordering::Equal => {
                        // Shadowed by the pending write.
                        self.base_stale = true;
                        Some(Source::Overlay)
                    },
                    Ordering::Greater => Some(Source::Overlay),
                }
            },
        }
    }
}

impl Cursor for MergeCursor {
    fn advance(&mut self) -> StorageResult<bool> {
        loop {
            if self.base_stale {
                self.base_valid = self.base.advance()?;
                self.base_stale = false;
            }
            match self.next_source() {
                None => {
                    self.current = None;
                    return Ok(false);
                },
                Some(Source::Base) => {
                    self.current = Some((self.base.key().to_vec(), self.base.value().to_vec()));
                    self.base_stale = true;
                    return Ok(true);
                },
                Some(Source::Overlay) => {
                    if let Some((key, Some(value))) = self.overlay.pop_front() {
                        self.current = Some((key, value));
                        return Ok(true);
                    }
                },
            }
        }
    }

    fn key(&self) -> &[u8] {
        match &self.current {
            Some((k, _)) => k,
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match &self.current {
            Some((_, v)) => v,
            None => &[],
        }
    }
}
