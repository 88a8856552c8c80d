//! In-memory ordered engine.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::engine::{Cursor, Direction, Engine, KeyRange, Snapshot, WriteOp};
use crate::error::StorageResult;

type Tree = BTreeMap<Vec<u8>, Vec<u8>>;

/// Ordered in-memory engine for tests and ephemeral data.
///
/// The tree lives behind an `Arc`: a snapshot is a clone of that `Arc`, and
/// writers copy the tree only while a snapshot still shares it.
///
/// That copy is the whole tree, so a write issued while a query or
/// transaction is still open costs O(n) in the number of stored keys. Use
/// [`SurrealKvEngine`](crate::engine::SurrealKvEngine) for large datasets
/// with long-lived readers.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    tree: RwLock<Arc<Tree>>,
}

impl MemoryEngine {
    /// Create an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`](crate::StorageError::Internal) if the
    /// lock is poisoned.
    pub fn len(&self) -> StorageResult<usize> {
        Ok(self.tree.read()?.len())
    }

    /// Whether the engine holds no keys.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`](crate::StorageError::Internal) if the
    /// lock is poisoned.
    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.tree.read()?.is_empty())
    }

    pub(crate) fn apply(tree: &mut Tree, op: &WriteOp) {
        match op {
            WriteOp::Put { key, value } => {
                tree.insert(key.clone(), value.clone());
            },
            WriteOp::Delete { key } => {
                tree.remove(key);
            },
        }
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.tree.read()?.get(key).cloned())
    }

    fn has(&self, key: &[u8]) -> StorageResult<bool> {
        Ok(self.tree.read()?.contains_key(key))
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        let mut guard = self.tree.write()?;
        Arc::make_mut(&mut guard).insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<bool> {
        let mut guard = self.tree.write()?;
        if !guard.contains_key(key) {
            return Ok(false);
        }
        Arc::make_mut(&mut guard).remove(key);
        Ok(true)
    }

    async fn write(&self, ops: &[WriteOp]) -> StorageResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        // One write guard for the whole batch: readers see all or nothing.
        let mut guard = self.tree.write()?;
        let tree = Arc::make_mut(&mut guard);
        for op in ops {
            Self::apply(tree, op);
        }
        Ok(())
    }

    fn snapshot(&self) -> StorageResult<Arc<dyn Snapshot>> {
        let tree = Arc::clone(&*self.tree.read()?);
        Ok(Arc::new(MemorySnapshot { tree }))
    }

    fn disk_usage(&self) -> StorageResult<u64> {
        Ok(0)
    }

    async fn close(&self) -> StorageResult<()> {
        *self.tree.write()? = Arc::new(Tree::new());
        Ok(())
    }
}

/// Frozen view of a [`MemoryEngine`].
#[derive(Debug)]
pub(crate) struct MemorySnapshot {
    tree: Arc<Tree>,
}

impl Snapshot for MemorySnapshot {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.tree.get(key).cloned())
    }

    fn has(&self, key: &[u8]) -> StorageResult<bool> {
        Ok(self.tree.contains_key(key))
    }

    fn cursor(&self, range: KeyRange, direction: Direction) -> StorageResult<Box<dyn Cursor>> {
        Ok(Box::new(MemoryCursor {
            tree: Arc::clone(&self.tree),
            range,
            direction,
            current: None,
            exhausted: false,
        }))
    }
}

/// Cursor over a frozen tree.
///
/// Holds its position as the last key it returned and re-seeks from there on
/// every advance, so it never borrows the tree across calls.
struct MemoryCursor {
    tree: Arc<Tree>,
    range: KeyRange,
    direction: Direction,
    current: Option<(Vec<u8>, Vec<u8>)>,
    exhausted: bool,
}

impl Cursor for MemoryCursor {
    fn advance(&mut self) -> StorageResult<bool> {
        if self.exhausted {
            return Ok(false);
        }
        let next = {
            let last = self.current.as_ref().map(|(k, _)| k.as_slice());
            let start = self.range.start.as_ref().map(Vec::as_slice);
            let end = self.range.end.as_ref().map(Vec::as_slice);
            let found = match self.direction {
                Direction::Forward => {
                    let lower = last.map_or(start, Bound::Excluded);
                    self.tree.range::<[u8], _>((lower, end)).next()
                },
                Direction::Reverse => {
                    let upper = last.map_or(end, Bound::Excluded);
                    self.tree.range::<[u8], _>((start, upper)).next_back()
                },
            };
            found.map(|(k, v)| (k.clone(), v.clone()))
        };
        self.exhausted = next.is_none();
        self.current = next;
        Ok(!self.exhausted)
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

#[cfg(test)]
mod tests {
    use super::*;

    async fn engine_with(keys: &[&str]) -> MemoryEngine {
        let engine = MemoryEngine::new();
        for k in keys {
            engine.put(k.as_bytes(), k.to_uppercase().as_bytes()).await.unwrap();
        }
        engine
    }

    fn drain(mut cursor: Box<dyn Cursor>) -> Vec<String> {
        let mut out = Vec::new();
        while cursor.advance().unwrap() {
            out.push(String::from_utf8(cursor.key().to_vec()).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_point_operations() {
        let engine = MemoryEngine::new();
        assert!(engine.get(b"k").unwrap().is_none());
        engine.put(b"k", b"v").await.unwrap();
        assert_eq!(engine.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert!(engine.has(b"k").unwrap());
        assert!(engine.delete(b"k").await.unwrap());
        assert!(!engine.has(b"k").unwrap());
        assert!(!engine.delete(b"k").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deletes_report_once() {
        let engine = Arc::new(engine_with(&["/k"]).await);
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.delete(b"/k").await.unwrap() })
            })
            .collect();
        let mut removed = Vec::new();
        for task in tasks {
            removed.push(task.await.unwrap());
        }
        assert_eq!(removed.iter().filter(|&&r| r).count(), 1);
    }

    #[tokio::test]
    async fn test_write_applies_in_order() {
        let engine = MemoryEngine::new();
        engine
            .write(&[
                WriteOp::Put {
                    key: b"a".to_vec(),
                    value: b"1".to_vec(),
                },
                WriteOp::Put {
                    key: b"b".to_vec(),
                    value: b"2".to_vec(),
                },
                WriteOp::Delete { key: b"a".to_vec() },
            ])
            .await
            .unwrap();
        assert!(!engine.has(b"a").unwrap());
        assert_eq!(engine.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(engine.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cursor_forward_and_reverse() {
        let engine = engine_with(&["/a", "/a/b", "/a/c", "/b"]).await;
        let snap = engine.snapshot().unwrap();

        let fwd = snap
            .cursor(KeyRange::prefix(b"/a/"), Direction::Forward)
            .unwrap();
        assert_eq!(drain(fwd), vec!["/a/b", "/a/c"]);

        let rev = snap.cursor(KeyRange::all(), Direction::Reverse).unwrap();
        assert_eq!(drain(rev), vec!["/b", "/a/c", "/a/b", "/a"]);
    }

    #[tokio::test]
    async fn test_cursor_exposes_value() {
        let engine = engine_with(&["/x"]).await;
        let mut cursor = engine
            .snapshot()
            .unwrap()
            .cursor(KeyRange::all(), Direction::Forward)
            .unwrap();
        assert!(cursor.key().is_empty());
        assert!(cursor.advance().unwrap());
        assert_eq!(cursor.value(), b"/X");
        assert!(!cursor.advance().unwrap());
        assert!(!cursor.advance().unwrap());
    }

    #[tokio::test]
    async fn test_snapshot_is_isolated_from_later_writes() {
        let engine = engine_with(&["/a", "/b"]).await;
        let snap = engine.snapshot().unwrap();
        engine.put(b"/c", b"C").await.unwrap();
        engine.delete(b"/a").await.unwrap();

        assert!(snap.has(b"/a").unwrap());
        assert!(!snap.has(b"/c").unwrap());
        let keys = drain(snap.cursor(KeyRange::all(), Direction::Forward).unwrap());
        assert_eq!(keys, vec!["/a", "/b"]);

        assert!(engine.has(b"/c").unwrap());
        assert!(!engine.has(b"/a").unwrap());
    }

    #[tokio::test]
    async fn test_cursor_outlives_snapshot_handle() {
        let engine = engine_with(&["/a", "/b"]).await;
        let cursor = engine
            .snapshot()
            .unwrap()
            .cursor(KeyRange::all(), Direction::Forward)
            .unwrap();
        engine.close().await.unwrap();
        assert_eq!(drain(cursor), vec!["/a", "/b"]);
    }

    #[tokio::test]
    async fn test_disk_usage_is_zero() {
        let engine = engine_with(&["/a"]).await;
        assert_eq!(engine.disk_usage().unwrap(), 0);
    }
}
