//! Persistent engine backed by `SurrealKV`.
//!
//! `SurrealKV` is an embedded, versioned, ACID LSM-tree store. Every engine
//! write is one `SurrealKV` transaction, and every [`Snapshot`] is a
//! read-only transaction, so readers see a fixed version of the tree while
//! writers carry on.
//!
//! Cursors page through the snapshot's range: each refill opens a short
//! range iterator after the last key seen and copies up to
//! [`PAGE_SIZE`] keys out of it. Values are read on demand.

use std::collections::VecDeque;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::engine::{Cursor, Direction, Engine, KeyRange, Snapshot, WriteOp};
use crate::error::{StorageError, StorageResult};

/// Keys copied out of the tree per cursor refill.
const PAGE_SIZE: usize = 128;

/// Exclusive upper bound used for unbounded ranges.
///
/// `0xff` never occurs in UTF-8, so it sorts after every encoded key.
const KEYSPACE_END: &[u8] = &[0xff];

fn map_kv_err(context: &str, e: &surrealkv::Error) -> StorageError {
    StorageError::io(context, std::io::Error::other(e.to_string()))
}

/// Persistent ordered engine over a `SurrealKV` tree.
pub struct SurrealKvEngine {
    path: PathBuf,
    tree: surrealkv::Tree,
}

impl std::fmt::Debug for SurrealKvEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurrealKvEngine")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SurrealKvEngine {
    /// Open the tree stored in `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the directory is missing and
    /// `create_if_missing` is false, or if the tree cannot be opened.
    pub fn open(dir: &Path, create_if_missing: bool) -> StorageResult<Self> {
        if !dir.is_dir() {
            if !create_if_missing {
                return Err(StorageError::io(
                    format!("opening {}", dir.display()),
                    std::io::Error::from(std::io::ErrorKind::NotFound),
                ));
            }
            std::fs::create_dir_all(dir)
                .map_err(|e| StorageError::io(format!("creating {}", dir.display()), e))?;
        }

        let tree = surrealkv::TreeBuilder::new()
            .with_path(dir.to_path_buf())
            .build()
            .map_err(|ref e| map_kv_err("opening tree", e))?;
        info!(path = %dir.display(), "opened surrealkv tree");
        Ok(Self {
            path: dir.to_path_buf(),
            tree,
        })
    }

    /// Directory holding the tree.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_tx(&self) -> StorageResult<surrealkv::Transaction> {
        self.tree
            .begin_with_mode(surrealkv::Mode::ReadOnly)
            .map_err(|ref e| map_kv_err("starting read transaction", e))
    }
}

#[async_trait]
impl Engine for SurrealKvEngine {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let key = key.to_vec();
        self.read_tx()?
            .get(&key)
            .map_err(|ref e| map_kv_err("reading key", e))
    }

    fn has(&self, key: &[u8]) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        let (key, value) = (key.to_vec(), value.to_vec());
        let mut tx = self
            .tree
            .begin()
            .map_err(|ref e| map_kv_err("starting write transaction", e))?;
        tx.set(&key, &value)
            .map_err(|ref e| map_kv_err("writing key", e))?;
        tx.commit()
            .await
            .map_err(|ref e| map_kv_err("committing put", e))
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<bool> {
        let key = key.to_vec();
        let mut tx = self
            .tree
            .begin()
            .map_err(|ref e| map_kv_err("starting write transaction", e))?;
        let existed = tx
            .get(&key)
            .map_err(|ref e| map_kv_err("reading key", e))?
            .is_some();
        if existed {
            tx.delete(&key)
                .map_err(|ref e| map_kv_err("deleting key", e))?;
            tx.commit()
                .await
                .map_err(|ref e| map_kv_err("committing delete", e))?;
        }
        Ok(existed)
    }

    async fn write(&self, ops: &[WriteOp]) -> StorageResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut tx = self
            .tree
            .begin()
            .map_err(|ref e| map_kv_err("starting write transaction", e))?;
        for op in ops {
            match op {
                WriteOp::Put { key, value } => tx
                    .set(key, value)
                    .map_err(|ref e| map_kv_err("writing key", e))?,
                WriteOp::Delete { key } => tx
                    .delete(key)
                    .map_err(|ref e| map_kv_err("deleting key", e))?,
            }
        }
        tx.commit()
            .await
            .map_err(|ref e| map_kv_err("committing batch", e))?;
        debug!(ops = ops.len(), "committed surrealkv batch");
        Ok(())
    }

    fn snapshot(&self) -> StorageResult<Arc<dyn Snapshot>> {
        Ok(Arc::new(SurrealSnapshot {
            tx: Arc::new(Mutex::new(self.read_tx()?)),
        }))
    }

    fn disk_usage(&self) -> StorageResult<u64> {
        let mut total = 0u64;
        for entry in WalkDir::new(&self.path) {
            let entry = entry.map_err(|e| {
                StorageError::io(
                    format!("measuring {}", self.path.display()),
                    std::io::Error::other(e.to_string()),
                )
            })?;
            if entry.file_type().is_file() {
                let meta = entry.metadata().map_err(|e| {
                    StorageError::io(
                        format!("measuring {}", entry.path().display()),
                        std::io::Error::other(e.to_string()),
                    )
                })?;
                total = total.saturating_add(meta.len());
            }
        }
        Ok(total)
    }

    async fn close(&self) -> StorageResult<()> {
        self.tree
            .close()
            .await
            .map_err(|ref e| map_kv_err("closing tree", e))
    }
}

/// A read-only `SurrealKV` transaction shared by the snapshot and its cursors.
type SharedTx = Arc<Mutex<surrealkv::Transaction>>;

struct SurrealSnapshot {
    tx: SharedTx,
}

impl Snapshot for SurrealSnapshot {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let key = key.to_vec();
        self.tx
            .lock()?
            .get(&key)
            .map_err(|ref e| map_kv_err("reading key", e))
    }

    fn cursor(&self, range: KeyRange, direction: Direction) -> StorageResult<Box<dyn Cursor>> {
        let end = match range.end {
            Bound::Included(mut end) => {
                end.push(0);
                end
            },
            Bound::Excluded(end) => end,
            Bound::Unbounded => KEYSPACE_END.to_vec(),
        };
        let start = lower_bound(range.start);
        let mut cursor = SurrealCursor {
            tx: Arc::clone(&self.tx),
            next_start: Some(start),
            end,
            direction,
            page: VecDeque::new(),
            current: None,
        };
        if direction == Direction::Reverse {
            // Range iterators only walk forward: load the keys once and
            // hand them out from the back.
            cursor.fill_all()?;
        }
        Ok(Box::new(cursor))
    }
}

/// Inclusive start key for a lower bound.
fn lower_bound(bound: Bound<Vec<u8>>) -> Vec<u8> {
    match bound {
        Bound::Included(start) => start,
        Bound::Excluded(mut start) => {
            // Smallest key strictly greater than `start`.
            start.push(0);
            start
        },
        Bound::Unbounded => Vec::new(),
    }
}

struct SurrealCursor {
    tx: SharedTx,
    /// Where the next forward refill starts; `None` once the range is drained.
    next_start: Option<Vec<u8>>,
    end: Vec<u8>,
    direction: Direction,
    page: VecDeque<Vec<u8>>,
    current: Option<(Vec<u8>, Vec<u8>)>,
}

impl SurrealCursor {
    /// Copy up to `limit` keys from `next_start` onwards into the page.
    fn fill(&mut self, limit: usize) -> StorageResult<()> {
        let Some(start) = self.next_start.take() else {
            return Ok(());
        };
        if start >= self.end {
            return Ok(());
        }
        let tx = self.tx.lock()?;
        let mut iter = tx
            .range(&start, &self.end)
            .map_err(|ref e| map_kv_err("opening range", e))?;
        iter.seek_first()
            .map_err(|ref e| map_kv_err("seeking range", e))?;
        let mut taken = 0usize;
        while iter.valid() && taken < limit {
            self.page.push_back(iter.key().to_vec());
            taken = taken.saturating_add(1);
            iter.next()
                .map_err(|ref e| map_kv_err("advancing range", e))?;
        }
        if iter.valid()
            && let Some(last) = self.page.back()
        {
            self.next_start = Some(lower_bound(Bound::Excluded(last.clone())));
        }
        Ok(())
    }

    fn fill_all(&mut self) -> StorageResult<()> {
        self.fill(usize::MAX)
    }

    fn next_key(&mut self) -> StorageResult<Option<Vec<u8>>> {
        match self.direction {
            Direction::Forward => {
                if self.page.is_empty() {
                    self.fill(PAGE_SIZE)?;
                }
                Ok(self.page.pop_front())
            },
            Direction::Reverse => Ok(self.page.pop_back()),
        }
    }
}

impl Cursor for SurrealCursor {
    fn advance(&mut self) -> StorageResult<bool> {
        while let Some(key) = self.next_key()? {
            let value = {
                let tx = self.tx.lock()?;
                tx.get(&key)
                    .map_err(|ref e| map_kv_err("reading value", e))?
            };
            if let Some(value) = value {
                self.current = Some((key, value));
                return Ok(true);
            }
        }
        self.current = None;
        Ok(false)
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

    fn put(k: &str, v: &str) -> WriteOp {
        WriteOp::Put {
            key: k.as_bytes().to_vec(),
            value: v.as_bytes().to_vec(),
        }
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
        let dir = tempfile::tempdir().unwrap();
        let engine = SurrealKvEngine::open(dir.path(), true).unwrap();
        assert!(engine.get(b"/k").unwrap().is_none());
        engine.put(b"/k", b"v").await.unwrap();
        assert_eq!(engine.get(b"/k").unwrap(), Some(b"v".to_vec()));
        assert!(engine.delete(b"/k").await.unwrap());
        assert!(!engine.delete(b"/k").await.unwrap());
        assert!(!engine.has(b"/k").unwrap());
        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_is_one_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SurrealKvEngine::open(dir.path(), true).unwrap();
        engine
            .write(&[
                put("/a", "1"),
                put("/b", "2"),
                WriteOp::Delete { key: b"/a".to_vec() },
            ])
            .await
            .unwrap();
        assert!(!engine.has(b"/a").unwrap());
        assert_eq!(engine.get(b"/b").unwrap(), Some(b"2".to_vec()));
        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_cursor_pages_through_range() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SurrealKvEngine::open(dir.path(), true).unwrap();
        let ops: Vec<_> = (0..300).map(|i| put(&format!("/p/{i:04}"), "x")).collect();
        engine.write(&ops).await.unwrap();
        engine.put(b"/q", b"outside").await.unwrap();

        let snap = engine.snapshot().unwrap();
        let fwd = drain(snap.cursor(KeyRange::prefix(b"/p/"), Direction::Forward).unwrap());
        assert_eq!(fwd.len(), 300);
        assert_eq!(fwd.first().map(String::as_str), Some("/p/0000"));
        assert_eq!(fwd.last().map(String::as_str), Some("/p/0299"));
        assert!(fwd.windows(2).all(|w| w[0] < w[1]));

        let rev = drain(snap.cursor(KeyRange::all(), Direction::Reverse).unwrap());
        assert_eq!(rev.first().map(String::as_str), Some("/q"));
        assert_eq!(rev.len(), 301);
        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_is_isolated_from_later_writes() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SurrealKvEngine::open(dir.path(), true).unwrap();
        engine.write(&[put("/a", "1"), put("/b", "2")]).await.unwrap();

        let snap = engine.snapshot().unwrap();
        engine.put(b"/c", b"3").await.unwrap();
        engine.delete(b"/a").await.unwrap();

        assert!(snap.has(b"/a").unwrap());
        assert!(!snap.has(b"/c").unwrap());
        assert_eq!(
            drain(snap.cursor(KeyRange::all(), Direction::Forward).unwrap()),
            vec!["/a", "/b"]
        );
        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_reopen_keeps_committed_data() {
        let dir = tempfile::tempdir().unwrap();
        {
            let engine = SurrealKvEngine::open(dir.path(), true).unwrap();
            engine.write(&[put("/a", "1"), put("/b", "2")]).await.unwrap();
            engine.delete(b"/a").await.unwrap();
            assert!(engine.disk_usage().unwrap() > 0);
            engine.close().await.unwrap();
        }
        let engine = SurrealKvEngine::open(dir.path(), false).unwrap();
        assert!(!engine.has(b"/a").unwrap());
        assert_eq!(engine.get(b"/b").unwrap(), Some(b"2".to_vec()));
        engine.close().await.unwrap();
    }

    #[test]
    fn test_missing_dir_without_create_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = SurrealKvEngine::open(&dir.path().join("absent"), false).unwrap_err();
        assert!(matches!(err, StorageError::Io { .. }));
    }

    #[test]
    fn test_lower_bound_excludes_start() {
        assert_eq!(lower_bound(Bound::Excluded(b"/a".to_vec())), b"/a\0".to_vec());
        assert_eq!(lower_bound(Bound::Included(b"/a".to_vec())), b"/a".to_vec());
        assert!(lower_bound(Bound::Unbounded).is_empty());
    }
}
