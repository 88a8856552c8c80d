//! Lazy query results.
//!
//! [`Results`] is a pull-based iterator over an engine [`Cursor`]. Offset,
//! limit and keys-only are applied as entries are pulled; nothing is read
//! ahead. The cursor is dropped exactly once: when the range is exhausted,
//! the limit is reached, an error is returned, or [`Results::close`] is
//! called (including before the first pull). After that every pull returns
//! `None`.
//!
//! [`Results::into_stream`] moves the iterator onto a blocking worker and
//! hands entries to an async consumer through a bounded channel, in order.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::engine::Cursor;
use crate::error::{StorageError, StorageResult};
use crate::key::decode_key;
use crate::query::{Entry, Query};
use crate::shutdown::StoreHandle;

/// Lifecycle of a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultsState {
    /// Cursor open, entries may remain.
    Open,
    /// The range or the limit ran out, or an error ended the scan.
    Exhausted,
    /// Closed by the consumer before exhaustion.
    Closed,
}

/// Lazily produced entries of a query.
pub struct Results {
    query: Query,
    cursor: Option<Box<dyn Cursor>>,
    store: StoreHandle,
    emitted: usize,
    offset_applied: bool,
    state: ResultsState,
    stream_buffer: usize,
}

impl std::fmt::Debug for Results {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Results")
            .field("query", &self.query)
            .field("emitted", &self.emitted)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Results {
    pub(crate) fn new(
        query: Query,
        cursor: Box<dyn Cursor>,
        store: StoreHandle,
        stream_buffer: usize,
    ) -> Self {
        Self {
            query,
            cursor: Some(cursor),
            store,
            emitted: 0,
            offset_applied: false,
            state: ResultsState::Open,
            stream_buffer,
        }
    }

    /// The query that produced these results.
    #[must_use]
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ResultsState {
        self.state
    }

    /// Entries returned so far.
    #[must_use]
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Release the cursor. Later pulls return `None`. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.cursor.is_some() {
            self.release(ResultsState::Closed);
        }
    }

    /// Drain every remaining entry.
    ///
    /// # Errors
    ///
    /// Returns the first error hit while scanning.
    pub fn rest(mut self) -> StorageResult<Vec<Entry>> {
        let mut out = Vec::new();
        for entry in self.by_ref() {
            out.push(entry?);
        }
        Ok(out)
    }

    /// Move production onto a blocking worker and consume asynchronously.
    ///
    /// The worker advances the cursor and pushes entries into a channel of
    /// `stream_buffer` slots, so at most that many entries are read ahead.
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn into_stream(self) -> ResultStream {
        let (tx, rx) = mpsc::channel(self.stream_buffer.max(1));
        let query = self.query.clone();
        let producer = tokio::task::spawn_blocking(move || {
            let mut results = self;
            for item in results.by_ref() {
                if tx.blocking_send(item).is_err() {
                    // Consumer went away.
                    break;
                }
            }
            results.close();
        });
        ResultStream {
            query,
            rx,
            producer: Some(producer),
            closed: false,
        }
    }

    fn release(&mut self, state: ResultsState) {
        if self.cursor.take().is_some() {
            debug!(
                prefix = %self.query.prefix,
                emitted = self.emitted,
                ?state,
                "released query cursor"
            );
        }
        self.state = state;
    }

    fn step(&mut self) -> StorageResult<Option<Entry>> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };
        if self.query.limit > 0 && self.emitted >= self.query.limit {
            return Ok(None);
        }
        if self.store.is_closed() {
            return Err(StorageError::ClosedStore);
        }

        if !self.offset_applied {
            self.offset_applied = true;
            for _ in 0..self.query.offset {
                if !cursor.advance()? {
                    return Ok(None);
                }
            }
        }

        if !cursor.advance()? {
            return Ok(None);
        }
        let key = decode_key(cursor.key())?;
        let value = if self.query.keys_only {
            None
        } else {
            // Copy out: the cursor may reuse its buffers on the next advance.
            Some(cursor.value().to_vec())
        };
        self.emitted = self.emitted.saturating_add(1);
        Ok(Some(Entry { key, value }))
    }
}

impl Iterator for Results {
    type Item = StorageResult<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                if self.cursor.is_some() {
                    self.release(ResultsState::Exhausted);
                }
                None
            },
            Err(e) => {
                self.release(ResultsState::Exhausted);
                Some(Err(e))
            },
        }
    }
}

/// Async consumer side of [`Results::into_stream`].
pub struct ResultStream {
    query: Query,
    rx: mpsc::Receiver<StorageResult<Entry>>,
    producer: Option<JoinHandle<()>>,
    closed: bool,
}

impl std::fmt::Debug for ResultStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStream")
            .field("query", &self.query)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl ResultStream {
    /// The query that produced this stream.
    #[must_use]
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Receive the next entry, in cursor order.
    pub async fn next(&mut self) -> Option<StorageResult<Entry>> {
        if self.closed {
            return None;
        }
        self.rx.recv().await
    }

    /// Drain every remaining entry.
    ///
    /// # Errors
    ///
    /// Returns the first error hit while scanning.
    pub async fn rest(mut self) -> StorageResult<Vec<Entry>> {
        let mut out = Vec::new();
        while let Some(entry) = self.next().await {
            out.push(entry?);
        }
        Ok(out)
    }

    /// Stop consuming and wait for the worker to release the cursor.
    ///
    /// The worker is woken even if it is blocked on a full channel.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`] if the worker panicked.
    pub async fn close(&mut self) -> StorageResult<()> {
        self.closed = true;
        self.rx.close();
        if let Some(producer) = self.producer.take() {
            producer
                .await
                .map_err(|e| StorageError::Internal(format!("result producer failed: {e}")))?;
        }
        Ok(())
    }
}

impl futures::Stream for ResultStream {
    type Item = StorageResult<Entry>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(None);
        }
        this.rx.poll_recv(cx)
    }
}
