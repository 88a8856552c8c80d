//! Query descriptions and result entries.

use serde::{Deserialize, Serialize};

use crate::engine::{Direction, KeyRange};
use crate::key::Key;

/// A sort directive.
///
/// Only whole-key orderings are supported; the engine walks its range
/// forward or backward, so no buffering or re-sorting happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Order {
    /// Ascending byte order of the encoded key.
    ByKey,
    /// Descending byte order of the encoded key.
    ByKeyDescending,
}

/// What to scan and how to page through it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Query {
    /// Raw key prefix. Empty scans everything. `/a/` matches `/a/b` but
    /// not `/a` itself.
    pub prefix: String,
    /// Sort directives. The first one decides the walk direction; none
    /// means engine order (ascending).
    pub orders: Vec<Order>,
    /// Maximum entries to return. `0` means unbounded.
    pub limit: usize,
    /// Entries to skip before the first one is returned.
    pub offset: usize,
    /// Return keys without values.
    pub keys_only: bool,
}

impl Query {
    /// A query over the whole keyspace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the scan to keys starting with `prefix`.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Add a sort directive.
    #[must_use]
    pub fn with_order(mut self, order: Order) -> Self {
        self.orders.push(order);
        self
    }

    /// Cap the number of returned entries.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Skip the first `offset` matching entries.
    #[must_use]
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Return keys only.
    #[must_use]
    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }

    /// Direction the cursor walks in.
    #[must_use]
    pub fn direction(&self) -> Direction {
        match self.orders.first() {
            Some(Order::ByKeyDescending) => Direction::Reverse,
            Some(Order::ByKey) | None => Direction::Forward,
        }
    }

    /// Engine byte range covered by the prefix.
    #[must_use]
    pub fn range(&self) -> KeyRange {
        KeyRange::prefix(self.prefix.as_bytes())
    }
}

/// A single query result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// The entry key.
    pub key: Key,
    /// The value, absent for keys-only queries.
    pub value: Option<Vec<u8>>,
}
