//! Astrid Datastore - a key-value adapter over an ordered storage engine.
//!
//! Hierarchical [`Key`]s map onto a byte-ordered [`Engine`](engine::Engine),
//! so a prefix query is a single range scan. On top of the engine the crate
//! provides:
//!
//! - [`Datastore`]: point `get` / `has` / `put` / `delete` and lazy prefix
//!   queries with ordering, offset and limit
//! - [`Batch`]: buffered writes applied as one atomic engine write
//! - [`Transaction`]: snapshot reads with read-your-own-writes, committed
//!   atomically or discarded
//!
//! Closing a store is safe while batches, transactions or result sets are
//! still in flight: whichever reaches the engine first wins, and the loser
//! fails with [`StorageError::ClosedStore`].
//!
//! # Engines
//!
//! | Config | Engine | Persistence |
//! |--------|--------|-------------|
//! | no `path` | [`MemoryEngine`](engine::MemoryEngine) | none |
//! | `path` set | [`SurrealKvEngine`](engine::SurrealKvEngine) | embedded `SurrealKV` tree |
//!
//! Any other ordered engine can be plugged in with [`Datastore::with_engine`].

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod config;
pub mod engine;
pub mod error;
pub mod key;
pub mod query;

mod batch;
mod kv;
mod results;
mod shutdown;
mod store;
mod txn;

pub use batch::Batch;
pub use config::DatastoreConfig;
pub use error::{StorageError, StorageResult};
pub use key::{Key, decode_key, encode_key};
pub use kv::KvStore;
pub use query::{Entry, Order, Query};
pub use results::{ResultStream, Results, ResultsState};
pub use store::Datastore;
pub use txn::{Transaction, TxnState};
