//! Prelude module - commonly used types for convenient import.
//!
//! Use `use astrid_datastore::prelude::*;` to import all essential types.
//!
//! # Example
//!
//! ```rust
//! use astrid_datastore::prelude::*;
//!
//! # async fn example() -> StorageResult<()> {
//! let store = Datastore::in_memory();
//! store.put(&Key::new("/greeting"), b"hello".to_vec()).await?;
//!
//! let txn = store.new_transaction(false).await?;
//! txn.put(&Key::new("/farewell"), b"bye".to_vec()).await?;
//! txn.commit().await?;
//!
//! let entries = store.query(Query::new().keys_only()).await?.rest()?;
//! assert_eq!(entries.len(), 2);
//! # Ok(())
//! # }
//! ```

// Store
pub use crate::{Datastore, DatastoreConfig, KvStore};

// Keys and queries
pub use crate::{Entry, Key, Order, Query, ResultStream, Results};

// Writers
pub use crate::{Batch, Transaction, TxnState};

// Errors
pub use crate::{StorageError, StorageResult};
