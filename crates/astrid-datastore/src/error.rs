//! Datastore error types.

use crate::txn::TxnState;

/// Errors from datastore operations.
///
/// The variants keep "absent", "store unusable" and "I/O failure" apart so
/// callers never have to parse a message to tell them apart.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The value is not an acceptable byte payload.
    #[error("invalid value: {0}")]
    InvalidValueType(String),

    /// The requested key does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The datastore has been closed.
    #[error("datastore is closed")]
    ClosedStore,

    /// The underlying engine failed.
    #[error("I/O error while {context}: {source}")]
    Io {
        /// What the datastore was doing when the engine failed.
        context: String,
        /// The engine error.
        #[source]
        source: std::io::Error,
    },

    /// Persisted data or a stored key failed an integrity check.
    #[error("corruption: {0}")]
    Corruption(String),

    /// A write was attempted on a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnly,

    /// The transaction has already been committed or discarded.
    #[error("transaction already {0}")]
    TransactionFinished(TxnState),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The datastore configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// An internal invariant failed (poisoned lock, lost worker).
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Wrap an engine I/O error with the operation that produced it.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns `true` if this is a [`StorageError::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns `true` if this is a [`StorageError::ClosedStore`].
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ClosedStore)
    }
}

impl<T> From<std::sync::PoisonError<T>> for StorageError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(e.to_string())
    }
}

/// Result type for datastore operations.
pub type StorageResult<T> = Result<T, StorageError>;
