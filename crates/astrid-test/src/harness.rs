//! Test harness helpers.

use astrid_datastore::{Datastore, DatastoreConfig};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Create a temporary directory for testing.
///
/// The directory is automatically cleaned up when the returned `TempDir` is dropped.
///
/// # Panics
///
/// Panics if the temporary directory cannot be created.
#[must_use]
pub fn test_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

/// Set up test logging with the given filter.
///
/// This initializes the tracing subscriber for tests. Should be called
/// at the beginning of tests that need logging.
pub fn setup_test_logging(filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_test_writer()
        .try_init();
}

/// Set up test logging with default filter (warn level).
pub fn setup_test_logging_default() {
    setup_test_logging("warn");
}

/// A persistent datastore in a temporary directory.
///
/// The directory outlives [`close`](Datastore::close), so a test can reopen
/// the store with [`reopen`](Self::reopen) and inspect what was persisted.
#[derive(Debug)]
pub struct TempDatastore {
    /// Temporary directory holding the data.
    pub dir: TempDir,
    /// The open store.
    pub store: Datastore,
}

impl TempDatastore {
    /// Open a fresh store with default settings.
    ///
    /// # Panics
    ///
    /// Panics if the store cannot be opened.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Open a fresh store, adjusting the config first.
    ///
    /// # Panics
    ///
    /// Panics if the store cannot be opened.
    #[must_use]
    pub fn with_config(adjust: impl FnOnce(DatastoreConfig) -> DatastoreConfig) -> Self {
        let dir = test_dir();
        let config = adjust(DatastoreConfig::at_path(dir.path()));
        let store = Datastore::open(config).expect("Failed to open datastore");
        Self { dir, store }
    }

    /// Open the same directory again with the same config.
    ///
    /// The current store should be closed first.
    ///
    /// # Panics
    ///
    /// Panics if the store cannot be opened.
    #[must_use]
    pub fn reopen(&self) -> Datastore {
        Datastore::open(self.store.config().clone()).expect("Failed to reopen datastore")
    }
}

impl Default for TempDatastore {
    fn default() -> Self {
        Self::new()
    }
}
