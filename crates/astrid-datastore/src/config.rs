//! Datastore configuration.
//!
//! Usually built in code with [`DatastoreConfig::in_memory`] or
//! [`DatastoreConfig::at_path`], or loaded from a TOML file:
//!
//! ```toml
//! path = "/var/lib/astrid/data"
//! max_value_size = 1048576
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// How a [`Datastore`](crate::Datastore) is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatastoreConfig {
    /// Data directory. `None` keeps everything in memory.
    pub path: Option<PathBuf>,
    /// Create the data directory if it does not exist.
    pub create_if_missing: bool,
    /// Largest accepted value in bytes. `0` means unlimited.
    pub max_value_size: usize,
    /// Entries a streamed query may read ahead of its consumer.
    pub stream_buffer: usize,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            create_if_missing: true,
            max_value_size: 0,
            stream_buffer: 1,
        }
    }
}

impl DatastoreConfig {
    /// An in-memory store with default settings.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// A persistent store rooted at `path`.
    #[must_use]
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Set the value size limit. `0` disables it.
    #[must_use]
    pub fn with_max_value_size(mut self, max: usize) -> Self {
        self.max_value_size = max;
        self
    }

    /// Set whether a missing data directory is created.
    #[must_use]
    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    /// Set the streamed query read-ahead.
    #[must_use]
    pub fn with_stream_buffer(mut self, slots: usize) -> Self {
        self.stream_buffer = slots;
        self
    }

    /// Load and validate a config from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the file cannot be read and
    /// [`StorageError::Config`] if it is too large, malformed or invalid.
    pub fn load_file(path: &Path) -> StorageResult<Self> {
        // Check file size before reading to prevent OOM.
        let metadata = std::fs::metadata(path)
            .map_err(|e| StorageError::io(format!("reading {}", path.display()), e))?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(StorageError::Config(format!(
                "{}: config file is {} bytes, exceeding the {} byte limit",
                path.display(),
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            )));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| StorageError::io(format!("reading {}", path.display()), e))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| StorageError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Check field values.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] describing the first invalid field.
    pub fn validate(&self) -> StorageResult<()> {
        if self.stream_buffer == 0 {
            return Err(StorageError::Config(
                "stream_buffer must be at least 1".into(),
            ));
        }
        if let Some(path) = &self.path
            && path.as_os_str().is_empty()
        {
            return Err(StorageError::Config("path must not be empty".into()));
        }
        Ok(())
    }
}
