use std::{path::PathBuf, sync::Arc};

use serde::Deserialize;

use crate::{FileRecordStore, MemoryRecordStore, r#trait::RecordStore};

fn default_path() -> PathBuf {
    PathBuf::from("/var/lib/courier/records")
}

/// Configuration for the record store
///
/// # Examples
///
/// File-backed store in RON config:
/// ```ron
/// Courier (
///     store: File(
///         path: "/var/lib/courier/records",
///     ),
/// )
/// ```
///
/// Memory-backed store with a capacity limit:
/// ```ron
/// Courier (
///     store: Memory(
///         capacity: Some(1000),
///     ),
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum StoreConfig {
    /// JSON documents on disk (production)
    File {
        #[serde(default = "default_path")]
        path: PathBuf,
    },
    /// Records held in memory (testing/development)
    Memory {
        /// Maximum number of records to store (omit for unlimited)
        #[serde(default)]
        capacity: Option<usize>,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::File {
            path: default_path(),
        }
    }
}

impl StoreConfig {
    /// Build and initialise the configured store.
    ///
    /// # Errors
    /// If the file store path is invalid or its directory cannot be prepared.
    pub fn build(&self) -> crate::Result<Arc<dyn RecordStore>> {
        match self {
            Self::File { path } => {
                let store = FileRecordStore::new(path.clone())?;
                store.init()?;
                Ok(Arc::new(store))
            }
            Self::Memory { capacity } => Ok(capacity.map_or_else(
                || Arc::new(MemoryRecordStore::new()) as Arc<dyn RecordStore>,
                |capacity| Arc::new(MemoryRecordStore::with_capacity(capacity)),
            )),
        }
    }
}
