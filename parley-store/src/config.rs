use std::{path::PathBuf, sync::Arc};

use serde::Deserialize;

use crate::{
    backends::{FileBackingStore, MemoryBackingStore},
    r#trait::BackingStore,
};

/// Configuration for the backing store
///
/// File-backed store in RON config:
/// ```ron
/// Engine (
///     store: File(path: "/var/lib/parley"),
/// )
/// ```
///
/// Memory-backed store with a capacity limit:
/// ```ron
/// Engine (
///     store: Memory(capacity: Some(1000)),
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum StoreConfig {
    /// One record file per unit under `path`
    File { path: PathBuf },
    /// Units held in memory; lost on restart
    Memory {
        /// Maximum number of units to store (omit for unlimited)
        #[serde(default)]
        capacity: Option<usize>,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::File {
            path: PathBuf::from("/var/lib/parley"),
        }
    }
}

impl StoreConfig {
    /// Filesystem path for file-backed stores
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::File { path } => Some(path.as_path()),
            Self::Memory { .. } => None,
        }
    }

    /// Build and initialise the configured backing store
    ///
    /// # Errors
    /// Returns an error if the file store path is invalid or cannot be
    /// initialised
    pub async fn into_backing_store(self) -> crate::Result<Arc<dyn BackingStore>> {
        match self {
            Self::File { path } => {
                let store = FileBackingStore::builder().path(path).build()?;
                store.init().await?;
                Ok(Arc::new(store))
            }
            Self::Memory { capacity } => Ok(capacity.map_or_else(
                || Arc::new(MemoryBackingStore::new()) as Arc<dyn BackingStore>,
                |capacity| Arc::new(MemoryBackingStore::with_capacity(capacity)),
            )),
        }
    }
}
