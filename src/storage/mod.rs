//! Counter Storage
//!
//! Time-bucketed counter accumulation behind the [`CounterStore`] trait.
//! The service opens exactly one store at startup and hands the same
//! `Arc<dyn CounterStore>` to the ingestion sink and the classifier.

mod counter_store;
mod memory;
mod sled_store;

pub use counter_store::{bucket_start, CounterIter, CounterStore, StoreError};
pub use memory::InMemoryCounterStore;
pub use sled_store::SledCounterStore;

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{StoreBackend, StoreConfig};

/// Open the backend selected by `config`.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn CounterStore>, StoreError> {
    let store: Arc<dyn CounterStore> = match config.backend {
        StoreBackend::Sled => Arc::new(SledCounterStore::open(&config.path, config.interval_ms)?),
        StoreBackend::Memory => {
            warn!("Using in-memory counter store, counters are lost on restart");
            Arc::new(InMemoryCounterStore::new(config.interval_ms)?)
        }
    };
    info!(
        backend = store.backend_name(),
        interval_ms = store.interval_ms(),
        "Counter store ready"
    );
    Ok(store)
}

/// Wipe a sled data directory so the next open starts empty.
///
/// A missing directory is not an error.
pub fn reset_data_directory(path: &Path) -> std::io::Result<()> {
    if path.exists() {
        std::fs::remove_dir_all(path)?;
        warn!(path = %path.display(), "Counter data directory wiped");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventKind;

    #[test]
    fn test_open_memory_backend() {
        let config = StoreConfig {
            backend: StoreBackend::Memory,
            interval_ms: 1_000,
            ..StoreConfig::default()
        };
        let store = open_store(&config).unwrap();
        assert_eq!(store.backend_name(), "memory");
        assert_eq!(store.interval_ms(), 1_000);
    }

    #[test]
    fn test_open_sled_backend_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counters");
        let config = StoreConfig {
            backend: StoreBackend::Sled,
            path: path.clone(),
            interval_ms: 1_000,
        };

        {
            let store = open_store(&config).unwrap();
            assert_eq!(store.backend_name(), "sled");
            store.increment("seg", 5, 10, EventKind::Vehicle).unwrap();
            store.flush().unwrap();
        }

        reset_data_directory(&path).unwrap();
        assert!(!path.exists());
        reset_data_directory(&path).unwrap();

        let store = open_store(&config).unwrap();
        assert_eq!(store.read("seg", 0, 100, EventKind::Vehicle).unwrap().count(), 0);
    }

    #[test]
    fn test_open_rejects_bad_interval() {
        let config = StoreConfig {
            backend: StoreBackend::Memory,
            interval_ms: 0,
            ..StoreConfig::default()
        };
        assert!(matches!(
            open_store(&config),
            Err(StoreError::InvalidInterval(0))
        ));
    }
}
