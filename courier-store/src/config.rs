use std::sync::Arc;

use serde::Deserialize;

use crate::{FileRecordStore, MemoryRecordStore, RecordStore};

/// Which record store backs the queue
///
/// File-backed store in RON config:
/// ```ron
/// Courier (
///     store: File((
///         path: "/var/spool/courier",
///     )),
/// )
/// ```
///
/// Memory-backed store, optionally bounded:
/// ```ron
/// Courier (
///     store: Memory((
///         capacity: Some(1000),
///     )),
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub enum StoreConfig {
    File(FileRecordStore),
    Memory(MemoryConfig),
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MemoryConfig {
    #[serde(default)]
    pub capacity: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::File(FileRecordStore::default())
    }
}

impl StoreConfig {
    /// Build and initialise the configured store
    ///
    /// # Errors
    /// Returns an error if a file-backed store cannot prepare its directory
    pub async fn into_record_store(self) -> crate::Result<Arc<dyn RecordStore>> {
        match self {
            Self::File(store) => {
                store.init().await?;
                Ok(Arc::new(store))
            }
            Self::Memory(config) => Ok(config.capacity.map_or_else(
                || Arc::new(MemoryRecordStore::new()) as Arc<dyn RecordStore>,
                |capacity| Arc::new(MemoryRecordStore::with_capacity(capacity)),
            )),
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_store_config() {
        let config: StoreConfig =
            ron::from_str(r#"File((path: "/var/spool/courier"))"#).expect("file config");
        assert!(
            matches!(config, StoreConfig::File(store) if store.path() == std::path::Path::new("/var/spool/courier"))
        );

        let config: StoreConfig = ron::from_str("Memory((capacity: Some(10)))").expect("memory");
        assert!(matches!(
            config,
            StoreConfig::Memory(MemoryConfig { capacity: Some(10) })
        ));
    }

    #[tokio::test]
    async fn test_memory_config_builds_store() {
        let store = StoreConfig::Memory(MemoryConfig::default())
            .into_record_store()
            .await
            .expect("store");
        assert_eq!(
            store
                .count(&crate::RecordFilter::new())
                .await
                .expect("count"),
            0
        );
    }
}
