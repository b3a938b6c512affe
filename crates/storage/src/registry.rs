//! The configured set of asset stores.
//!
//! The registry is an immutable value constructed once at process start
//! and passed by handle to every component that needs it; there is no
//! global mutable store cache.

use crate::backends::filesystem::FilesystemStore;
use crate::error::{StorageError, StorageResult};
use crate::traits::AssetStore;
use depot_core::config::StoreConfig;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One configured store: backend plus its registry attributes.
#[derive(Clone)]
pub struct StoreHandle {
    pub id: u32,
    /// Read-only stores can serve reads and act as migration sources,
    /// but never accept new writes.
    pub read_only: bool,
    store: Arc<dyn AssetStore>,
}

impl StoreHandle {
    pub fn store(&self) -> &dyn AssetStore {
        self.store.as_ref()
    }
}

/// Immutable registry of all configured asset stores.
pub struct AssetStoreRegistry {
    stores: BTreeMap<u32, StoreHandle>,
    incoming: u32,
}

impl AssetStoreRegistry {
    /// Build the registry from configuration, creating store roots as
    /// needed. The incoming store must be configured and writable; the
    /// caller validates that via `EngineConfig::validate`.
    pub async fn from_config(configs: &[StoreConfig], incoming: u32) -> StorageResult<Self> {
        let mut stores = BTreeMap::new();
        for cfg in configs {
            let backend = FilesystemStore::new(&cfg.path).await?;
            stores.insert(
                cfg.id,
                StoreHandle {
                    id: cfg.id,
                    read_only: cfg.read_only,
                    store: Arc::new(backend),
                },
            );
        }
        if !stores.contains_key(&incoming) {
            return Err(StorageError::Config(format!(
                "incoming store {incoming} is not configured"
            )));
        }
        Ok(Self { stores, incoming })
    }

    /// Resolve a store id, failing if it is unknown.
    pub fn resolve(&self, store_id: u32) -> StorageResult<&StoreHandle> {
        self.stores
            .get(&store_id)
            .ok_or_else(|| StorageError::StoreUnavailable(format!("unknown store id {store_id}")))
    }

    /// Resolve a store id for writing, additionally refusing read-only
    /// stores.
    pub fn resolve_writable(&self, store_id: u32) -> StorageResult<&StoreHandle> {
        let handle = self.resolve(store_id)?;
        if handle.read_only {
            return Err(StorageError::ReadOnly(store_id));
        }
        Ok(handle)
    }

    /// The store id that receives new writes.
    pub fn incoming_id(&self) -> u32 {
        self.incoming
    }

    /// All configured store ids, ascending.
    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.stores.keys().copied()
    }

    /// Health-check every configured store, failing on the first one
    /// that is unreachable.
    pub async fn health_check_all(&self) -> StorageResult<()> {
        for handle in self.stores.values() {
            handle.store().health_check().await.map_err(|e| {
                StorageError::StoreUnavailable(format!("store {}: {e}", handle.id))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn configs(dir: &std::path::Path) -> Vec<StoreConfig> {
        vec![
            StoreConfig {
                id: 0,
                path: dir.join("store0"),
                read_only: false,
            },
            StoreConfig {
                id: 1,
                path: dir.join("store1"),
                read_only: true,
            },
        ]
    }

    #[tokio::test]
    async fn test_resolve_and_incoming() {
        let dir = tempfile::tempdir().unwrap();
        let registry = AssetStoreRegistry::from_config(&configs(dir.path()), 0)
            .await
            .unwrap();

        assert_eq!(registry.incoming_id(), 0);
        assert_eq!(registry.resolve(1).unwrap().id, 1);
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec![0, 1]);
        registry.health_check_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_store_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let registry = AssetStoreRegistry::from_config(&configs(dir.path()), 0)
            .await
            .unwrap();
        match registry.resolve(7) {
            Err(StorageError::StoreUnavailable(_)) => {}
            other => panic!("expected StoreUnavailable, got {:?}", other.map(|h| h.id)),
        }
    }

    #[tokio::test]
    async fn test_read_only_store_refuses_writes() {
        let dir = tempfile::tempdir().unwrap();
        let registry = AssetStoreRegistry::from_config(&configs(dir.path()), 0)
            .await
            .unwrap();
        assert!(registry.resolve(1).is_ok());
        match registry.resolve_writable(1) {
            Err(StorageError::ReadOnly(1)) => {}
            other => panic!("expected ReadOnly, got {:?}", other.map(|h| h.id)),
        }
    }

    #[tokio::test]
    async fn test_unknown_incoming_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cfgs = vec![StoreConfig {
            id: 3,
            path: PathBuf::from(dir.path().join("only")),
            read_only: false,
        }];
        assert!(AssetStoreRegistry::from_config(&cfgs, 0).await.is_err());
    }
}
