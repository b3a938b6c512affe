//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

use crate::hash::ChecksumAlgorithm;
use crate::{DEFAULT_BATCH_SIZE, DEFAULT_LEASE_TTL_SECS, DEFAULT_RETENTION_HOURS};

/// A single configured asset store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Numeric store id, referenced by bitstream rows.
    pub id: u32,
    /// Base directory of the store.
    pub path: PathBuf,
    /// Read-only stores can be migration sources but never destinations
    /// or new-write targets.
    #[serde(default)]
    pub read_only: bool,
}

/// Engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path of the SQLite metadata database.
    pub metadata_path: PathBuf,
    /// The configured asset stores.
    pub stores: Vec<StoreConfig>,
    /// Store id that receives new writes.
    pub incoming: u32,
    /// Hours a soft-deleted bitstream is retained before cleanup may
    /// reclaim its bytes.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    /// Batch size for cleanup sweeps.
    #[serde(default = "default_batch_size")]
    pub cleanup_batch_size: u32,
    /// Default batch size for migration runs.
    #[serde(default = "default_batch_size")]
    pub migration_batch_size: u32,
    /// Checksum algorithm for newly stored bitstreams.
    #[serde(default)]
    pub checksum_algorithm: ChecksumAlgorithm,
    /// Advisory lease duration for singleton jobs; a crashed worker's
    /// lease expires after this long.
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
    /// Hours a metadata-less file must sit in a store before the orphan
    /// sweep will remove it.
    #[serde(default = "default_orphan_grace_hours")]
    pub orphan_grace_hours: u64,
}

fn default_retention_hours() -> u64 {
    DEFAULT_RETENTION_HOURS
}

fn default_batch_size() -> u32 {
    DEFAULT_BATCH_SIZE
}

fn default_lease_ttl_secs() -> u64 {
    DEFAULT_LEASE_TTL_SECS
}

fn default_orphan_grace_hours() -> u64 {
    24
}

impl EngineConfig {
    /// Validate cross-field invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.stores.is_empty() {
            return Err("at least one asset store must be configured".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for store in &self.stores {
            if !seen.insert(store.id) {
                return Err(format!("duplicate store id: {}", store.id));
            }
        }
        let incoming = self
            .stores
            .iter()
            .find(|s| s.id == self.incoming)
            .ok_or_else(|| format!("incoming store {} is not configured", self.incoming))?;
        if incoming.read_only {
            return Err(format!(
                "incoming store {} is read-only and cannot accept new writes",
                self.incoming
            ));
        }
        if self.cleanup_batch_size == 0 || self.migration_batch_size == 0 {
            return Err("batch sizes must be nonzero".to_string());
        }
        Ok(())
    }

    pub fn retention(&self) -> Duration {
        Duration::hours(self.retention_hours as i64)
    }

    pub fn orphan_grace(&self) -> Duration {
        Duration::hours(self.orphan_grace_hours as i64)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::seconds(self.lease_ttl_secs as i64)
    }
}
