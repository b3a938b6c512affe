//! Reclamation of soft-deleted bitstreams and orphaned files.
//!
//! The retention sweep physically removes bytes for records soft-deleted
//! longer ago than the retention window. Each item gets its own short
//! transaction, so a crash mid-sweep leaves a consistent state: the next
//! run finds the same predicate still true for unprocessed items.
//!
//! The orphan sweep is the reconciliation pass for the engine's one
//! tolerated failure mode: bytes published in a store whose metadata
//! commit never happened.

use depot_core::layout;
use depot_metadata::{SqliteStore, bitstreams, leases};
use depot_storage::AssetStoreRegistry;
use depot_storage::backends::filesystem::TEMP_MARKER;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{EngineError, EngineResult};

/// Guard against a sweep that never converges.
const MAX_SWEEP_ITERATIONS: u32 = 10_000;

/// Options for a retention sweep. The sweep retries nothing in-process;
/// failed items stay eligible and are picked up by the next run.
#[derive(Debug, Clone)]
pub struct CleanupOptions {
    /// Also remove the metadata row; otherwise it is kept permanently as
    /// a tombstone with the bytes gone.
    pub delete_db_rows: bool,
    pub verbose: bool,
    /// How long a record must have been soft-deleted before its bytes
    /// may be reclaimed.
    pub retention: Duration,
    pub batch_size: u32,
    pub lease_ttl: Duration,
}

/// Outcome of a retention sweep.
#[derive(Debug, Default)]
pub struct SweepSummary {
    /// Eligible records examined.
    pub scanned: u64,
    /// Records whose bytes were reclaimed (or already gone).
    pub reclaimed: u64,
    pub rows_removed: u64,
    pub tombstoned: u64,
    pub bytes_reclaimed: u64,
    /// Items that failed; they stay eligible for the next run.
    pub failed: Vec<(u32, String)>,
    pub cancelled: bool,
}

/// Options for the orphan reconciliation sweep.
#[derive(Debug, Clone)]
pub struct OrphanSweepOptions {
    pub store_id: u32,
    /// Files younger than this are left alone: they may belong to a
    /// transaction that has not committed yet.
    pub grace: Duration,
    pub dry_run: bool,
    pub lease_ttl: Duration,
}

/// Outcome of an orphan sweep.
#[derive(Debug, Default)]
pub struct OrphanSweepSummary {
    pub scanned: u64,
    pub orphans: u64,
    pub removed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub cancelled: bool,
}

/// The cleanup job. Singleton system-wide via an advisory lease.
pub struct CleanupSweep {
    db: Arc<SqliteStore>,
    registry: Arc<AssetStoreRegistry>,
}

impl CleanupSweep {
    pub fn new(db: Arc<SqliteStore>, registry: Arc<AssetStoreRegistry>) -> Self {
        Self { db, registry }
    }

    async fn acquire_lease(&self, name: &str, ttl: Duration) -> EngineResult<String> {
        let mut conn = self.db.conn().await?;
        leases::acquire(&mut conn, name, ttl)
            .await?
            .ok_or_else(|| EngineError::JobAlreadyRunning(name.to_string()))
    }

    async fn release_lease(&self, name: &str, ticket: &str) -> EngineResult<()> {
        let mut conn = self.db.conn().await?;
        leases::release(&mut conn, name, ticket).await?;
        Ok(())
    }

    /// Run a retention sweep. Per-item failures are logged and counted
    /// but never abort the sweep; only setup failures (lease refusal,
    /// unreachable metadata store) error out.
    pub async fn run(
        &self,
        opts: &CleanupOptions,
        cancel: &CancellationToken,
    ) -> EngineResult<SweepSummary> {
        let ticket = self.acquire_lease("cleanup", opts.lease_ttl).await?;

        let cutoff = OffsetDateTime::now_utc() - opts.retention;
        let mut summary = SweepSummary::default();
        let mut failed_ids: HashSet<(i64, String)> = HashSet::new();

        let mut iterations = 0u32;
        'sweep: loop {
            iterations += 1;
            if iterations > MAX_SWEEP_ITERATIONS {
                warn!(iterations, "cleanup exceeded max iterations, stopping");
                break;
            }

            // Connections are scoped per query: each item's delete runs
            // in its own short transaction below, and SQLite gives us
            // one connection at a time. The fetch window widens by the
            // failed count so failed items cannot starve the rest.
            let limit = opts.batch_size.saturating_add(failed_ids.len() as u32);
            let batch = {
                let mut conn = self.db.conn().await?;
                bitstreams::reclaimable(&mut conn, cutoff, limit).await?
            };
            let batch: Vec<_> = batch
                .into_iter()
                .filter(|row| !failed_ids.contains(&(row.store_id, row.internal_id.clone())))
                .collect();
            if batch.is_empty() {
                break;
            }

            for row in batch {
                // Cancellation is checked between items, never mid-item,
                // so an interrupted run leaves no half-deleted item.
                if cancel.is_cancelled() {
                    summary.cancelled = true;
                    break 'sweep;
                }
                summary.scanned += 1;

                match self.reclaim_item(&row, opts.delete_db_rows).await {
                    Ok(bytes) => {
                        summary.reclaimed += 1;
                        summary.bytes_reclaimed += bytes;
                        if opts.delete_db_rows {
                            summary.rows_removed += 1;
                        } else {
                            summary.tombstoned += 1;
                        }
                        if opts.verbose {
                            info!(
                                store_id = row.store_id,
                                internal_id = %row.internal_id,
                                bytes,
                                "reclaimed bitstream"
                            );
                        }
                    }
                    Err(e) => {
                        error!(
                            store_id = row.store_id,
                            internal_id = %row.internal_id,
                            error = %e,
                            "failed to reclaim bitstream, continuing"
                        );
                        failed_ids.insert((row.store_id, row.internal_id.clone()));
                        summary
                            .failed
                            .push((row.store_id as u32, row.internal_id));
                    }
                }
            }
        }

        self.release_lease("cleanup", &ticket).await?;
        Ok(summary)
    }

    /// Reclaim one record: remove the bytes, then remove or tombstone
    /// the row in a short transaction of its own. A file that is already
    /// gone still completes the item (the row is settled either way).
    async fn reclaim_item(
        &self,
        row: &depot_metadata::BitstreamRow,
        delete_db_rows: bool,
    ) -> EngineResult<u64> {
        let store_id = row.store_id as u32;
        let handle = self.registry.resolve(store_id)?;
        let key = match &row.registered_path {
            Some(path) => path.clone(),
            None => layout::path_for(&row.internal_id)?,
        };

        let bytes = match handle.store().delete(&key).await {
            Ok(()) => row.size_bytes as u64,
            Err(depot_storage::StorageError::NotFound(_)) => 0,
            Err(e) => return Err(e.into()),
        };

        let mut tx = self.db.begin().await?;
        if delete_db_rows {
            bitstreams::delete_row(&mut tx, store_id, &row.internal_id).await?;
        } else {
            bitstreams::mark_bytes_removed(&mut tx, store_id, &row.internal_id).await?;
        }
        tx.commit().await.map_err(depot_metadata::MetadataError::from)?;

        Ok(bytes)
    }

    /// Reconciliation sweep: remove files in a store that no metadata
    /// row references. Skips in-flight temp files, registered paths, and
    /// anything younger than the grace window.
    pub async fn run_orphan_sweep(
        &self,
        opts: &OrphanSweepOptions,
        cancel: &CancellationToken,
    ) -> EngineResult<OrphanSweepSummary> {
        let handle = self.registry.resolve(opts.store_id)?;
        let ticket = self.acquire_lease("orphan-sweep", opts.lease_ttl).await?;

        let age_cutoff = OffsetDateTime::now_utc() - opts.grace;
        let mut summary = OrphanSweepSummary::default();
        let mut keys = handle.store().list_stream("").await?;
        let mut conn = self.db.conn().await?;

        while let Some(key) = keys.next().await {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let key = key?;
            summary.scanned += 1;

            if key.contains(TEMP_MARKER) {
                summary.skipped += 1;
                continue;
            }

            // A file is referenced if its filename maps back to a row in
            // this store, or if some row registered this exact path.
            if let Some(internal_id) = layout::internal_id_for(&key) {
                if bitstreams::get(&mut conn, opts.store_id, internal_id)
                    .await?
                    .is_some()
                {
                    continue;
                }
            }
            if bitstreams::find_registered(&mut conn, opts.store_id, &key)
                .await?
                .is_some()
            {
                continue;
            }

            // Unreferenced. Leave young files alone: their transaction
            // may not have committed yet.
            let meta = match handle.store().head(&key).await {
                Ok(meta) => meta,
                Err(depot_storage::StorageError::NotFound(_)) => continue,
                Err(e) => {
                    warn!(key = %key, error = %e, "failed to stat candidate orphan");
                    summary.failed += 1;
                    continue;
                }
            };
            match meta.modified {
                Some(modified) if modified <= age_cutoff => {}
                _ => {
                    summary.skipped += 1;
                    continue;
                }
            }

            summary.orphans += 1;
            if opts.dry_run {
                info!(store_id = opts.store_id, key = %key, "orphan (dry run)");
                continue;
            }
            match handle.store().delete(&key).await {
                Ok(()) | Err(depot_storage::StorageError::NotFound(_)) => {
                    summary.removed += 1;
                    info!(store_id = opts.store_id, key = %key, "removed orphan");
                }
                Err(e) => {
                    error!(key = %key, error = %e, "failed to remove orphan");
                    summary.failed += 1;
                }
            }
        }
        drop(conn);

        self.release_lease("orphan-sweep", &ticket).await?;
        Ok(summary)
    }
}
