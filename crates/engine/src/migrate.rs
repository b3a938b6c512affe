//! Bulk, batched, resumable migration of bitstreams between stores.
//!
//! Records are walked in internal-id order so a killed run resumes
//! naturally: rows already moved no longer match the source predicate.
//! Copies are verified against the recorded checksum before the store
//! pointer flips, and the flip for a whole batch commits in one
//! transaction, bounding transaction size and giving the resume point.
//! Migration never removes source bytes inline: with `delete_old` it
//! soft-deletes them for a later cleanup, after the new copy has proven
//! itself.

use depot_core::layout;
use depot_metadata::{BitstreamRow, SqliteStore, bitstreams, leases};
use depot_storage::{AssetStoreRegistry, StorageError, StoreHandle};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::service::copy_hashed;

/// In-process retries for transient I/O failures on a single item.
const COPY_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub source: u32,
    pub dest: u32,
    /// Soft-delete the source-side bytes so cleanup reclaims them later.
    pub delete_old: bool,
    pub batch_size: u32,
    /// Report what would move without copying or committing anything.
    pub dry_run: bool,
    pub lease_ttl: Duration,
}

/// Outcome of a migration run.
#[derive(Debug, Default)]
pub struct MigrationSummary {
    pub succeeded: u64,
    /// Records whose source bytes were already missing; their rows are
    /// left in place for an operator to inspect.
    pub skipped: u64,
    /// Internal ids that failed irrecoverably; they remain in the source
    /// store for a retry run.
    pub failed: Vec<String>,
    pub cancelled: bool,
}

/// Worker-internal resumption state, advanced after each batch.
struct MigrationCursor {
    last_internal_id: Option<String>,
}

/// What happened to a single record's bytes.
enum CopyOutcome {
    Copied,
    SourceMissing,
}

/// The migration job. Singleton system-wide via an advisory lease.
pub struct MigrationWorker {
    db: Arc<SqliteStore>,
    registry: Arc<AssetStoreRegistry>,
}

impl MigrationWorker {
    pub fn new(db: Arc<SqliteStore>, registry: Arc<AssetStoreRegistry>) -> Self {
        Self { db, registry }
    }

    /// Run a migration. Setup failures (unknown stores, read-only
    /// destination, lease refusal) abort the run; per-item failures are
    /// counted and the run continues.
    pub async fn run(
        &self,
        opts: &MigrationOptions,
        cancel: &CancellationToken,
    ) -> EngineResult<MigrationSummary> {
        if opts.source == opts.dest {
            return Err(EngineError::Storage(StorageError::Config(
                "source and destination are the same store".to_string(),
            )));
        }
        let source = self.registry.resolve(opts.source)?;
        let dest = self.registry.resolve_writable(opts.dest)?;

        let ticket = {
            let mut conn = self.db.conn().await?;
            leases::acquire(&mut conn, "migrate", opts.lease_ttl)
                .await?
                .ok_or_else(|| EngineError::JobAlreadyRunning("migrate".to_string()))?
        };

        let mut summary = MigrationSummary::default();
        let mut cursor = MigrationCursor {
            last_internal_id: None,
        };

        'run: loop {
            let batch = {
                let mut conn = self.db.conn().await?;
                bitstreams::active_in_store(
                    &mut conn,
                    opts.source,
                    cursor.last_internal_id.as_deref(),
                    opts.batch_size,
                )
                .await?
            };
            if batch.is_empty() {
                break;
            }
            cursor.last_internal_id = Some(batch[batch.len() - 1].internal_id.clone());

            let mut moved: Vec<BitstreamRow> = Vec::with_capacity(batch.len());
            for row in batch {
                if cancel.is_cancelled() {
                    summary.cancelled = true;
                    break 'run;
                }
                if opts.dry_run {
                    summary.succeeded += 1;
                    continue;
                }
                match self.copy_item(source, dest, &row).await {
                    Ok(CopyOutcome::Copied) => moved.push(row),
                    Ok(CopyOutcome::SourceMissing) => {
                        warn!(
                            internal_id = %row.internal_id,
                            source = opts.source,
                            "source bytes missing, skipping record"
                        );
                        summary.skipped += 1;
                    }
                    Err(e) => {
                        error!(
                            internal_id = %row.internal_id,
                            source = opts.source,
                            dest = opts.dest,
                            error = %e,
                            "failed to migrate bitstream, continuing"
                        );
                        summary.failed.push(row.internal_id);
                    }
                }
            }

            if !moved.is_empty() {
                // One transaction per batch: every verified copy's store
                // pointer flips together, and the source-side tombstones
                // land with them.
                let now = OffsetDateTime::now_utc();
                let mut tx = self.db.begin().await?;
                for row in &moved {
                    bitstreams::update_store(&mut tx, opts.source, &row.internal_id, opts.dest)
                        .await?;
                    if opts.delete_old {
                        let mut tombstone = row.clone();
                        tombstone.deleted = true;
                        tombstone.deleted_at = Some(now);
                        bitstreams::insert(&mut tx, &tombstone).await?;
                    }
                }
                tx.commit()
                    .await
                    .map_err(depot_metadata::MetadataError::from)?;
                summary.succeeded += moved.len() as u64;
            }
        }

        {
            let mut conn = self.db.conn().await?;
            leases::release(&mut conn, "migrate", &ticket).await?;
        }
        info!(
            source = opts.source,
            dest = opts.dest,
            succeeded = summary.succeeded,
            failed = summary.failed.len(),
            skipped = summary.skipped,
            dry_run = opts.dry_run,
            "migration finished"
        );
        Ok(summary)
    }

    /// Copy one record's bytes to the destination and verify the copy
    /// against the recorded checksum. Transient I/O errors get a bounded
    /// number of retries; a checksum mismatch does not (the source is
    /// the problem, and it is left untouched).
    async fn copy_item(
        &self,
        source: &StoreHandle,
        dest: &StoreHandle,
        row: &BitstreamRow,
    ) -> EngineResult<CopyOutcome> {
        let source_key = match &row.registered_path {
            Some(path) => path.clone(),
            None => layout::path_for(&row.internal_id)?,
        };
        let dest_key = layout::path_for(&row.internal_id)?;
        let algorithm = depot_core::ChecksumAlgorithm::parse(&row.checksum_algorithm)?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = async {
                let stream = source.store().open(&source_key).await?;
                let upload = dest.store().put_stream(&dest_key).await?;
                copy_hashed(stream, upload, algorithm).await
            }
            .await;

            match result {
                Ok((digest, _size)) => {
                    if digest.to_hex() == row.checksum {
                        return Ok(CopyOutcome::Copied);
                    }
                    // Silent corruption: discard the bad copy, abort this
                    // item only.
                    let _ = dest.store().delete(&dest_key).await;
                    return Err(EngineError::ChecksumMismatch {
                        key: row.internal_id.clone(),
                        expected: row.checksum.clone(),
                        actual: digest.to_hex(),
                    });
                }
                Err(EngineError::Storage(StorageError::NotFound(_))) => {
                    return Ok(CopyOutcome::SourceMissing);
                }
                Err(e @ EngineError::Storage(StorageError::Io(_))) if attempt < COPY_RETRIES => {
                    warn!(
                        internal_id = %row.internal_id,
                        attempt,
                        error = %e,
                        "transient I/O error during copy, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}
