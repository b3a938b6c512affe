//! The bitstream storage service facade.
//!
//! Every operation that touches metadata takes a `&mut SqliteConnection`
//! supplied by the caller: the engine's row writes land inside the
//! caller's transaction, and the caller commits. The engine's own
//! contract is "bytes are durable": bytes are always published
//! atomically in the store before the referencing row is written, so a
//! failed byte-write leaves no metadata, and a failed commit leaves at
//! worst an orphaned file for the orphan sweep to reclaim.

use bytes::Bytes;
use depot_core::{
    BitstreamRecord, ChecksumAlgorithm, Digest, allocate_internal_id, layout,
};
use depot_metadata::{BitstreamRow, MetadataError, bitstreams};
use depot_storage::{
    AssetStoreRegistry, ByteStream, StorageError, StoreHandle, StreamingUpload,
};
use futures::StreamExt;
use sqlx::SqliteConnection;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, instrument};

use crate::error::{EngineError, EngineResult};

/// Diagnostic counts for one configured store.
#[derive(Debug, Clone)]
pub struct StoreReport {
    pub store_id: u32,
    pub read_only: bool,
    pub backend: &'static str,
    pub active: u64,
    pub soft_deleted: u64,
}

/// Facade over the asset stores and the metadata coordinator.
pub struct BitstreamService {
    registry: Arc<AssetStoreRegistry>,
    algorithm: ChecksumAlgorithm,
}

impl BitstreamService {
    pub fn new(registry: Arc<AssetStoreRegistry>, algorithm: ChecksumAlgorithm) -> Self {
        Self {
            registry,
            algorithm,
        }
    }

    pub fn registry(&self) -> &AssetStoreRegistry {
        &self.registry
    }

    /// Store a new bitstream from a byte stream.
    ///
    /// Allocates a fresh internal id in the incoming store, streams the
    /// bytes through the digest hasher into a temp file, publishes them
    /// atomically at the content-addressed path, and only then inserts
    /// the row into the caller's transaction.
    #[instrument(skip(self, conn, stream))]
    pub async fn store(
        &self,
        conn: &mut SqliteConnection,
        stream: ByteStream,
    ) -> EngineResult<BitstreamRecord> {
        let handle = self
            .registry
            .resolve_writable(self.registry.incoming_id())?;
        let internal_id = allocate_internal_id();
        let key = layout::path_for(&internal_id)?;

        let upload = handle.store().put_stream(&key).await?;
        let (checksum, size_bytes) = copy_hashed(stream, upload, self.algorithm).await?;

        let record = BitstreamRecord {
            store_id: handle.id,
            internal_id,
            size_bytes,
            checksum,
            deleted: false,
            deleted_at: None,
            created_at: OffsetDateTime::now_utc(),
            registered_path: None,
        };
        bitstreams::insert(conn, &BitstreamRow::from_record(&record)).await?;

        debug!(
            store_id = record.store_id,
            internal_id = %record.internal_id,
            size_bytes,
            "stored bitstream"
        );
        Ok(record)
    }

    /// Adopt a file already present in a store without copying it.
    ///
    /// Reads the file once to derive size and checksum. Idempotent per
    /// `(store_id, relative_path)`: re-registering returns the existing
    /// record. Registration writes nothing into the store itself, so
    /// read-only stores are valid targets.
    #[instrument(skip(self, conn))]
    pub async fn register(
        &self,
        conn: &mut SqliteConnection,
        store_id: u32,
        relative_path: &str,
    ) -> EngineResult<BitstreamRecord> {
        let handle = self.registry.resolve(store_id)?;

        if let Some(existing) = bitstreams::find_registered(conn, store_id, relative_path).await? {
            if existing.deleted {
                return Err(EngineError::Metadata(MetadataError::AlreadyExists(format!(
                    "path {relative_path} in store {store_id} is soft-deleted and pending cleanup"
                ))));
            }
            return Ok(existing.into_record()?);
        }

        let stream = open_mapped(handle, relative_path).await?;
        let (checksum, size_bytes) = hash_stream(stream, self.algorithm).await?;

        let record = BitstreamRecord {
            store_id,
            internal_id: allocate_internal_id(),
            size_bytes,
            checksum,
            deleted: false,
            deleted_at: None,
            created_at: OffsetDateTime::now_utc(),
            registered_path: Some(relative_path.to_string()),
        };
        bitstreams::insert(conn, &BitstreamRow::from_record(&record)).await?;
        Ok(record)
    }

    /// Open a bitstream's bytes as a stream.
    ///
    /// The stream is a scoped resource: dropping it releases the file
    /// handle, which is also how a caller cancels early.
    #[instrument(skip(self, record), fields(internal_id = %record.internal_id))]
    pub async fn retrieve(&self, record: &BitstreamRecord) -> EngineResult<ByteStream> {
        if record.deleted {
            return Err(EngineError::NotFound {
                store_id: record.store_id,
                key: record.internal_id.clone(),
            });
        }
        let handle = self.registry.resolve(record.store_id)?;
        let key = record.relative_path()?;
        open_mapped(handle, &key).await
    }

    /// Soft-delete: set the flag and timestamp in the caller's
    /// transaction. Bytes stay on disk until cleanup reclaims them.
    /// Idempotent: deleting an already-deleted record is a no-op.
    #[instrument(skip(self, conn, record), fields(internal_id = %record.internal_id))]
    pub async fn delete(
        &self,
        conn: &mut SqliteConnection,
        record: &BitstreamRecord,
    ) -> EngineResult<()> {
        bitstreams::mark_deleted(
            conn,
            record.store_id,
            &record.internal_id,
            OffsetDateTime::now_utc(),
        )
        .await?;
        Ok(())
    }

    /// Re-read the bytes and recompute the digest, using the algorithm
    /// the record was stored with. Does not compare; that is the
    /// caller's business.
    #[instrument(skip(self, record), fields(internal_id = %record.internal_id))]
    pub async fn compute_checksum(&self, record: &BitstreamRecord) -> EngineResult<Digest> {
        let handle = self.registry.resolve(record.store_id)?;
        let key = record.relative_path()?;
        let stream = open_mapped(handle, &key).await?;
        let (digest, _) = hash_stream(stream, record.checksum.algorithm()).await?;
        Ok(digest)
    }

    /// Copy a bitstream to a fresh internal id in the same store. The
    /// copy is verified against the source record's checksum before the
    /// new row is written; the two records have independent lifecycles
    /// afterwards.
    #[instrument(skip(self, conn, record), fields(internal_id = %record.internal_id))]
    pub async fn clone_bitstream(
        &self,
        conn: &mut SqliteConnection,
        record: &BitstreamRecord,
    ) -> EngineResult<BitstreamRecord> {
        if record.deleted {
            return Err(EngineError::NotFound {
                store_id: record.store_id,
                key: record.internal_id.clone(),
            });
        }
        let handle = self.registry.resolve_writable(record.store_id)?;

        let internal_id = allocate_internal_id();
        let dest_key = layout::path_for(&internal_id)?;
        let source = open_mapped(handle, &record.relative_path()?).await?;
        let upload = handle.store().put_stream(&dest_key).await?;
        let (checksum, size_bytes) =
            copy_hashed(source, upload, record.checksum.algorithm()).await?;

        if checksum != record.checksum {
            // The source bytes no longer match their recorded digest;
            // discard the copy and surface the corruption.
            let _ = handle.store().delete(&dest_key).await;
            return Err(EngineError::ChecksumMismatch {
                key: record.internal_id.clone(),
                expected: record.checksum.to_hex(),
                actual: checksum.to_hex(),
            });
        }

        let clone = BitstreamRecord {
            store_id: handle.id,
            internal_id,
            size_bytes,
            checksum,
            deleted: false,
            deleted_at: None,
            created_at: OffsetDateTime::now_utc(),
            registered_path: None,
        };
        bitstreams::insert(conn, &BitstreamRow::from_record(&clone)).await?;
        Ok(clone)
    }

    /// Per-store diagnostic counts, covering every configured store even
    /// when it holds no rows.
    pub async fn store_counts(
        &self,
        conn: &mut SqliteConnection,
    ) -> EngineResult<Vec<StoreReport>> {
        let counts = bitstreams::store_counts(conn).await?;
        let mut reports = Vec::new();
        for id in self.registry.ids() {
            let handle = self.registry.resolve(id)?;
            let row = counts.iter().find(|c| c.store_id == id as i64);
            reports.push(StoreReport {
                store_id: id,
                read_only: handle.read_only,
                backend: handle.store().backend_name(),
                active: row.map(|c| c.active as u64).unwrap_or(0),
                soft_deleted: row.map(|c| c.soft_deleted as u64).unwrap_or(0),
            });
        }
        Ok(reports)
    }
}

/// Open a key in a store, mapping storage `NotFound` to the engine's
/// record-level `NotFound`.
async fn open_mapped(handle: &StoreHandle, key: &str) -> EngineResult<ByteStream> {
    handle.store().open(key).await.map_err(|e| match e {
        StorageError::NotFound(_) => EngineError::NotFound {
            store_id: handle.id,
            key: key.to_string(),
        },
        other => EngineError::Storage(other),
    })
}

/// Drain a byte stream into an upload while hashing it in one pass.
/// Aborts the upload (discarding the temp file) if the stream or a write
/// fails; finishing publishes atomically.
pub(crate) async fn copy_hashed(
    mut stream: ByteStream,
    mut upload: Box<dyn StreamingUpload>,
    algorithm: ChecksumAlgorithm,
) -> EngineResult<(Digest, u64)> {
    let mut hasher = algorithm.hasher();
    while let Some(chunk) = stream.next().await {
        let chunk: Bytes = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = upload.abort().await;
                return Err(e.into());
            }
        };
        hasher.update(&chunk);
        if let Err(e) = upload.write(chunk).await {
            let _ = upload.abort().await;
            return Err(e.into());
        }
    }
    let size = upload.finish().await?;
    Ok((hasher.finalize(), size))
}

/// Consume a byte stream, returning its digest and length.
pub(crate) async fn hash_stream(
    mut stream: ByteStream,
    algorithm: ChecksumAlgorithm,
) -> EngineResult<(Digest, u64)> {
    let mut hasher = algorithm.hasher();
    let mut size = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        hasher.update(&chunk);
        size += chunk.len() as u64;
    }
    Ok((hasher.finalize(), size))
}
