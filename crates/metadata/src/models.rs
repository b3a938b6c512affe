//! Database models mapping to the metadata schema.

use depot_core::{BitstreamRecord, ChecksumAlgorithm, Digest};
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::error::{MetadataError, MetadataResult};

/// Bitstream record row. Identity is `(store_id, internal_id)`.
#[derive(Debug, Clone, FromRow)]
pub struct BitstreamRow {
    pub store_id: i64,
    pub internal_id: String,
    pub size_bytes: i64,
    /// Lowercase hex digest of the content.
    pub checksum: String,
    pub checksum_algorithm: String,
    pub deleted: bool,
    pub deleted_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    /// Source path for bitstreams adopted via register; NULL otherwise.
    pub registered_path: Option<String>,
    /// Set once cleanup has removed the bytes but kept the row as a
    /// tombstone, so later sweeps skip it.
    pub bytes_removed: bool,
}

impl BitstreamRow {
    /// Build a row from an in-memory record.
    pub fn from_record(record: &BitstreamRecord) -> Self {
        Self {
            store_id: record.store_id as i64,
            internal_id: record.internal_id.clone(),
            size_bytes: record.size_bytes as i64,
            checksum: record.checksum.to_hex(),
            checksum_algorithm: record.checksum.algorithm().as_str().to_string(),
            deleted: record.deleted,
            deleted_at: record.deleted_at,
            created_at: record.created_at,
            registered_path: record.registered_path.clone(),
            bytes_removed: false,
        }
    }

    /// Convert back into the in-memory record, re-validating the stored
    /// checksum fields.
    pub fn into_record(self) -> MetadataResult<BitstreamRecord> {
        let algorithm = ChecksumAlgorithm::parse(&self.checksum_algorithm)
            .map_err(|e| MetadataError::InvalidRow(e.to_string()))?;
        let checksum = Digest::from_hex(algorithm, &self.checksum)
            .map_err(|e| MetadataError::InvalidRow(e.to_string()))?;
        Ok(BitstreamRecord {
            store_id: self.store_id as u32,
            internal_id: self.internal_id,
            size_bytes: self.size_bytes as u64,
            checksum,
            deleted: self.deleted,
            deleted_at: self.deleted_at,
            created_at: self.created_at,
            registered_path: self.registered_path,
        })
    }
}

/// Advisory lease row for singleton background jobs.
#[derive(Debug, Clone, FromRow)]
pub struct JobLeaseRow {
    pub job_name: String,
    pub ticket: String,
    pub acquired_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

/// Per-store record counts, for diagnostics.
#[derive(Debug, Clone, FromRow)]
pub struct StoreCounts {
    pub store_id: i64,
    pub active: i64,
    pub soft_deleted: i64,
}
