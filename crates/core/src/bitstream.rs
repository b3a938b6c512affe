//! Bitstream records and internal id allocation.

use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::Result;
use crate::hash::Digest;
use crate::layout;

/// Allocate a fresh internal id: 32 lowercase hex chars from a v4 UUID.
///
/// Fresh allocation per upload is what makes concurrent `store` calls
/// contention-free.
pub fn allocate_internal_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// The in-memory description of a stored bitstream.
///
/// Identity is `(store_id, internal_id)`. Size and checksum are derived
/// from the bytes actually written or read, never accepted from a caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitstreamRecord {
    /// Asset store currently holding the bytes.
    pub store_id: u32,
    /// Store-scoped internal id.
    pub internal_id: String,
    /// Size in bytes, as counted while writing or reading.
    pub size_bytes: u64,
    /// Digest of the content, computed while streaming.
    pub checksum: Digest,
    /// Soft-delete flag. Bytes stay on disk until cleanup reclaims them.
    pub deleted: bool,
    /// When the record was soft-deleted; `None` while active.
    pub deleted_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    /// For bitstreams adopted via `register`: the store-relative path the
    /// bytes already lived at. `None` for content-addressed bitstreams.
    pub registered_path: Option<String>,
}

impl BitstreamRecord {
    /// The store-relative path where this record's bytes live: the
    /// registered source path for adopted files, the content-addressed
    /// layout path otherwise.
    pub fn relative_path(&self) -> Result<String> {
        match &self.registered_path {
            Some(path) => Ok(path.clone()),
            None => layout::path_for(&self.internal_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ChecksumAlgorithm;

    fn record(registered_path: Option<String>) -> BitstreamRecord {
        BitstreamRecord {
            store_id: 1,
            internal_id: allocate_internal_id(),
            size_bytes: 4,
            checksum: Digest::compute(ChecksumAlgorithm::Sha256, b"data"),
            deleted: false,
            deleted_at: None,
            created_at: OffsetDateTime::now_utc(),
            registered_path,
        }
    }

    #[test]
    fn test_relative_path_uses_layout() {
        let r = record(None);
        let path = r.relative_path().unwrap();
        assert!(path.ends_with(&r.internal_id));
        assert_eq!(path, layout::path_for(&r.internal_id).unwrap());
    }

    #[test]
    fn test_relative_path_prefers_registered_source() {
        let r = record(Some("imports/batch1/thesis.pdf".to_string()));
        assert_eq!(r.relative_path().unwrap(), "imports/batch1/thesis.pdf");
    }
}
