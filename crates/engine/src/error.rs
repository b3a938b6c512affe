//! Engine error taxonomy.
//!
//! A small closed set of tagged error kinds, switched on by callers.
//! Single-item operations surface these directly; batch jobs isolate
//! per-item failures into their summaries instead.

use depot_metadata::MetadataError;
use depot_storage::StorageError;
use thiserror::Error;

/// Engine operation errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The record is missing, soft-deleted, or its bytes are gone.
    #[error("bitstream not found in store {store_id}: {key}")]
    NotFound { store_id: u32, key: String },

    /// Bytes read back do not match the recorded digest. Indicates
    /// silent corruption; never swallowed.
    #[error("checksum mismatch for {key}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    /// A singleton job's lease is held by another live worker.
    #[error("job '{0}' is already running")]
    JobAlreadyRunning(String),

    #[error(transparent)]
    Core(#[from] depot_core::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
