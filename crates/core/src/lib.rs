//! Core domain types and shared logic for the depot bitstream storage engine.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Checksum digests and incremental hashing
//! - The content-addressed fan-out layout inside an asset store
//! - Bitstream records and internal id allocation
//! - Engine configuration

pub mod bitstream;
pub mod config;
pub mod error;
pub mod hash;
pub mod layout;

pub use bitstream::{BitstreamRecord, allocate_internal_id};
pub use config::{EngineConfig, StoreConfig};
pub use error::{Error, Result};
pub use hash::{ChecksumAlgorithm, Digest, DigestHasher};
pub use layout::{INTERNAL_ID_LEN, path_for, validate_internal_id};

/// Default retention window before soft-deleted bytes may be reclaimed: 7 days.
pub const DEFAULT_RETENTION_HOURS: u64 = 7 * 24;

/// Default batch size for cleanup and migration runs.
pub const DEFAULT_BATCH_SIZE: u32 = 100;

/// Default advisory lease duration for singleton background jobs: 1 hour.
pub const DEFAULT_LEASE_TTL_SECS: u64 = 3600;
