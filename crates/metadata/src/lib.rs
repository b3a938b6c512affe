//! Metadata coordinator for the depot bitstream storage engine.
//!
//! This crate owns the relational side of the engine:
//! - Bitstream rows: what exists, where, its size/checksum, and its
//!   soft-delete state
//! - Advisory job leases serializing the singleton background jobs
//!
//! The engine never commits: every row operation takes a
//! `&mut SqliteConnection` supplied by the caller, so metadata writes
//! land inside the caller's transaction and are committed or rolled back
//! there. [`SqliteStore`] owns the pool, schema migration, and
//! transaction handout.

pub mod bitstreams;
pub mod error;
pub mod leases;
pub mod models;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::{BitstreamRow, JobLeaseRow, StoreCounts};
pub use store::SqliteStore;
