//! Bitstream storage engine for depot.
//!
//! This crate composes the asset store registry, the content-addressed
//! layout, checksum computation, and the metadata coordinator into:
//! - [`BitstreamService`]: store / register / retrieve / delete /
//!   compute_checksum / clone operations with the engine's ordering and
//!   atomicity guarantees (bytes durable before the metadata row commits)
//! - [`CleanupSweep`]: reclamation of soft-deleted bitstreams past the
//!   retention window, plus the orphan reconciliation sweep
//! - [`MigrationWorker`]: batched, resumable bulk moves between stores

pub mod cleanup;
pub mod error;
pub mod migrate;
pub mod service;

pub use cleanup::{CleanupOptions, CleanupSweep, OrphanSweepOptions, OrphanSweepSummary, SweepSummary};
pub use error::{EngineError, EngineResult};
pub use migrate::{MigrationOptions, MigrationSummary, MigrationWorker};
pub use service::{BitstreamService, StoreReport};
