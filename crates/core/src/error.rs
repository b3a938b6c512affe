//! Core error types.

use thiserror::Error;

/// Errors from domain-type validation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid internal id: {0}")]
    InvalidInternalId(String),

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;
