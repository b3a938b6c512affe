//! Asset store trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads.
///
/// Dropping the stream releases the underlying file handle; that is how a
/// caller cancels an in-flight retrieve.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// A boxed stream of store-relative keys for listing operations.
pub type KeyStream = Pin<Box<dyn Stream<Item = StorageResult<String>> + Send>>;

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct AssetMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time, if the backend exposes one.
    pub modified: Option<time::OffsetDateTime>,
}

/// A single physical asset store.
///
/// Keys are store-relative paths; backends must refuse keys that would
/// escape the store root.
#[async_trait]
pub trait AssetStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's size and mtime without fetching content.
    async fn head(&self, key: &str) -> StorageResult<AssetMeta>;

    /// Open an object as a byte stream.
    async fn open(&self, key: &str) -> StorageResult<ByteStream>;

    /// Start a streaming upload. Bytes accumulate in a temporary file;
    /// `finish` publishes them atomically under `key`, `abort` discards
    /// them. Nothing is visible under `key` until `finish` returns.
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>>;

    /// Delete an object. Fails with `NotFound` if it does not exist.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Recursively list keys under a prefix. Temporary upload files are
    /// included; callers that must skip them filter on the key.
    async fn list_stream(&self, prefix: &str) -> StorageResult<KeyStream>;

    /// Static identifier of the backend type, for logs.
    fn backend_name(&self) -> &'static str;

    /// Verify the store is reachable and usable.
    async fn health_check(&self) -> StorageResult<()>;
}

/// Trait for streaming uploads.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Write a chunk of data.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Flush to stable storage and atomically publish under the final
    /// key. Returns the total bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Abort the upload, removing the temporary file.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}
