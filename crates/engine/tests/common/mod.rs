//! Common test fixtures for engine integration tests.
#![allow(dead_code)]

use bytes::Bytes;
use depot_core::config::StoreConfig;
use depot_core::{BitstreamRecord, ChecksumAlgorithm};
use depot_engine::BitstreamService;
use depot_metadata::SqliteStore;
use depot_storage::{AssetStoreRegistry, ByteStream, StorageResult};
use futures::StreamExt;
use rand::RngCore;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestEngine {
    pub dir: TempDir,
    pub db: Arc<SqliteStore>,
    pub registry: Arc<AssetStoreRegistry>,
    pub service: BitstreamService,
}

impl TestEngine {
    /// Filesystem root of a store, for direct assertions on bytes.
    pub fn store_root(&self, store_id: u32) -> PathBuf {
        self.dir.path().join(format!("store{store_id}"))
    }

    /// Absolute path of a record's bytes, for direct assertions.
    pub fn file_path(&self, record: &BitstreamRecord) -> PathBuf {
        self.store_root(record.store_id)
            .join(record.relative_path().unwrap())
    }
}

/// Two writable stores (0 = incoming, 1 = spare) plus a SQLite metadata
/// store, all under one temp dir.
pub async fn engine() -> TestEngine {
    let dir = tempfile::tempdir().unwrap();
    let stores = vec![
        StoreConfig {
            id: 0,
            path: dir.path().join("store0"),
            read_only: false,
        },
        StoreConfig {
            id: 1,
            path: dir.path().join("store1"),
            read_only: false,
        },
    ];
    engine_with(dir, stores, 0).await
}

/// Engine over explicit store configs, for read-only setups.
pub async fn engine_with(dir: TempDir, stores: Vec<StoreConfig>, incoming: u32) -> TestEngine {
    let db = Arc::new(
        SqliteStore::new(dir.path().join("meta.db"))
            .await
            .unwrap(),
    );
    let registry = Arc::new(
        AssetStoreRegistry::from_config(&stores, incoming)
            .await
            .unwrap(),
    );
    let service = BitstreamService::new(registry.clone(), ChecksumAlgorithm::Sha256);
    TestEngine {
        dir,
        db,
        registry,
        service,
    }
}

/// Wrap bytes as the engine's input stream type, chunked like a network
/// body would be.
pub fn byte_stream(data: Vec<u8>) -> ByteStream {
    let chunks: Vec<StorageResult<Bytes>> = data
        .chunks(64 * 1024)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    Box::pin(futures::stream::iter(chunks))
}

pub async fn read_all(mut stream: ByteStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::rng().fill_bytes(&mut bytes);
    bytes
}

/// Independent SHA-256, hex-encoded, for cross-checking recorded
/// checksums.
pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    Sha256::digest(data)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Store bytes through the service inside a committed transaction.
pub async fn store_bytes(engine: &TestEngine, data: &[u8]) -> BitstreamRecord {
    let mut tx = engine.db.begin().await.unwrap();
    let record = engine
        .service
        .store(&mut tx, byte_stream(data.to_vec()))
        .await
        .unwrap();
    tx.commit().await.unwrap();
    record
}

/// Soft-delete a record inside a committed transaction.
pub async fn delete_record(engine: &TestEngine, record: &BitstreamRecord) {
    let mut tx = engine.db.begin().await.unwrap();
    engine.service.delete(&mut tx, record).await.unwrap();
    tx.commit().await.unwrap();
}

/// Rewind a record's delete timestamp, simulating clock advance past the
/// retention window.
pub async fn backdate_delete(engine: &TestEngine, record: &BitstreamRecord, days: i64) {
    let mut conn = engine.db.conn().await.unwrap();
    sqlx::query("UPDATE bitstreams SET deleted_at = ? WHERE store_id = ? AND internal_id = ?")
        .bind(time::OffsetDateTime::now_utc() - time::Duration::days(days))
        .bind(record.store_id as i64)
        .bind(&record.internal_id)
        .execute(&mut *conn)
        .await
        .unwrap();
}

/// Reload a record from metadata by identity.
pub async fn load_record(
    engine: &TestEngine,
    store_id: u32,
    internal_id: &str,
) -> Option<BitstreamRecord> {
    let mut conn = engine.db.conn().await.unwrap();
    depot_metadata::bitstreams::get(&mut conn, store_id, internal_id)
        .await
        .unwrap()
        .map(|row| row.into_record().unwrap())
}
