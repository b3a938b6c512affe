//! Integration tests for the cleanup sweep and the orphan sweep.

mod common;

use common::*;
use depot_core::{allocate_internal_id, layout};
use depot_engine::{CleanupOptions, CleanupSweep, EngineError, OrphanSweepOptions};
use time::Duration;
use tokio_util::sync::CancellationToken;

fn cleanup_opts(delete_db_rows: bool) -> CleanupOptions {
    CleanupOptions {
        delete_db_rows,
        verbose: false,
        retention: Duration::days(7),
        batch_size: 50,
        lease_ttl: Duration::minutes(10),
    }
}

fn sweep(engine: &TestEngine) -> CleanupSweep {
    CleanupSweep::new(engine.db.clone(), engine.registry.clone())
}

#[tokio::test]
async fn test_store_delete_cleanup_walkthrough() {
    let engine = engine().await;

    // 10 MiB pseudo-random payload.
    let data = random_bytes(10 * 1024 * 1024);
    let record = store_bytes(&engine, &data).await;
    assert_eq!(record.size_bytes, 10_485_760);
    assert_eq!(record.checksum.to_hex(), sha256_hex(&data));

    delete_record(&engine, &record).await;
    // Simulate the clock advancing past the retention window.
    backdate_delete(&engine, &record, 8).await;

    let summary = sweep(&engine)
        .run(&cleanup_opts(true), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.reclaimed, 1);
    assert_eq!(summary.rows_removed, 1);
    assert_eq!(summary.bytes_reclaimed, 10_485_760);
    assert!(summary.failed.is_empty());

    // File and metadata row are both gone; retrieve now fails.
    assert!(!engine.file_path(&record).exists());
    assert!(load_record(&engine, 0, &record.internal_id).await.is_none());
    match engine.service.retrieve(&record).await {
        Err(EngineError::NotFound { .. }) => {}
        other => panic!("expected NotFound, got {:?}", other.map(|_| "stream")),
    }
}

#[tokio::test]
async fn test_cleanup_never_touches_active_or_recent_records() {
    let engine = engine().await;

    let active = store_bytes(&engine, b"still active").await;
    let recent = store_bytes(&engine, b"freshly deleted").await;
    delete_record(&engine, &recent).await;

    let summary = sweep(&engine)
        .run(&cleanup_opts(true), &CancellationToken::new())
        .await
        .unwrap();

    // The recent delete is inside the retention window; nothing moves.
    assert_eq!(summary.scanned, 0);
    assert_eq!(summary.reclaimed, 0);
    assert!(engine.file_path(&active).exists());
    assert!(engine.file_path(&recent).exists());
    assert!(load_record(&engine, 0, &recent.internal_id).await.is_some());
}

#[tokio::test]
async fn test_cleanup_tombstone_mode_keeps_row() {
    let engine = engine().await;
    let record = store_bytes(&engine, b"tombstone me").await;
    delete_record(&engine, &record).await;
    backdate_delete(&engine, &record, 30).await;

    let summary = sweep(&engine)
        .run(&cleanup_opts(false), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.tombstoned, 1);
    assert_eq!(summary.rows_removed, 0);

    // Bytes gone, row retained as tombstone.
    assert!(!engine.file_path(&record).exists());
    let row = {
        let mut conn = engine.db.conn().await.unwrap();
        depot_metadata::bitstreams::get(&mut conn, 0, &record.internal_id)
            .await
            .unwrap()
            .unwrap()
    };
    assert!(row.deleted);
    assert!(row.bytes_removed);

    // A second run finds nothing left to do.
    let again = sweep(&engine)
        .run(&cleanup_opts(false), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(again.scanned, 0);
}

#[tokio::test]
async fn test_cleanup_already_missing_file_still_settles_row() {
    let engine = engine().await;
    let record = store_bytes(&engine, b"disappearing act").await;
    delete_record(&engine, &record).await;
    backdate_delete(&engine, &record, 30).await;

    std::fs::remove_file(engine.file_path(&record)).unwrap();

    let summary = sweep(&engine)
        .run(&cleanup_opts(true), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.reclaimed, 1);
    assert_eq!(summary.bytes_reclaimed, 0);
    assert!(load_record(&engine, 0, &record.internal_id).await.is_none());
}

#[tokio::test]
async fn test_cleanup_isolates_per_item_failures() {
    let engine = engine().await;

    let good = store_bytes(&engine, b"reclaim me").await;
    delete_record(&engine, &good).await;
    backdate_delete(&engine, &good, 30).await;

    // A row pointing at a store this deployment no longer configures:
    // the item fails, the sweep continues.
    let orphan_row = depot_metadata::BitstreamRow {
        store_id: 99,
        internal_id: allocate_internal_id(),
        size_bytes: 10,
        checksum: sha256_hex(b"x"),
        checksum_algorithm: "sha-256".to_string(),
        deleted: true,
        deleted_at: Some(time::OffsetDateTime::now_utc() - Duration::days(30)),
        created_at: time::OffsetDateTime::now_utc() - Duration::days(60),
        registered_path: None,
        bytes_removed: false,
    };
    {
        let mut conn = engine.db.conn().await.unwrap();
        depot_metadata::bitstreams::insert(&mut conn, &orphan_row)
            .await
            .unwrap();
    }

    let summary = sweep(&engine)
        .run(&cleanup_opts(true), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.reclaimed, 1);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, 99);
    assert!(!engine.file_path(&good).exists());
}

#[tokio::test]
async fn test_cleanup_is_singleton_via_lease() {
    let engine = engine().await;

    let ticket = {
        let mut conn = engine.db.conn().await.unwrap();
        depot_metadata::leases::acquire(&mut conn, "cleanup", Duration::minutes(10))
            .await
            .unwrap()
            .unwrap()
    };

    match sweep(&engine)
        .run(&cleanup_opts(true), &CancellationToken::new())
        .await
    {
        Err(EngineError::JobAlreadyRunning(name)) => assert_eq!(name, "cleanup"),
        other => panic!("expected JobAlreadyRunning, got {:?}", other.map(|_| "summary")),
    }

    // After release the job can run.
    {
        let mut conn = engine.db.conn().await.unwrap();
        depot_metadata::leases::release(&mut conn, "cleanup", &ticket)
            .await
            .unwrap();
    }
    sweep(&engine)
        .run(&cleanup_opts(true), &CancellationToken::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_cancelled_cleanup_stops_between_items() {
    let engine = engine().await;
    for _ in 0..3 {
        let record = store_bytes(&engine, &random_bytes(64)).await;
        delete_record(&engine, &record).await;
        backdate_delete(&engine, &record, 30).await;
    }

    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = sweep(&engine)
        .run(&cleanup_opts(true), &cancel)
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.reclaimed, 0);

    // Nothing was half-deleted: a later run reclaims everything.
    let summary = sweep(&engine)
        .run(&cleanup_opts(true), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.reclaimed, 3);
}

#[tokio::test]
async fn test_orphan_sweep_removes_only_unreferenced_files() {
    let engine = engine().await;

    let kept = store_bytes(&engine, b"referenced").await;

    let import = engine.store_root(0).join("imports/reg.bin");
    std::fs::create_dir_all(import.parent().unwrap()).unwrap();
    std::fs::write(&import, b"registered bytes").unwrap();
    {
        let mut tx = engine.db.begin().await.unwrap();
        engine
            .service
            .register(&mut tx, 0, "imports/reg.bin")
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    // An orphan at a layout path: bytes whose metadata commit never
    // happened.
    let orphan_id = allocate_internal_id();
    let orphan_path = engine
        .store_root(0)
        .join(layout::path_for(&orphan_id).unwrap());
    std::fs::create_dir_all(orphan_path.parent().unwrap()).unwrap();
    std::fs::write(&orphan_path, b"orphaned bytes").unwrap();

    // An in-flight temp file must never be touched.
    let temp_path = engine.store_root(0).join("aa/bb/aabbfile.tmp.deadbeef");
    std::fs::create_dir_all(temp_path.parent().unwrap()).unwrap();
    std::fs::write(&temp_path, b"in flight").unwrap();

    let opts = OrphanSweepOptions {
        store_id: 0,
        grace: Duration::ZERO,
        dry_run: false,
        lease_ttl: Duration::minutes(10),
    };
    let summary = sweep(&engine)
        .run_orphan_sweep(&opts, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.orphans, 1);
    assert_eq!(summary.removed, 1);
    assert!(!orphan_path.exists());
    assert!(engine.file_path(&kept).exists());
    assert!(import.exists());
    assert!(temp_path.exists());
}

#[tokio::test]
async fn test_orphan_sweep_dry_run_removes_nothing() {
    let engine = engine().await;

    let orphan_id = allocate_internal_id();
    let orphan_path = engine
        .store_root(0)
        .join(layout::path_for(&orphan_id).unwrap());
    std::fs::create_dir_all(orphan_path.parent().unwrap()).unwrap();
    std::fs::write(&orphan_path, b"orphan").unwrap();

    let opts = OrphanSweepOptions {
        store_id: 0,
        grace: Duration::ZERO,
        dry_run: true,
        lease_ttl: Duration::minutes(10),
    };
    let summary = sweep(&engine)
        .run_orphan_sweep(&opts, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.orphans, 1);
    assert_eq!(summary.removed, 0);
    assert!(orphan_path.exists());
}

#[tokio::test]
async fn test_orphan_sweep_respects_grace_window() {
    let engine = engine().await;

    // Freshly written orphan with a large grace window: left alone, its
    // transaction may simply not have committed yet.
    let orphan_id = allocate_internal_id();
    let orphan_path = engine
        .store_root(0)
        .join(layout::path_for(&orphan_id).unwrap());
    std::fs::create_dir_all(orphan_path.parent().unwrap()).unwrap();
    std::fs::write(&orphan_path, b"too young").unwrap();

    let opts = OrphanSweepOptions {
        store_id: 0,
        grace: Duration::hours(24),
        dry_run: false,
        lease_ttl: Duration::minutes(10),
    };
    let summary = sweep(&engine)
        .run_orphan_sweep(&opts, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.orphans, 0);
    assert!(orphan_path.exists());
}
