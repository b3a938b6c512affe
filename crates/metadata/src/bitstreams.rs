//! Bitstream row operations.
//!
//! Every function takes a `&mut SqliteConnection` supplied by the caller
//! (a transaction's connection or a plain pool connection). Nothing here
//! commits; the transaction boundary belongs to the caller.

use crate::error::MetadataResult;
use crate::models::{BitstreamRow, StoreCounts};
use sqlx::SqliteConnection;
use time::OffsetDateTime;

/// Insert a new bitstream row.
pub async fn insert(conn: &mut SqliteConnection, row: &BitstreamRow) -> MetadataResult<()> {
    sqlx::query(
        r#"
        INSERT INTO bitstreams (
            store_id, internal_id, size_bytes, checksum, checksum_algorithm,
            deleted, deleted_at, created_at, registered_path, bytes_removed
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(row.store_id)
    .bind(&row.internal_id)
    .bind(row.size_bytes)
    .bind(&row.checksum)
    .bind(&row.checksum_algorithm)
    .bind(row.deleted)
    .bind(row.deleted_at)
    .bind(row.created_at)
    .bind(&row.registered_path)
    .bind(row.bytes_removed)
    .execute(conn)
    .await?;
    Ok(())
}

/// Load a row by identity.
pub async fn get(
    conn: &mut SqliteConnection,
    store_id: u32,
    internal_id: &str,
) -> MetadataResult<Option<BitstreamRow>> {
    let row = sqlx::query_as::<_, BitstreamRow>(
        "SELECT * FROM bitstreams WHERE store_id = ? AND internal_id = ?",
    )
    .bind(store_id as i64)
    .bind(internal_id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

/// Look up a registered bitstream by its source path. Returns deleted
/// rows too: a path whose record is pending cleanup must not be silently
/// re-adopted.
pub async fn find_registered(
    conn: &mut SqliteConnection,
    store_id: u32,
    registered_path: &str,
) -> MetadataResult<Option<BitstreamRow>> {
    let row = sqlx::query_as::<_, BitstreamRow>(
        "SELECT * FROM bitstreams WHERE store_id = ? AND registered_path = ?",
    )
    .bind(store_id as i64)
    .bind(registered_path)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

/// Soft-delete a row: set the flag and timestamp. Idempotent; returns
/// whether this call performed the transition.
pub async fn mark_deleted(
    conn: &mut SqliteConnection,
    store_id: u32,
    internal_id: &str,
    deleted_at: OffsetDateTime,
) -> MetadataResult<bool> {
    let result = sqlx::query(
        "UPDATE bitstreams SET deleted = 1, deleted_at = ?
         WHERE store_id = ? AND internal_id = ? AND deleted = 0",
    )
    .bind(deleted_at)
    .bind(store_id as i64)
    .bind(internal_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Flip a row's store pointer after migration. Clears `registered_path`:
/// the migrated copy lives at the content-addressed layout path in the
/// destination store. Returns whether a row was updated.
pub async fn update_store(
    conn: &mut SqliteConnection,
    from_store: u32,
    internal_id: &str,
    to_store: u32,
) -> MetadataResult<bool> {
    let result = sqlx::query(
        "UPDATE bitstreams SET store_id = ?, registered_path = NULL
         WHERE store_id = ? AND internal_id = ? AND deleted = 0",
    )
    .bind(to_store as i64)
    .bind(from_store as i64)
    .bind(internal_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Rows eligible for reclamation: soft-deleted, bytes still present,
/// past the retention cutoff. Ordered by delete time so the oldest debt
/// is paid first.
pub async fn reclaimable(
    conn: &mut SqliteConnection,
    cutoff: OffsetDateTime,
    limit: u32,
) -> MetadataResult<Vec<BitstreamRow>> {
    let rows = sqlx::query_as::<_, BitstreamRow>(
        "SELECT * FROM bitstreams
         WHERE deleted = 1 AND bytes_removed = 0 AND deleted_at <= ?
         ORDER BY deleted_at
         LIMIT ?",
    )
    .bind(cutoff)
    .bind(limit)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Mark a tombstoned row's bytes as removed so later sweeps skip it.
pub async fn mark_bytes_removed(
    conn: &mut SqliteConnection,
    store_id: u32,
    internal_id: &str,
) -> MetadataResult<()> {
    sqlx::query(
        "UPDATE bitstreams SET bytes_removed = 1 WHERE store_id = ? AND internal_id = ?",
    )
    .bind(store_id as i64)
    .bind(internal_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Remove a row entirely. Returns whether a row was removed.
pub async fn delete_row(
    conn: &mut SqliteConnection,
    store_id: u32,
    internal_id: &str,
) -> MetadataResult<bool> {
    let result = sqlx::query("DELETE FROM bitstreams WHERE store_id = ? AND internal_id = ?")
        .bind(store_id as i64)
        .bind(internal_id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Active rows in a store, ordered by internal id, starting after the
/// given cursor. The ordering is what makes migration resumable.
pub async fn active_in_store(
    conn: &mut SqliteConnection,
    store_id: u32,
    after: Option<&str>,
    limit: u32,
) -> MetadataResult<Vec<BitstreamRow>> {
    let rows = sqlx::query_as::<_, BitstreamRow>(
        "SELECT * FROM bitstreams
         WHERE store_id = ? AND deleted = 0 AND internal_id > ?
         ORDER BY internal_id
         LIMIT ?",
    )
    .bind(store_id as i64)
    .bind(after.unwrap_or(""))
    .bind(limit)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Per-store active/soft-deleted counts.
pub async fn store_counts(conn: &mut SqliteConnection) -> MetadataResult<Vec<StoreCounts>> {
    let rows = sqlx::query_as::<_, StoreCounts>(
        "SELECT store_id,
                COALESCE(SUM(CASE WHEN deleted = 0 THEN 1 ELSE 0 END), 0) AS active,
                COALESCE(SUM(CASE WHEN deleted = 1 THEN 1 ELSE 0 END), 0) AS soft_deleted
         FROM bitstreams
         GROUP BY store_id
         ORDER BY store_id",
    )
    .fetch_all(conn)
    .await?;
    Ok(rows)
}
