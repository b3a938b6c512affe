//! Ticket-based advisory leases for singleton background jobs.
//!
//! Cleanup and migration must each run as at most one instance
//! system-wide. A lease row holds an opaque ticket; a worker acquires it
//! before doing privileged work, validates it while running, and
//! releases it by matching the ticket. Leases carry a bounded duration
//! so a crashed worker cannot permanently wedge the job.

use crate::error::MetadataResult;
use sqlx::SqliteConnection;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Try to acquire the named lease. Returns the ticket on success, or
/// `None` if another live holder exists.
pub async fn acquire(
    conn: &mut SqliteConnection,
    job_name: &str,
    ttl: Duration,
) -> MetadataResult<Option<String>> {
    let now = OffsetDateTime::now_utc();

    // Expire a stale holder first; the insert below races fairly.
    sqlx::query("DELETE FROM job_leases WHERE job_name = ? AND expires_at <= ?")
        .bind(job_name)
        .bind(now)
        .execute(&mut *conn)
        .await?;

    let ticket = Uuid::new_v4().to_string();
    let result = sqlx::query(
        "INSERT INTO job_leases (job_name, ticket, acquired_at, expires_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT (job_name) DO NOTHING",
    )
    .bind(job_name)
    .bind(&ticket)
    .bind(now)
    .bind(now + ttl)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() > 0 {
        Ok(Some(ticket))
    } else {
        Ok(None)
    }
}

/// Check that the lease is still held under this ticket and not expired.
pub async fn validate(
    conn: &mut SqliteConnection,
    job_name: &str,
    ticket: &str,
) -> MetadataResult<bool> {
    let held = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(
            SELECT 1 FROM job_leases
            WHERE job_name = ? AND ticket = ? AND expires_at > ?
        )",
    )
    .bind(job_name)
    .bind(ticket)
    .bind(OffsetDateTime::now_utc())
    .fetch_one(conn)
    .await?;
    Ok(held)
}

/// Release the lease if the ticket matches. Returns whether a lease was
/// released.
pub async fn release(
    conn: &mut SqliteConnection,
    job_name: &str,
    ticket: &str,
) -> MetadataResult<bool> {
    let result = sqlx::query("DELETE FROM job_leases WHERE job_name = ? AND ticket = ?")
        .bind(job_name)
        .bind(ticket)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}
