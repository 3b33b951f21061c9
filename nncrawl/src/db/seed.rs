//! Job seeding
//!
//! Jobs are created ahead of a crawl, one per (network, position) pair.
//! The network row is created on first reference; the position must exist.

use super::DEFAULT_MAX_LOCK_WAIT_MS;
use crate::utils::retry_on_lock;
use nncrawl_common::{Error, Result};
use sqlx::SqlitePool;
use tracing::info;

/// Enqueue a pending job, returning its id (existing pairs are not duplicated)
pub async fn enqueue_job(pool: &SqlitePool, network_id: &str, position_id: &str) -> Result<i64> {
    retry_on_lock("enqueue job", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let mut tx = pool.begin().await?;
        insert_pair(&mut tx, network_id, position_id).await?;
        let job_id: i64 =
            sqlx::query_scalar("SELECT job_id FROM jobs WHERE network_id = ? AND position_id = ?")
                .bind(network_id)
                .bind(position_id)
                .fetch_one(&mut *tx)
                .await?;
        tx.commit().await?;
        Ok(job_id)
    })
    .await
}

/// Enqueue every network × position pair in one transaction
///
/// Returns the number of newly created jobs.
pub async fn enqueue_jobs(
    pool: &SqlitePool,
    network_ids: &[String],
    position_ids: &[String],
) -> Result<u64> {
    let created = retry_on_lock("enqueue jobs", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let mut tx = pool.begin().await?;
        let mut created = 0u64;
        for network_id in network_ids {
            for position_id in position_ids {
                created += insert_pair(&mut tx, network_id, position_id).await?;
            }
        }
        tx.commit().await?;
        Ok(created)
    })
    .await?;

    info!(
        networks = network_ids.len(),
        positions = position_ids.len(),
        created,
        "Seeded jobs"
    );
    Ok(created)
}

async fn insert_pair(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    network_id: &str,
    position_id: &str,
) -> Result<u64> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM positions WHERE position_id = ?")
        .bind(position_id)
        .fetch_optional(&mut **tx)
        .await?;
    if exists.is_none() {
        return Err(Error::NotFound(format!("Position '{}'", position_id)));
    }

    sqlx::query("INSERT OR IGNORE INTO networks (network_id) VALUES (?)")
        .bind(network_id)
        .execute(&mut **tx)
        .await?;

    let inserted = sqlx::query("INSERT OR IGNORE INTO jobs (network_id, position_id) VALUES (?, ?)")
        .bind(network_id)
        .bind(position_id)
        .execute(&mut **tx)
        .await?;

    Ok(inserted.rows_affected())
}
