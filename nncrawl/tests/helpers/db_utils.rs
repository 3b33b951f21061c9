//! Database Test Utilities

use anyhow::Result;
use nncrawl::db::positions::insert_position;
use nncrawl::db::seed::enqueue_job;
use nncrawl::db::{JobRepository, RetryPolicy};
use nncrawl::models::Position;
use nncrawl_common::db::init_database;
use sqlx::SqlitePool;
use tempfile::TempDir;

/// Create temporary test database with the crawler schema
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test_nncrawl.db");
    let pool = init_database(&db_path, 8).await?;
    Ok((temp_dir, pool))
}

/// Repository allowing `retry_limit` attempts, no backoff
pub fn test_repository(pool: &SqlitePool, retry_limit: u32) -> JobRepository {
    JobRepository::new(pool.clone(), RetryPolicy::new(retry_limit))
}

/// Insert the initial position as `position_id` and enqueue it for `network_id`
pub async fn seed_job(pool: &SqlitePool, network_id: &str, position_id: &str) -> Result<i64> {
    insert_position(pool, &Position::startpos(position_id)).await?;
    Ok(enqueue_job(pool, network_id, position_id).await?)
}

/// Move a job's claim time back so it looks abandoned
pub async fn backdate_claim(pool: &SqlitePool, job_id: i64, claimed_at: &str) -> Result<()> {
    sqlx::query("UPDATE jobs SET claimed_at = ? WHERE job_id = ?")
        .bind(claimed_at)
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}
