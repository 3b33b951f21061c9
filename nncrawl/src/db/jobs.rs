//! Job repository
//!
//! Claim, completion and failure bookkeeping for the `jobs` table. Every
//! state change is a single conditional `UPDATE`, so two workers can never
//! hold the same job and a late writer sees a claim conflict instead of
//! overwriting someone else's outcome.

use super::RepositoryError;
use crate::error::ErrorKind;
use crate::models::{EvaluationResult, Job, JobCounts};
use crate::utils::retry_on_lock;
use chrono::{DateTime, Utc};
use nncrawl_common::db::models::JobStatus;
use nncrawl_common::time::{checked_add, checked_sub, from_db_timestamp, to_db_timestamp};
use nncrawl_common::Error;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tracing::{debug, info};

type Result<T> = std::result::Result<T, RepositoryError>;

const JOB_COLUMNS: &str = "job_id, network_id, position_id, status, attempt_count, claimed_at, \
     claimed_by, retry_after, last_error, last_error_message, result_json, created_at, completed_at";

/// Attempt limit and backoff between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before a job is marked failed
    pub retry_limit: u32,
    /// Delay after the first failed attempt; zero disables backoff
    pub backoff: Duration,
    /// Upper bound for the doubled delay
    pub backoff_max: Duration,
}

impl RetryPolicy {
    pub fn new(retry_limit: u32) -> Self {
        Self {
            retry_limit,
            backoff: Duration::ZERO,
            backoff_max: Duration::ZERO,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration, backoff_max: Duration) -> Self {
        self.backoff = backoff;
        self.backoff_max = backoff_max;
        self
    }

    /// Delay before retrying a job that has been attempted `attempt_count` times
    pub fn backoff_for(&self, attempt_count: u32) -> Duration {
        if self.backoff.is_zero() {
            return Duration::ZERO;
        }
        let doublings = attempt_count.saturating_sub(1).min(31);
        self.backoff
            .checked_mul(1u32 << doublings)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max.max(self.backoff))
    }
}

/// Outcome of [`JobRepository::complete`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The job moved from in-progress to done
    Completed,
    /// The job was already done with the same result; nothing changed
    AlreadyDone,
}

/// Durable access to the job table
#[derive(Debug, Clone)]
pub struct JobRepository {
    pool: SqlitePool,
    policy: RetryPolicy,
    max_lock_wait_ms: u64,
}

impl JobRepository {
    pub fn new(pool: SqlitePool, policy: RetryPolicy) -> Self {
        Self {
            pool,
            policy,
            max_lock_wait_ms: super::DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    pub fn with_max_lock_wait(mut self, max_lock_wait: Duration) -> Self {
        self.max_lock_wait_ms = max_lock_wait.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Atomically claim the next claimable job for `worker_id`
    ///
    /// Claimable: pending with no pending backoff, or failed with attempts
    /// left under the current retry limit. Jobs of the same network are
    /// claimed together.
    pub async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>> {
        let now = to_db_timestamp(Utc::now());
        let retry_limit = i64::from(self.policy.retry_limit);
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'in_progress',
                claimed_at = ?,
                claimed_by = ?,
                attempt_count = attempt_count + 1,
                retry_after = NULL
            WHERE job_id = (
                SELECT job_id FROM jobs
                WHERE (status = 'pending' AND (retry_after IS NULL OR retry_after <= ?))
                   OR (status = 'failed' AND attempt_count < ?)
                ORDER BY network_id DESC, job_id ASC
                LIMIT 1
            )
            AND status IN ('pending', 'failed')
            RETURNING {}
            "#,
            JOB_COLUMNS
        );

        let row = retry_on_lock("claim job", self.max_lock_wait_ms, || async {
            Ok(sqlx::query(&sql)
                .bind(&now)
                .bind(worker_id)
                .bind(&now)
                .bind(retry_limit)
                .fetch_optional(&self.pool)
                .await?)
        })
        .await?;

        match row {
            Some(row) => {
                let job = row_to_job(&row)?;
                debug!(
                    job_id = job.job_id,
                    network_id = %job.network_id,
                    position_id = %job.position_id,
                    attempt = job.attempt_count,
                    worker_id,
                    "Claimed job"
                );
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// Mark a claimed job done with `result`
    ///
    /// Completing a done job again with an identical result is a no-op.
    pub async fn complete(&self, job_id: i64, result: &EvaluationResult) -> Result<Completion> {
        let result_json = serde_json::to_string(result)
            .map_err(|e| Error::Internal(format!("Failed to serialize result: {}", e)))?;
        let now = to_db_timestamp(Utc::now());

        let updated = retry_on_lock("complete job", self.max_lock_wait_ms, || async {
            let done = sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'done',
                    result_json = ?,
                    completed_at = ?,
                    claimed_at = NULL,
                    claimed_by = NULL,
                    retry_after = NULL
                WHERE job_id = ? AND status = 'in_progress'
                "#,
            )
            .bind(&result_json)
            .bind(&now)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
            Ok(done.rows_affected())
        })
        .await?;

        if updated == 1 {
            debug!(job_id, "Job completed");
            return Ok(Completion::Completed);
        }

        let row = self.fetch_state(job_id).await?;
        let (status, stored) = row.ok_or(RepositoryError::NotFound(job_id))?;
        match status {
            JobStatus::Done if same_result(stored.as_deref(), &result_json) => {
                debug!(job_id, "Job already done with identical result");
                Ok(Completion::AlreadyDone)
            }
            JobStatus::Done => Err(RepositoryError::ResultMismatch { job_id }),
            status => Err(RepositoryError::ClaimConflict { job_id, status }),
        }
    }

    /// Release a claimed job after a failed attempt
    ///
    /// The job goes back to pending (after a backoff) while attempts remain,
    /// otherwise to failed. Returns the new status.
    pub async fn fail(&self, job_id: i64, kind: ErrorKind, message: &str) -> Result<JobStatus> {
        let attempt_count = match self.fetch_claim(job_id).await? {
            Some((JobStatus::InProgress, attempts)) => attempts,
            Some((status, _)) => return Err(RepositoryError::ClaimConflict { job_id, status }),
            None => return Err(RepositoryError::NotFound(job_id)),
        };

        let (status, retry_after) = if attempt_count < self.policy.retry_limit {
            let delay = self.policy.backoff_for(attempt_count);
            let retry_after = (!delay.is_zero()).then(|| checked_add(Utc::now(), delay));
            (JobStatus::Pending, retry_after)
        } else {
            (JobStatus::Failed, None)
        };
        let retry_after_str = retry_after.map(to_db_timestamp);

        let updated = retry_on_lock("fail job", self.max_lock_wait_ms, || async {
            let done = sqlx::query(
                r#"
                UPDATE jobs
                SET status = ?,
                    retry_after = ?,
                    last_error = ?,
                    last_error_message = ?,
                    claimed_at = NULL,
                    claimed_by = NULL
                WHERE job_id = ? AND status = 'in_progress' AND attempt_count = ?
                "#,
            )
            .bind(status.as_str())
            .bind(&retry_after_str)
            .bind(kind.as_str())
            .bind(message)
            .bind(job_id)
            .bind(i64::from(attempt_count))
            .execute(&self.pool)
            .await?;
            Ok(done.rows_affected())
        })
        .await?;

        if updated != 1 {
            // Reaped and possibly re-claimed between the read and the update
            let status = self
                .fetch_claim(job_id)
                .await?
                .map(|(status, _)| status)
                .ok_or(RepositoryError::NotFound(job_id))?;
            return Err(RepositoryError::ClaimConflict { job_id, status });
        }

        debug!(
            job_id,
            error_kind = %kind,
            attempt = attempt_count,
            new_status = %status,
            retry_after = ?retry_after,
            "Job attempt failed"
        );
        Ok(status)
    }

    /// Reset in-progress jobs claimed longer than `max_age` ago to pending
    pub async fn reap_stale_claims(&self, max_age: Duration) -> Result<u64> {
        let cutoff = to_db_timestamp(checked_sub(Utc::now(), max_age));

        let reaped = retry_on_lock("reap stale claims", self.max_lock_wait_ms, || async {
            let done = sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'pending', claimed_at = NULL, claimed_by = NULL
                WHERE status = 'in_progress' AND claimed_at < ?
                "#,
            )
            .bind(&cutoff)
            .execute(&self.pool)
            .await?;
            Ok(done.rows_affected())
        })
        .await?;

        if reaped > 0 {
            info!(reaped, max_age_ms = max_age.as_millis() as u64, "Reset stale job claims");
        }
        Ok(reaped)
    }

    /// Earliest time a pending job waiting out a backoff becomes claimable
    pub async fn next_retry_at(&self) -> Result<Option<DateTime<Utc>>> {
        let next: Option<String> = sqlx::query_scalar(
            "SELECT MIN(retry_after) FROM jobs WHERE status = 'pending' AND retry_after IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(next.as_deref().map(from_db_timestamp).transpose()?)
    }

    /// Number of jobs per status
    pub async fn status_counts(&self) -> Result<JobCounts> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = JobCounts::default();
        for row in rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            counts.add(status.parse()?, n.max(0) as u64);
        }
        Ok(counts)
    }

    pub async fn get_job(&self, job_id: i64) -> Result<Option<Job>> {
        let sql = format!("SELECT {} FROM jobs WHERE job_id = ?", JOB_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(row_to_job).transpose()?)
    }

    /// Stored result of a done job
    pub async fn get_result(&self, job_id: i64) -> Result<Option<EvaluationResult>> {
        let stored: Option<Option<String>> =
            sqlx::query_scalar("SELECT result_json FROM jobs WHERE job_id = ?")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;

        match stored {
            None => Err(RepositoryError::NotFound(job_id)),
            Some(json) => Ok(json.as_deref().map(parse_result).transpose()?),
        }
    }

    async fn fetch_state(&self, job_id: i64) -> Result<Option<(JobStatus, Option<String>)>> {
        let row = sqlx::query("SELECT status, result_json FROM jobs WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let status: String = row.get("status");
                Ok(Some((status.parse()?, row.get("result_json"))))
            }
            None => Ok(None),
        }
    }

    async fn fetch_claim(&self, job_id: i64) -> Result<Option<(JobStatus, u32)>> {
        let row = sqlx::query("SELECT status, attempt_count FROM jobs WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let status: String = row.get("status");
                let attempts: i64 = row.get("attempt_count");
                Ok(Some((status.parse()?, attempts.max(0) as u32)))
            }
            None => Ok(None),
        }
    }
}

fn same_result(stored: Option<&str>, candidate: &str) -> bool {
    let Some(stored) = stored else {
        return false;
    };
    if stored == candidate {
        return true;
    }
    match (
        serde_json::from_str::<serde_json::Value>(stored),
        serde_json::from_str::<serde_json::Value>(candidate),
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn parse_result(json: &str) -> nncrawl_common::Result<EvaluationResult> {
    serde_json::from_str(json)
        .map_err(|e| Error::InvalidInput(format!("Failed to deserialize result: {}", e)))
}

fn parse_timestamp(row: &SqliteRow, column: &str) -> nncrawl_common::Result<Option<DateTime<Utc>>> {
    let value: Option<String> = row.get(column);
    value.as_deref().map(from_db_timestamp).transpose()
}

fn row_to_job(row: &SqliteRow) -> nncrawl_common::Result<Job> {
    let status: String = row.get("status");
    let attempt_count: i64 = row.get("attempt_count");
    let result_json: Option<String> = row.get("result_json");

    Ok(Job {
        job_id: row.get("job_id"),
        network_id: row.get("network_id"),
        position_id: row.get("position_id"),
        status: status.parse()?,
        attempt_count: attempt_count.max(0) as u32,
        claimed_at: parse_timestamp(row, "claimed_at")?,
        claimed_by: row.get("claimed_by"),
        retry_after: parse_timestamp(row, "retry_after")?,
        last_error: row.get("last_error"),
        last_error_message: row.get("last_error_message"),
        result: result_json.as_deref().map(parse_result).transpose()?,
        created_at: parse_timestamp(row, "created_at")?,
        completed_at: parse_timestamp(row, "completed_at")?,
    })
}
