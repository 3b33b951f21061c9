//! Database access for nncrawl
//!
//! Connection setup and schema live in `nncrawl_common::db`. This module holds
//! the crawler's repositories.

pub mod jobs;
pub mod networks;
pub mod positions;
pub mod seed;

pub use jobs::{Completion, JobRepository, RetryPolicy};
pub use nncrawl_common::db::{init_database, init_schema};

use nncrawl_common::db::models::JobStatus;
use thiserror::Error;

/// Lock wait used by repository functions that are not given one
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

/// Job repository error
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The job is not in the state the caller's claim implies
    #[error("Claim conflict on job {job_id}: status is {status}")]
    ClaimConflict { job_id: i64, status: JobStatus },

    /// A done job was completed again with a different result
    #[error("Job {job_id} already completed with a different result")]
    ResultMismatch { job_id: i64 },

    #[error("Job {0} not found")]
    NotFound(i64),

    /// Connectivity or SQL failure
    #[error(transparent)]
    Storage(#[from] nncrawl_common::Error),
}

impl RepositoryError {
    /// Conflicts are reported per job; everything else is an infrastructure failure
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            RepositoryError::ClaimConflict { .. }
                | RepositoryError::ResultMismatch { .. }
                | RepositoryError::NotFound(_)
        )
    }
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        RepositoryError::Storage(nncrawl_common::Error::Database(err))
    }
}
