//! Job rows and status counts

use super::EvaluationResult;
use chrono::{DateTime, Utc};
use nncrawl_common::db::models::JobStatus;
use serde::{Deserialize, Serialize};

/// One (network, position) work item and its execution state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: i64,
    pub network_id: String,
    pub position_id: String,
    pub status: JobStatus,
    pub attempt_count: u32,
    pub claimed_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub retry_after: Option<DateTime<Utc>>,
    /// Error kind of the most recent failure
    pub last_error: Option<String>,
    pub last_error_message: Option<String>,
    /// Set once the job is done
    pub result: Option<EvaluationResult>,
    pub created_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Number of jobs per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub pending: u64,
    pub in_progress: u64,
    pub done: u64,
    pub failed: u64,
}

impl JobCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.in_progress + self.done + self.failed
    }

    pub fn get(&self, status: JobStatus) -> u64 {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::InProgress => self.in_progress,
            JobStatus::Done => self.done,
            JobStatus::Failed => self.failed,
        }
    }

    pub(crate) fn add(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::InProgress => self.in_progress += count,
            JobStatus::Done => self.done += count,
            JobStatus::Failed => self.failed += count,
        }
    }
}
