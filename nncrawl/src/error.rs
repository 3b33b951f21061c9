//! Crawl error taxonomy
//!
//! Per-job errors (`Weight`, `Engine`, `InvalidJob`) are recorded on the job
//! with [`ErrorKind`] and never stop a run. Infrastructure errors
//! (`Repository`, `Config`) end the run.

use crate::db::RepositoryError;
use crate::services::engine_runner::EngineError;
use crate::services::weight_store::WeightError;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Failure class persisted in `jobs.last_error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DownloadError,
    IntegrityError,
    ParseError,
    TimeoutError,
    ProcessError,
    InvalidJob,
    RepositoryError,
    ConfigError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DownloadError => "download_error",
            ErrorKind::IntegrityError => "integrity_error",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::TimeoutError => "timeout_error",
            ErrorKind::ProcessError => "process_error",
            ErrorKind::InvalidJob => "invalid_job",
            ErrorKind::RepositoryError => "repository_error",
            ErrorKind::ConfigError => "config_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "download_error" => Ok(ErrorKind::DownloadError),
            "integrity_error" => Ok(ErrorKind::IntegrityError),
            "parse_error" => Ok(ErrorKind::ParseError),
            "timeout_error" => Ok(ErrorKind::TimeoutError),
            "process_error" => Ok(ErrorKind::ProcessError),
            "invalid_job" => Ok(ErrorKind::InvalidJob),
            "repository_error" => Ok(ErrorKind::RepositoryError),
            "config_error" => Ok(ErrorKind::ConfigError),
            other => Err(format!("Unknown error kind '{}'", other)),
        }
    }
}

/// Error raised while crawling
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Weight(#[from] WeightError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Job references a missing or unusable network/position row
    #[error("Invalid job {job_id}: {reason}")]
    InvalidJob { job_id: i64, reason: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CrawlError {
    /// Whether this error ends the whole run instead of one job
    pub fn is_fatal(&self) -> bool {
        matches!(self, CrawlError::Repository(_) | CrawlError::Config(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CrawlError::Weight(e) => e.kind(),
            CrawlError::Engine(e) => e.kind(),
            CrawlError::InvalidJob { .. } => ErrorKind::InvalidJob,
            CrawlError::Repository(_) => ErrorKind::RepositoryError,
            CrawlError::Config(_) => ErrorKind::ConfigError,
        }
    }
}

impl From<nncrawl_common::Error> for CrawlError {
    fn from(err: nncrawl_common::Error) -> Self {
        CrawlError::Repository(RepositoryError::Storage(err))
    }
}

pub type CrawlResult<T> = Result<T, CrawlError>;
