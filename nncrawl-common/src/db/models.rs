//! Database models

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Job execution state as stored in `jobs.status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "in_progress" => Ok(JobStatus::InProgress),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::InvalidInput(format!("Unknown job status '{}'", other))),
        }
    }
}

/// How `positions.board_encoding` is to be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionEncoding {
    /// Forsyth-Edwards Notation
    Fen,
    /// Space-separated UCI moves from the initial position
    Moves,
}

impl PositionEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionEncoding::Fen => "fen",
            PositionEncoding::Moves => "moves",
        }
    }
}

impl FromStr for PositionEncoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fen" => Ok(PositionEncoding::Fen),
            "moves" => Ok(PositionEncoding::Moves),
            other => Err(Error::InvalidInput(format!("Unknown position encoding '{}'", other))),
        }
    }
}

/// Trained network checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub network_id: String,
    pub local_path: Option<String>,
    /// SHA-256 of the weight file, lowercase hex
    pub checksum: Option<String>,
    pub downloaded_at: Option<String>,
}

impl Network {
    pub fn new(network_id: impl Into<String>) -> Self {
        Self {
            network_id: network_id.into(),
            local_path: None,
            checksum: None,
            downloaded_at: None,
        }
    }
}

/// Chess position to evaluate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub position_id: String,
    pub board_encoding: String,
    pub encoding: PositionEncoding,
    /// Free-form JSON (move number, source tag, ...)
    pub metadata: Option<serde_json::Value>,
}

impl Position {
    pub fn fen(position_id: impl Into<String>, fen: impl Into<String>) -> Self {
        Self {
            position_id: position_id.into(),
            board_encoding: fen.into(),
            encoding: PositionEncoding::Fen,
            metadata: None,
        }
    }

    pub fn moves(position_id: impl Into<String>, moves: impl Into<String>) -> Self {
        Self {
            position_id: position_id.into(),
            board_encoding: moves.into(),
            encoding: PositionEncoding::Moves,
            metadata: None,
        }
    }

    /// Initial position
    pub fn startpos(position_id: impl Into<String>) -> Self {
        Self::moves(position_id, "")
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_round_trip() {
        for status in [JobStatus::Pending, JobStatus::InProgress, JobStatus::Done, JobStatus::Failed] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("running".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_job_status_serde_matches_column_values() {
        assert_eq!(serde_json::to_string(&JobStatus::InProgress).unwrap(), "\"in_progress\"");
    }

    #[test]
    fn test_startpos_is_empty_move_list() {
        let position = Position::startpos("startpos");
        assert_eq!(position.encoding, PositionEncoding::Moves);
        assert!(position.board_encoding.is_empty());
    }
}
