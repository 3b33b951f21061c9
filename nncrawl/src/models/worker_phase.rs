//! Crawl worker state machine
//!
//! One iteration moves a worker through
//! IDLE → CLAIMED → RESOLVING → EVALUATING → PERSISTING → IDLE.
//! A worker that finds no claimable work and nothing waiting on a retry
//! backoff ends in DRAINED.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-iteration phase of a crawl worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerPhase {
    /// Waiting to claim
    Idle,
    /// Holding a job claim
    Claimed { job_id: i64 },
    /// Making sure the network weights are present locally
    Resolving { job_id: i64, network_id: String },
    /// Engine subprocess running
    Evaluating { job_id: i64 },
    /// Writing the outcome back to the repository
    Persisting { job_id: i64 },
    /// No claimable work left (terminal)
    Drained,
}

impl WorkerPhase {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerPhase::Idle => "IDLE",
            WorkerPhase::Claimed { .. } => "CLAIMED",
            WorkerPhase::Resolving { .. } => "RESOLVING",
            WorkerPhase::Evaluating { .. } => "EVALUATING",
            WorkerPhase::Persisting { .. } => "PERSISTING",
            WorkerPhase::Drained => "DRAINED",
        }
    }

    /// Whether moving from `self` to `next` follows the iteration order
    pub fn can_transition_to(&self, next: &WorkerPhase) -> bool {
        use WorkerPhase::*;
        match (self, next) {
            (Drained, _) => false,
            (Idle, Claimed { .. }) | (Idle, Drained) | (Idle, Idle) => true,
            (Claimed { .. }, Resolving { .. }) => true,
            (Resolving { .. }, Evaluating { .. }) => true,
            (Evaluating { .. }, Persisting { .. }) => true,
            // Any job-holding phase may record an outcome and go back to idle
            (Claimed { .. }, Persisting { .. }) | (Resolving { .. }, Persisting { .. }) => true,
            (Persisting { .. }, Idle) => true,
            _ => false,
        }
    }
}

impl fmt::Display for WorkerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Phase change emitted by a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTransition {
    pub worker_id: String,
    pub old_phase: WorkerPhase,
    pub new_phase: WorkerPhase,
}

/// A worker's identity and current phase
#[derive(Debug, Clone)]
pub struct WorkerState {
    pub worker_id: String,
    pub phase: WorkerPhase,
}

impl WorkerState {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            phase: WorkerPhase::Idle,
        }
    }

    /// Move to `new_phase`, returning the transition for logging
    pub fn transition_to(&mut self, new_phase: WorkerPhase) -> PhaseTransition {
        debug_assert!(
            self.phase.can_transition_to(&new_phase),
            "invalid worker transition {} -> {}",
            self.phase,
            new_phase
        );
        let old_phase = std::mem::replace(&mut self.phase, new_phase.clone());
        PhaseTransition {
            worker_id: self.worker_id.clone(),
            old_phase,
            new_phase,
        }
    }
}
