//! Data models for the crawler
//!
//! Row models shared with other crates (`Network`, `Position`, `JobStatus`)
//! live in `nncrawl_common::db::models` and are re-exported here.

pub mod evaluation;
pub mod job;
pub mod search_budget;
pub mod worker_phase;

pub use evaluation::{EvaluationResult, MoveStats, Wdl, MATE_SCORE};
pub use job::{Job, JobCounts};
pub use nncrawl_common::db::models::{JobStatus, Network, Position, PositionEncoding};
pub use search_budget::SearchBudget;
pub use worker_phase::{PhaseTransition, WorkerPhase, WorkerState};
