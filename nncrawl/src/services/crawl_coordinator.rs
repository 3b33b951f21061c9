//! Crawl coordinator
//!
//! Runs `worker_count` workers over the job table until no claimable work is
//! left. Each worker loops claim → resolve weights → evaluate → persist.
//! Per-job failures are written back with `fail` and the run goes on;
//! storage failures cancel the other workers and end the run.

use crate::db::{networks, positions, Completion, JobRepository};
use crate::error::{CrawlError, CrawlResult};
use crate::models::{EvaluationResult, Job, JobCounts, JobStatus, SearchBudget, WorkerPhase, WorkerState};
use crate::services::engine_runner::{EngineError, Evaluator};
use crate::services::weight_store::WeightStore;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shortest sleep while waiting for a retry backoff to expire
const MIN_RETRY_WAIT: Duration = Duration::from_millis(10);

/// Engine output kept in a failure message
const MAX_RAW_OUTPUT_IN_MESSAGE: usize = 2000;

/// Coordinator settings
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub worker_count: usize,
    /// In-progress claims older than this are reset before the run
    pub claim_timeout: Duration,
    pub search_budget: SearchBudget,
}

/// Outcome of one crawl run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    pub claimed: u64,
    pub completed: u64,
    /// Attempts that failed and went back to pending
    pub retried: u64,
    /// Jobs that exhausted their attempts during this run
    pub failed: u64,
    /// Claim conflicts and result mismatches
    pub conflicts: u64,
    /// Stale claims reset at startup
    pub reaped: u64,
    pub cancelled: bool,
    /// Repository counts after the run
    pub counts: JobCounts,
}

#[derive(Default)]
struct RunCounters {
    claimed: AtomicU64,
    completed: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    conflicts: AtomicU64,
}

impl RunCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Orchestrates the crawl loop
pub struct CrawlCoordinator {
    repo: JobRepository,
    weights: Arc<WeightStore>,
    evaluator: Arc<dyn Evaluator>,
    settings: CrawlSettings,
}

impl CrawlCoordinator {
    pub fn new(
        repo: JobRepository,
        weights: Arc<WeightStore>,
        evaluator: Arc<dyn Evaluator>,
        settings: CrawlSettings,
    ) -> Self {
        Self {
            repo,
            weights,
            evaluator,
            settings,
        }
    }

    pub fn repository(&self) -> &JobRepository {
        &self.repo
    }

    /// Run until drained, cancelled, or a fatal error
    pub async fn run(&self, cancel: CancellationToken) -> CrawlResult<CrawlSummary> {
        let started = Instant::now();
        let reaped = self.repo.reap_stale_claims(self.settings.claim_timeout).await?;

        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let worker_count = self.settings.worker_count.max(1);
        info!(
            run_id = %&run_id[..8],
            workers = worker_count,
            budget = %self.settings.search_budget,
            reaped,
            "Starting crawl"
        );

        let workers_cancel = cancel.child_token();
        let counters = RunCounters::default();

        let mut workers = FuturesUnordered::new();
        for index in 0..worker_count {
            let worker_id = format!("{}-{}", &run_id[..8], index);
            workers.push(self.worker(worker_id, &workers_cancel, &counters));
        }

        let mut fatal: Option<CrawlError> = None;
        while let Some(outcome) = workers.next().await {
            if let Err(e) = outcome {
                error!(error = %e, "Fatal crawl error, stopping workers");
                workers_cancel.cancel();
                fatal.get_or_insert(e);
            }
        }
        drop(workers);

        if let Some(e) = fatal {
            return Err(e);
        }

        let counts = self.repo.status_counts().await?;
        let summary = CrawlSummary {
            claimed: counters.claimed.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            retried: counters.retried.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            conflicts: counters.conflicts.load(Ordering::Relaxed),
            reaped,
            cancelled: cancel.is_cancelled(),
            counts,
        };

        info!(
            claimed = summary.claimed,
            completed = summary.completed,
            retried = summary.retried,
            failed = summary.failed,
            conflicts = summary.conflicts,
            done_total = counts.done,
            failed_total = counts.failed,
            cancelled = summary.cancelled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Crawl finished"
        );
        Ok(summary)
    }

    async fn worker(
        &self,
        worker_id: String,
        cancel: &CancellationToken,
        counters: &RunCounters,
    ) -> CrawlResult<()> {
        let mut state = WorkerState::new(worker_id);

        loop {
            if cancel.is_cancelled() {
                debug!(worker_id = %state.worker_id, "Worker cancelled");
                return Ok(());
            }

            let job = match self.repo.claim_next(&state.worker_id).await? {
                Some(job) => job,
                None => {
                    if self.wait_for_retry(&state, cancel).await? {
                        continue;
                    }
                    self.transition(&mut state, WorkerPhase::Drained);
                    return Ok(());
                }
            };

            RunCounters::bump(&counters.claimed);
            self.transition(&mut state, WorkerPhase::Claimed { job_id: job.job_id });

            let outcome = self.process(&mut state, &job).await;
            self.transition(&mut state, WorkerPhase::Persisting { job_id: job.job_id });

            match outcome {
                Ok(result) => self.persist_success(&job, &result, counters).await?,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => self.persist_failure(&job, &e, counters).await?,
            }

            self.transition(&mut state, WorkerPhase::Idle);
        }
    }

    /// Sleep until the earliest retry backoff expires
    ///
    /// Returns false when no pending job is waiting on a backoff.
    async fn wait_for_retry(&self, state: &WorkerState, cancel: &CancellationToken) -> CrawlResult<bool> {
        let Some(retry_at) = self.repo.next_retry_at().await? else {
            return Ok(false);
        };

        let wait = (retry_at - Utc::now())
            .to_std()
            .unwrap_or_default()
            .max(MIN_RETRY_WAIT);
        debug!(
            worker_id = %state.worker_id,
            wait_ms = wait.as_millis() as u64,
            "Waiting for job retry backoff"
        );

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = cancel.cancelled() => {}
        }
        Ok(true)
    }

    /// Resolve and evaluate one claimed job
    async fn process(&self, state: &mut WorkerState, job: &Job) -> CrawlResult<EvaluationResult> {
        let pool = self.repo.pool();

        let position = positions::get_position(pool, &job.position_id)
            .await?
            .ok_or_else(|| CrawlError::InvalidJob {
                job_id: job.job_id,
                reason: format!("position '{}' not found", job.position_id),
            })?;
        let network = networks::get_network(pool, &job.network_id)
            .await?
            .ok_or_else(|| CrawlError::InvalidJob {
                job_id: job.job_id,
                reason: format!("network '{}' not found", job.network_id),
            })?;

        self.transition(
            state,
            WorkerPhase::Resolving {
                job_id: job.job_id,
                network_id: job.network_id.clone(),
            },
        );
        // Held until the engine is done with the file
        let weights = self
            .weights
            .lease(&job.network_id, network.checksum.as_deref())
            .await?;

        if weights.downloaded {
            networks::record_download(pool, &job.network_id, &weights.path, &weights.checksum).await?;
        } else if network.local_path.is_none() {
            networks::record_cached(pool, &job.network_id, &weights.path, &weights.checksum).await?;
        }

        self.transition(state, WorkerPhase::Evaluating { job_id: job.job_id });
        let result = self
            .evaluator
            .evaluate(&weights.path, &position, &self.settings.search_budget)
            .await?;

        Ok(result)
    }

    async fn persist_success(
        &self,
        job: &Job,
        result: &EvaluationResult,
        counters: &RunCounters,
    ) -> CrawlResult<()> {
        match self.repo.complete(job.job_id, result).await {
            Ok(Completion::Completed) => {
                RunCounters::bump(&counters.completed);
                info!(
                    job_id = job.job_id,
                    network_id = %job.network_id,
                    position_id = %job.position_id,
                    score = result.score,
                    best_move = %result.best_move,
                    "Job done"
                );
                Ok(())
            }
            Ok(Completion::AlreadyDone) => {
                debug!(job_id = job.job_id, "Job was already done with this result");
                Ok(())
            }
            Err(e) if e.is_conflict() => {
                RunCounters::bump(&counters.conflicts);
                warn!(job_id = job.job_id, error = %e, "Could not complete job");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn persist_failure(&self, job: &Job, err: &CrawlError, counters: &RunCounters) -> CrawlResult<()> {
        let kind = err.kind();
        let message = failure_message(err);

        match self.repo.fail(job.job_id, kind, &message).await {
            Ok(status) => {
                if status == JobStatus::Failed {
                    RunCounters::bump(&counters.failed);
                } else {
                    RunCounters::bump(&counters.retried);
                }
                warn!(
                    job_id = job.job_id,
                    network_id = %job.network_id,
                    position_id = %job.position_id,
                    attempt = job.attempt_count,
                    error_kind = %kind,
                    new_status = %status,
                    error = %err,
                    "Job attempt failed"
                );
                Ok(())
            }
            Err(e) if e.is_conflict() => {
                RunCounters::bump(&counters.conflicts);
                warn!(job_id = job.job_id, error = %e, "Could not record job failure");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn transition(&self, state: &mut WorkerState, phase: WorkerPhase) {
        let transition = state.transition_to(phase);
        debug!(
            worker_id = %transition.worker_id,
            from = %transition.old_phase,
            to = %transition.new_phase,
            "Worker phase"
        );
    }
}

/// Error text stored in `last_error_message`, with the tail of any engine output
fn failure_message(err: &CrawlError) -> String {
    let raw_output = match err {
        CrawlError::Engine(e @ (EngineError::Parse { .. } | EngineError::Timeout { .. })) => e.raw_output(),
        _ => None,
    };

    match raw_output.filter(|raw| !raw.trim().is_empty()) {
        Some(raw) => {
            let mut start = raw.len().saturating_sub(MAX_RAW_OUTPUT_IN_MESSAGE);
            while !raw.is_char_boundary(start) {
                start += 1;
            }
            format!("{}\n--- engine output ---\n{}", err, &raw[start..])
        }
        None => err.to_string(),
    }
}
