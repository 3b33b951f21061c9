//! Evaluator stub that counts invocations

use async_trait::async_trait;
use nncrawl::models::{EvaluationResult, Position, SearchBudget};
use nncrawl::services::{EngineError, Evaluator};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

type Responder = Box<dyn Fn(&Position) -> Result<EvaluationResult, EngineError> + Send + Sync>;

pub struct StubEvaluator {
    responder: Responder,
    calls: AtomicUsize,
    seen_paths: Mutex<Vec<PathBuf>>,
}

impl StubEvaluator {
    /// Always `{score: 0.12, best_move: "e2e4"}`
    pub fn fixed() -> Self {
        Self::with(|_| Ok(EvaluationResult::new(0.12, "e2e4")))
    }

    /// Always a parse error
    pub fn failing() -> Self {
        Self::with(|_| {
            Err(EngineError::Parse {
                message: "missing score".to_string(),
                raw_output: "bestmove e2e4\n".to_string(),
            })
        })
    }

    pub fn with<F>(responder: F) -> Self
    where
        F: Fn(&Position) -> Result<EvaluationResult, EngineError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            seen_paths: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_paths(&self) -> Vec<PathBuf> {
        self.seen_paths.lock().unwrap().clone()
    }
}

#[async_trait]
impl Evaluator for StubEvaluator {
    async fn evaluate(
        &self,
        network_path: &Path,
        position: &Position,
        _budget: &SearchBudget,
    ) -> Result<EvaluationResult, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_paths.lock().unwrap().push(network_path.to_path_buf());
        (self.responder)(position)
    }
}
