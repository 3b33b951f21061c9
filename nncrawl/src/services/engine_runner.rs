//! External engine runner
//!
//! Each engine session is one process: spawn, UCI handshake, load the
//! network, search the position, collect stdout until `bestmove`, quit.
//! An evaluation is an optional single-node raw policy session followed by
//! the budgeted search. Both together are bounded by the engine timeout and
//! every child is reaped before returning.

use crate::error::ErrorKind;
use crate::models::{EvaluationResult, MoveStats, Position, PositionEncoding, SearchBudget};
use crate::services::uci_parser::{self, UciLine};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, trace, warn};

/// Time allowed for the engine to exit after `quit`
const QUIT_GRACE: Duration = Duration::from_secs(2);

/// lc0 options for reading the untempered network policy
pub const RAW_POLICY_OPTIONS: &[(&str, &str)] = &[
    ("VerboseMoveStats", "true"),
    ("NodesAsPlayouts", "true"),
    ("SmartPruningFactor", "0"),
    ("PolicyTemperature", "1.0"),
    ("MinibatchSize", "1"),
];

const RAW_POLICY_GO: &str = "go nodes 1";

/// Engine runner errors
#[derive(Debug, Error)]
pub enum EngineError {
    /// Output did not follow the UCI grammar or lacked a score/bestmove
    #[error("Engine output parse error: {message}")]
    Parse { message: String, raw_output: String },

    #[error("Engine timed out after {after:?}")]
    Timeout { after: Duration, raw_output: String },

    /// Spawn failure, broken pipe, early exit
    #[error("Engine process error: {0}")]
    Process(String),

    /// Position cannot be sent to the engine
    #[error("Invalid position: {0}")]
    InvalidPosition(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Parse { .. } => ErrorKind::ParseError,
            EngineError::Timeout { .. } => ErrorKind::TimeoutError,
            EngineError::Process(_) => ErrorKind::ProcessError,
            EngineError::InvalidPosition(_) => ErrorKind::InvalidJob,
        }
    }

    /// Engine stdout captured before the failure, if any
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            EngineError::Parse { raw_output, .. } | EngineError::Timeout { raw_output, .. } => {
                Some(raw_output)
            }
            _ => None,
        }
    }
}

/// Evaluates one position under one network
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(
        &self,
        network_path: &Path,
        position: &Position,
        budget: &SearchBudget,
    ) -> Result<EvaluationResult, EngineError>;
}

/// Engine process settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub engine_path: PathBuf,
    pub engine_args: Vec<String>,
    /// UCI options sent after `WeightsFile` for the budgeted search
    pub options: BTreeMap<String, String>,
    /// Run a `go nodes 1` session with [`RAW_POLICY_OPTIONS`] before the search
    pub raw_policy_pass: bool,
    /// Limit for one whole evaluation, both sessions included
    pub timeout: Duration,
}

impl EngineConfig {
    pub fn new(engine_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            engine_path: engine_path.into(),
            engine_args: Vec::new(),
            options: BTreeMap::new(),
            raw_policy_pass: false,
            timeout,
        }
    }
}

/// [`Evaluator`] driving a UCI engine subprocess
#[derive(Debug, Clone)]
pub struct UciEngineRunner {
    config: EngineConfig,
}

impl UciEngineRunner {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn spawn(&self) -> Result<Child, EngineError> {
        Command::new(&self.config.engine_path)
            .args(&self.config.engine_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EngineError::Process(format!(
                    "Failed to spawn {}: {}",
                    self.config.engine_path.display(),
                    e
                ))
            })
    }

    /// Run one engine session, returning its stdout transcript
    ///
    /// The child is killed on timeout or session error and reaped in every
    /// case before this returns.
    /// `started` is the start of the evaluation; the engine timeout counts from there.
    async fn run_session(&self, script: &SessionScript, started: Instant) -> Result<String, EngineError> {
        let mut child = self.spawn()?;
        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill().await;
                return Err(EngineError::Process("Engine stdio not captured".to_string()));
            }
        };

        let mut session = UciSession {
            stdin,
            reader: BufReader::new(stdout),
            lines_read: 0,
            transcript: String::new(),
        };

        let remaining = self.config.timeout.saturating_sub(started.elapsed());
        let outcome = tokio::time::timeout(remaining, session.run(script)).await;

        let (ended, raw_output) = match outcome {
            Err(_) => {
                warn!(
                    engine = %self.config.engine_path.display(),
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    go = %script.go,
                    "Engine timed out, killing"
                );
                let _ = child.kill().await;
                return Err(EngineError::Timeout {
                    after: self.config.timeout,
                    raw_output: session.transcript,
                });
            }
            Ok(Err(e)) => {
                let _ = child.kill().await;
                return Err(e);
            }
            Ok(Ok(ended)) => (ended, session.into_transcript()),
        };

        let status = match tokio::time::timeout(QUIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to reap engine process");
                None
            }
            Err(_) => {
                debug!("Engine ignored quit, killing");
                let _ = child.kill().await;
                None
            }
        };

        if ended == SessionEnd::Eof {
            if let Some(status) = status.filter(|s| !s.success()) {
                return Err(EngineError::Process(format!(
                    "Engine exited with {} before bestmove",
                    status
                )));
            }
        }

        Ok(raw_output)
    }

    /// Per-move policy from a single-node search with untempered policy
    async fn raw_policy(
        &self,
        network_path: &Path,
        position_cmd: &str,
        started: Instant,
    ) -> Result<Vec<MoveStats>, EngineError> {
        let script = SessionScript {
            setup: setup_commands(network_path, &raw_policy_options()),
            position: position_cmd.to_string(),
            go: RAW_POLICY_GO.to_string(),
        };
        let raw_output = self.run_session(&script, started).await?;

        uci_parser::parse_policy_output(&raw_output).map_err(|e| EngineError::Parse {
            message: format!("raw policy pass: {}", e),
            raw_output,
        })
    }
}

#[async_trait]
impl Evaluator for UciEngineRunner {
    async fn evaluate(
        &self,
        network_path: &Path,
        position: &Position,
        budget: &SearchBudget,
    ) -> Result<EvaluationResult, EngineError> {
        let position_cmd = position_command(position)?;
        let started = Instant::now();

        let raw_policy = if self.config.raw_policy_pass {
            Some(self.raw_policy(network_path, &position_cmd, started).await?)
        } else {
            None
        };

        let script = SessionScript {
            setup: setup_commands(network_path, &self.config.options),
            position: position_cmd,
            go: budget.go_command(),
        };
        let raw_output = self.run_session(&script, started).await?;

        let mut result = uci_parser::parse_output(&raw_output).map_err(|e| EngineError::Parse {
            message: e.to_string(),
            raw_output: raw_output.clone(),
        })?;
        if let Some(raw_policy) = raw_policy {
            merge_raw_policy(&mut result, raw_policy);
        }

        debug!(
            best_move = %result.best_move,
            score = result.score,
            nodes = ?result.nodes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Engine evaluation finished"
        );
        Ok(result)
    }
}

fn raw_policy_options() -> BTreeMap<String, String> {
    RAW_POLICY_OPTIONS
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

/// `setoption` commands: `WeightsFile` first, then `options` in name order
fn setup_commands(network_path: &Path, options: &BTreeMap<String, String>) -> Vec<String> {
    let mut commands = vec![format!(
        "setoption name WeightsFile value {}",
        network_path.display()
    )];
    commands.extend(
        options
            .iter()
            .map(|(name, value)| format!("setoption name {} value {}", name, value)),
    );
    commands
}

/// Attach single-node policy values to the searched move statistics
fn merge_raw_policy(result: &mut EvaluationResult, raw_policy: Vec<MoveStats>) {
    for raw in raw_policy {
        match result.moves.iter_mut().find(|m| m.mv == raw.mv) {
            Some(stats) => stats.raw_policy = raw.policy,
            None => result.moves.push(MoveStats {
                mv: raw.mv,
                raw_policy: raw.policy,
                ..MoveStats::default()
            }),
        }
    }
}

/// UCI `position` command for a stored position
pub fn position_command(position: &Position) -> Result<String, EngineError> {
    let encoding = position.board_encoding.trim();
    if encoding.contains(['\n', '\r']) {
        return Err(EngineError::InvalidPosition(format!(
            "position '{}' contains a line break",
            position.position_id
        )));
    }

    match position.encoding {
        PositionEncoding::Fen if encoding.is_empty() => Err(EngineError::InvalidPosition(format!(
            "position '{}' has an empty FEN",
            position.position_id
        ))),
        PositionEncoding::Fen => Ok(format!("position fen {}", encoding)),
        PositionEncoding::Moves => {
            let mut moves = encoding.split_whitespace().peekable();
            if moves.peek() == Some(&"startpos") {
                moves.next();
            }
            if moves.peek() == Some(&"moves") {
                moves.next();
            }
            let moves: Vec<&str> = moves.collect();
            if moves.is_empty() {
                Ok("position startpos".to_string())
            } else {
                Ok(format!("position startpos moves {}", moves.join(" ")))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    BestMove,
    Eof,
}

struct SessionScript {
    setup: Vec<String>,
    position: String,
    go: String,
}

struct UciSession {
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    lines_read: usize,
    transcript: String,
}

impl UciSession {
    async fn run(&mut self, script: &SessionScript) -> Result<SessionEnd, EngineError> {
        self.send("uci").await?;
        self.wait_for(UciLine::UciOk, "uciok").await?;

        for command in &script.setup {
            self.send(command).await?;
        }
        self.send("isready").await?;
        self.wait_for(UciLine::ReadyOk, "readyok").await?;

        self.send("ucinewgame").await?;
        self.send(&script.position).await?;
        self.send(&script.go).await?;

        loop {
            let Some(line) = self.next_line().await? else {
                return Ok(SessionEnd::Eof);
            };
            if matches!(uci_parser::parse_line(&line), Ok(UciLine::BestMove { .. })) {
                // Engine may already be gone; the result is complete either way
                let _ = self.send("quit").await;
                return Ok(SessionEnd::BestMove);
            }
        }
    }

    async fn send(&mut self, command: &str) -> Result<(), EngineError> {
        trace!(command, "-> engine");
        self.stdin
            .write_all(format!("{}\n", command).as_bytes())
            .await
            .map_err(|e| EngineError::Process(format!("Write '{}' failed: {}", command, e)))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| EngineError::Process(format!("Flush '{}' failed: {}", command, e)))
    }

    /// Next stdout line without its line ending; `None` at end of output
    ///
    /// A line that is not valid UTF-8 is kept (lossily decoded) in the
    /// transcript and ends the session with a parse error.
    async fn next_line(&mut self) -> Result<Option<String>, EngineError> {
        let mut buf = Vec::new();
        let read = self
            .reader
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| EngineError::Process(format!("Read engine output failed: {}", e)))?;
        if read == 0 {
            return Ok(None);
        }

        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        self.lines_read += 1;

        match String::from_utf8(buf) {
            Ok(line) => {
                self.record(&line);
                Ok(Some(line))
            }
            Err(e) => {
                let lossy = String::from_utf8_lossy(e.as_bytes()).into_owned();
                self.record(&lossy);
                Err(EngineError::Parse {
                    message: format!("line {}: output is not valid UTF-8", self.lines_read),
                    raw_output: self.transcript.clone(),
                })
            }
        }
    }

    fn record(&mut self, line: &str) {
        trace!(line = %line, "<- engine");
        self.transcript.push_str(line);
        self.transcript.push('\n');
    }

    async fn wait_for(&mut self, expected: UciLine, name: &str) -> Result<(), EngineError> {
        loop {
            match self.next_line().await? {
                Some(line) => {
                    if uci_parser::parse_line(&line).ok().as_ref() == Some(&expected) {
                        return Ok(());
                    }
                }
                None => {
                    return Err(EngineError::Process(format!(
                        "Engine closed output before '{}'",
                        name
                    )))
                }
            }
        }
    }

    fn into_transcript(self) -> String {
        self.transcript
    }
}
