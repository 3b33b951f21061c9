//! Engine evaluation results
//!
//! Serialized as JSON into `jobs.result_json`. Optional fields are omitted
//! when absent so that a minimal result (score + best move) stays minimal.

use serde::{Deserialize, Serialize};

/// Score (pawns) recorded for a forced mate, signed from the side to move
pub const MATE_SCORE: f64 = 1000.0;

/// Structured output of one engine run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Evaluation in pawns from the side to move (`cp N` → `N / 100`)
    pub score: f64,

    /// Best move in UCI notation
    pub best_move: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ponder: Option<String>,

    /// Moves to mate (negative when the side to move is mated)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mate: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wdl: Option<Wdl>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seldepth: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u64>,

    /// Root node statistics (lc0 `node` line)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<MoveStats>,

    /// Per-move statistics (lc0 `VerboseMoveStats`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub moves: Vec<MoveStats>,

    /// Engine stdout of the budgeted search, kept so results can be reparsed later
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw_output: String,
}

impl EvaluationResult {
    pub fn new(score: f64, best_move: impl Into<String>) -> Self {
        Self {
            score,
            best_move: best_move.into(),
            ..Self::default()
        }
    }

    /// Statistics for one move, if the engine reported them
    pub fn move_stats(&self, mv: &str) -> Option<&MoveStats> {
        self.moves.iter().find(|m| m.mv == mv)
    }
}

/// Win/draw/loss expectation in per-mille (UCI `wdl W D L`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wdl {
    pub win: u32,
    pub draw: u32,
    pub loss: u32,
}

/// lc0 verbose statistics for one root move
///
/// Values the engine prints as `-.-` (unvisited) are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MoveStats {
    #[serde(rename = "move")]
    pub mv: String,
    /// Visit count (`N:`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visits: Option<u64>,
    /// Prior policy as a fraction in 0..=1 (`P:` is printed in percent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<f64>,
    /// Untempered network policy from the single-node pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_policy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<f64>,
    /// Win minus loss (`WL:`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wl: Option<f64>,
    /// Draw probability (`D:`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<f64>,
    /// Win probability, `(WL - D + 1) / 2`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<f64>,
    /// Loss probability, `1 - D - W`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l: Option<f64>,
    /// Moves left estimate (`M:`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub m: Option<f64>,
    /// Network value head (`V:`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v: Option<f64>,
}

impl MoveStats {
    /// Fill `w` and `l` from `wl` and `d`; both stay `None` unless both inputs are known
    pub fn derive_wdl(&mut self) {
        let (Some(wl), Some(d)) = (self.wl, self.d) else {
            self.w = None;
            self.l = None;
            return;
        };
        let w = (wl - d + 1.0) / 2.0;
        self.w = Some(w);
        self.l = Some(1.0 - d - w);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_result_json() {
        let result = EvaluationResult::new(0.12, "e2e4");
        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(json, r#"{"score":0.12,"best_move":"e2e4"}"#);

        let parsed: EvaluationResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, result);
    }

    #[test]
    fn test_wdl_derivation() {
        let mut stats = MoveStats {
            mv: "e2e4".to_string(),
            wl: Some(0.2),
            d: Some(0.4),
            ..MoveStats::default()
        };
        stats.derive_wdl();
        let w = stats.w.unwrap();
        let l = stats.l.unwrap();
        assert!((w - 0.4).abs() < 1e-9);
        assert!((l - 0.2).abs() < 1e-9);
        assert!((w + stats.d.unwrap() + l - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_wdl_needs_both_inputs() {
        let mut stats = MoveStats {
            mv: "d2d4".to_string(),
            wl: Some(0.1),
            ..MoveStats::default()
        };
        stats.derive_wdl();
        assert!(stats.w.is_none());
        assert!(stats.l.is_none());
    }

    #[test]
    fn test_derived_wdl_serialized_per_move() {
        let mut stats = MoveStats {
            mv: "c2c4".to_string(),
            wl: Some(0.1),
            d: Some(0.5),
            raw_policy: Some(0.25),
            ..MoveStats::default()
        };
        stats.derive_wdl();
        let json = serde_json::to_value(&stats).unwrap();
        assert!((json["w"].as_f64().unwrap() - 0.3).abs() < 1e-9);
        assert!((json["l"].as_f64().unwrap() - 0.2).abs() < 1e-9);
        assert_eq!(json["raw_policy"], 0.25);

        let parsed: MoveStats = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, stats);
    }

    #[test]
    fn test_move_field_renamed() {
        let stats = MoveStats {
            mv: "g1f3".to_string(),
            visits: Some(3),
            ..MoveStats::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["move"], "g1f3");
        assert_eq!(json["visits"], 3);
    }
}
