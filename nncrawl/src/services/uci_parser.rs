//! UCI engine output parser
//!
//! Every non-empty stdout line must be a handshake line (`id`, `option`,
//! `uciok`, `readyok`, `copyprotection`, `registration`), an `info` line or
//! the terminal `bestmove`. Anything else is rejected, as are unknown `info`
//! keys and malformed values.
//!
//! `info string` text starting with a move (or `node`, for the root) carries
//! lc0 `VerboseMoveStats` output:
//!
//! ```text
//! info string e2e4  (322 ) N:     412 (+ 3) (P: 13.97%) (WL:  0.04062) (D:  0.451) (M: 118.2) (Q:  0.04062) (U: 0.01107) (S:  0.05169) (V:  0.0395)
//! ```

use crate::models::{EvaluationResult, MoveStats, Wdl, MATE_SCORE};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

static STAT_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\((\w+):\s*([\-\.0-9%]*)\)").expect("stat group pattern"));
static VISITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bN:\s*(\d+)").expect("visits pattern"));
static UCI_MOVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-h][1-8][a-h][1-8][qrbn]?$").expect("move pattern"));

/// Integer-valued `info` keys
const INTEGER_KEYS: &[&str] = &[
    "depth",
    "seldepth",
    "time",
    "nodes",
    "nps",
    "hashfull",
    "tbhits",
    "multipv",
    "cpuload",
    "currmovenumber",
    "movesleft",
];

/// Parse failure, with the 1-based line it occurred on (0 for whole-output errors)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UciParseError {
    pub line: usize,
    pub message: String,
}

impl UciParseError {
    fn at(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for UciParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line > 0 {
            write!(f, "line {}: {}", self.line, self.message)
        } else {
            f.write_str(&self.message)
        }
    }
}

impl std::error::Error for UciParseError {}

/// Score as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    /// Centipawns
    Cp(i32),
    /// Moves to mate; negative when the side to move is mated
    Mate(i32),
}

impl Score {
    /// Score in pawns, mates mapped to ±[`MATE_SCORE`]
    pub fn pawns(&self) -> f64 {
        match *self {
            Score::Cp(cp) => f64::from(cp) / 100.0,
            Score::Mate(n) if n > 0 => MATE_SCORE,
            Score::Mate(_) => -MATE_SCORE,
        }
    }
}

/// One parsed `info` line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfoLine {
    pub depth: Option<u32>,
    pub seldepth: Option<u32>,
    pub nodes: Option<u64>,
    pub multipv: Option<u32>,
    pub score: Option<Score>,
    pub wdl: Option<Wdl>,
    pub pv: Vec<String>,
    pub string: Option<String>,
}

impl InfoLine {
    fn is_main_line(&self) -> bool {
        self.multipv.map_or(true, |n| n == 1)
    }
}

/// Classified output line
#[derive(Debug, Clone, PartialEq)]
pub enum UciLine {
    /// `id`, `option`, `copyprotection`, `registration`
    Handshake,
    UciOk,
    ReadyOk,
    Info(InfoLine),
    BestMove { best: String, ponder: Option<String> },
}

/// Classify one output line
pub fn parse_line(line: &str) -> Result<UciLine, String> {
    let line = line.trim();
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim_start()),
        None => (line, ""),
    };

    match command {
        "id" | "option" | "copyprotection" | "registration" => Ok(UciLine::Handshake),
        "uciok" if rest.is_empty() => Ok(UciLine::UciOk),
        "readyok" if rest.is_empty() => Ok(UciLine::ReadyOk),
        "info" => parse_info(rest).map(UciLine::Info),
        "bestmove" => parse_bestmove(rest),
        _ => Err(format!("unrecognized line '{}'", line)),
    }
}

fn parse_bestmove(rest: &str) -> Result<UciLine, String> {
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    match tokens.as_slice() {
        [best] => Ok(UciLine::BestMove {
            best: best.to_string(),
            ponder: None,
        }),
        [best, "ponder", ponder] => Ok(UciLine::BestMove {
            best: best.to_string(),
            ponder: Some(ponder.to_string()),
        }),
        _ => Err(format!("malformed bestmove '{}'", rest)),
    }
}

fn parse_int<T: std::str::FromStr>(key: &str, value: Option<&str>) -> Result<T, String> {
    let value = value.ok_or_else(|| format!("missing value for '{}'", key))?;
    value
        .parse()
        .map_err(|_| format!("invalid value '{}' for '{}'", value, key))
}

/// Byte offset just past `token` within `line` (token must be a subslice)
fn offset_after(line: &str, token: &str) -> usize {
    token.as_ptr() as usize - line.as_ptr() as usize + token.len()
}

/// Parse the key/value pairs following `info`
pub fn parse_info(rest: &str) -> Result<InfoLine, String> {
    let mut info = InfoLine::default();
    let mut tokens = rest.split_whitespace();

    while let Some(key) = tokens.next() {
        match key {
            "depth" => info.depth = Some(parse_int(key, tokens.next())?),
            "seldepth" => info.seldepth = Some(parse_int(key, tokens.next())?),
            "nodes" => info.nodes = Some(parse_int(key, tokens.next())?),
            "multipv" => info.multipv = Some(parse_int(key, tokens.next())?),
            k if INTEGER_KEYS.contains(&k) => {
                parse_int::<i64>(key, tokens.next())?;
            }
            "score" => {
                let score = match tokens.next() {
                    Some("cp") => Score::Cp(parse_int("score cp", tokens.next())?),
                    Some("mate") => Score::Mate(parse_int("score mate", tokens.next())?),
                    other => return Err(format!("invalid score type {:?}", other)),
                };
                info.score = Some(score);

                // Optional bound marker, anything else is the next key
                let mut lookahead = tokens.clone();
                if matches!(lookahead.next(), Some("lowerbound") | Some("upperbound")) {
                    tokens = lookahead;
                }
            }
            "wdl" => {
                info.wdl = Some(Wdl {
                    win: parse_int("wdl", tokens.next())?,
                    draw: parse_int("wdl", tokens.next())?,
                    loss: parse_int("wdl", tokens.next())?,
                });
            }
            "currmove" => {
                tokens.next().ok_or("missing value for 'currmove'")?;
            }
            "pv" | "refutation" | "currline" => {
                let moves: Vec<String> = tokens.by_ref().map(str::to_string).collect();
                if key == "pv" {
                    info.pv = moves;
                }
            }
            "string" => {
                info.string = Some(rest[offset_after(rest, key)..].trim().to_string());
                break;
            }
            other => return Err(format!("unknown info key '{}'", other)),
        }
    }

    Ok(info)
}

/// Parse lc0 verbose move statistics from `info string` text
///
/// Returns `None` for informational strings (not starting with a move or
/// `node`, or carrying no statistics).
pub fn parse_move_stats(text: &str) -> Result<Option<MoveStats>, String> {
    let Some(first) = text.split_whitespace().next() else {
        return Ok(None);
    };
    if first != "node" && !UCI_MOVE.is_match(first) {
        return Ok(None);
    }

    let mut stats = MoveStats {
        mv: first.to_string(),
        ..MoveStats::default()
    };
    let mut found = false;

    if let Some(visits) = VISITS.captures(text) {
        stats.visits = Some(parse_int("N", Some(&visits[1]))?);
        found = true;
    }

    for group in STAT_GROUP.captures_iter(text) {
        found = true;
        let key = &group[1];
        let raw = &group[2];
        if raw.contains("-.-") {
            continue;
        }

        let value = |s: &str| -> Result<f64, String> {
            s.parse::<f64>()
                .map_err(|_| format!("invalid {} value '{}' for {}", key, raw, first))
        };

        match key {
            "P" => stats.policy = Some(value(raw.trim_end_matches('%'))? / 100.0),
            "Q" => stats.q = Some(value(raw)?),
            "WL" => stats.wl = Some(value(raw)?),
            "D" => stats.d = Some(value(raw)?),
            "M" => stats.m = Some(value(raw)?),
            "V" => stats.v = Some(value(raw)?),
            _ => {}
        }
    }

    stats.derive_wdl();
    Ok(found.then_some(stats))
}

/// Everything collected from one transcript
#[derive(Debug, Default)]
struct Transcript {
    score: Option<Score>,
    wdl: Option<Wdl>,
    depth: Option<u32>,
    seldepth: Option<u32>,
    nodes: Option<u64>,
    root: Option<MoveStats>,
    moves: Vec<MoveStats>,
    bestmove: Option<(String, Option<String>)>,
}

/// Validate every line and collect main-line values and move statistics
fn scan(raw: &str) -> Result<Transcript, UciParseError> {
    let mut out = Transcript::default();

    for (index, line) in raw.lines().enumerate() {
        let number = index + 1;
        if line.trim().is_empty() {
            continue;
        }
        if out.bestmove.is_some() {
            return Err(UciParseError::at(number, "output after bestmove"));
        }

        match parse_line(line).map_err(|e| UciParseError::at(number, e))? {
            UciLine::Handshake | UciLine::UciOk | UciLine::ReadyOk => {}
            UciLine::BestMove { best, ponder } => out.bestmove = Some((best, ponder)),
            UciLine::Info(info) => {
                if let Some(text) = info.string.as_deref() {
                    match parse_move_stats(text).map_err(|e| UciParseError::at(number, e))? {
                        Some(stats) if stats.mv == "node" => out.root = Some(stats),
                        Some(stats) => match out.moves.iter_mut().find(|m| m.mv == stats.mv) {
                            Some(existing) => *existing = stats,
                            None => out.moves.push(stats),
                        },
                        None => {}
                    }
                }

                if info.is_main_line() {
                    out.score = info.score.or(out.score);
                    out.wdl = info.wdl.or(out.wdl);
                    out.depth = info.depth.or(out.depth);
                    out.seldepth = info.seldepth.or(out.seldepth);
                    out.nodes = info.nodes.or(out.nodes);
                }
            }
        }
    }

    Ok(out)
}

/// Parse a complete engine transcript into an evaluation
///
/// The last main-line (`multipv 1` or unnumbered) `info` values win. Output
/// without a `bestmove` or without any score is rejected.
pub fn parse_output(raw: &str) -> Result<EvaluationResult, UciParseError> {
    let transcript = scan(raw)?;

    let (best_move, ponder) = transcript
        .bestmove
        .ok_or_else(|| UciParseError::at(0, "missing bestmove"))?;
    let score = transcript
        .score
        .ok_or_else(|| UciParseError::at(0, "missing score"))?;

    Ok(EvaluationResult {
        score: score.pawns(),
        best_move,
        ponder,
        mate: match score {
            Score::Mate(n) => Some(n),
            Score::Cp(_) => None,
        },
        wdl: transcript.wdl,
        depth: transcript.depth,
        seldepth: transcript.seldepth,
        nodes: transcript.nodes,
        root: transcript.root,
        moves: transcript.moves,
        raw_output: raw.to_string(),
    })
}

/// Parse the transcript of a single-node policy search into per-move statistics
///
/// Only `bestmove` is required; a score is not needed for policy values.
pub fn parse_policy_output(raw: &str) -> Result<Vec<MoveStats>, UciParseError> {
    let transcript = scan(raw)?;
    if transcript.bestmove.is_none() {
        return Err(UciParseError::at(0, "missing bestmove"));
    }
    Ok(transcript.moves)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LC0_TRANSCRIPT: &str = "\
id name Lc0 v0.30.0
id author The LCZero Authors.
option name WeightsFile type string default <autodiscover>
option name VerboseMoveStats type check default false
uciok
readyok
info string Loaded network weights
info depth 1 seldepth 2 time 41 nodes 3 score cp 18 wdl 83 846 71 nps 73 tbhits 0 pv e2e4 e7e5
info depth 4 seldepth 9 time 812 nodes 801 score cp 21 wdl 91 839 70 nps 986 tbhits 0 pv e2e4 e7e5 g1f3
info string d2d4  (293 ) N:     247 (+ 4) (P: 12.40%) (WL:  0.01612) (D:  0.842) (M: 121.3) (Q:  0.01612) (U: 0.01202) (S:  0.02814) (V:  0.0152)
info string g1f3  (159 ) N:       0 (+ 0) (P:  3.02%) (WL:  -.-----) (D: -.---) (M:  -.-) (Q: -0.01875) (U: 0.07351) (S:  0.05476) (V:  -.----)
info string e2e4  (322 ) N:     412 (+ 3) (P: 13.97%) (WL:  0.02206) (D:  0.839) (M: 119.8) (Q:  0.02206) (U: 0.00786) (S:  0.02992) (V:  0.0201)
info string node  ( 20) N:     800 (+ 1) (P: 100.00%) (WL:  0.01986) (D:  0.840) (M: 120.4) (Q:  0.01986) (V:  0.0174)
bestmove e2e4 ponder e7e5
";

    #[test]
    fn test_parses_lc0_transcript() {
        let result = parse_output(LC0_TRANSCRIPT).unwrap();

        assert!((result.score - 0.21).abs() < 1e-9);
        assert_eq!(result.best_move, "e2e4");
        assert_eq!(result.ponder.as_deref(), Some("e7e5"));
        assert_eq!(result.depth, Some(4));
        assert_eq!(result.seldepth, Some(9));
        assert_eq!(result.nodes, Some(801));
        assert_eq!(result.wdl, Some(Wdl { win: 91, draw: 839, loss: 70 }));
        assert!(result.mate.is_none());
        assert_eq!(result.raw_output, LC0_TRANSCRIPT);

        assert_eq!(result.moves.len(), 3);
        let e4 = result.move_stats("e2e4").unwrap();
        assert_eq!(e4.visits, Some(412));
        assert!((e4.policy.unwrap() - 0.1397).abs() < 1e-9);
        assert!((e4.q.unwrap() - 0.02206).abs() < 1e-9);
        assert!((e4.m.unwrap() - 119.8).abs() < 1e-9);
        let (w, l) = (e4.w.unwrap(), e4.l.unwrap());
        assert!((w - (0.02206 - 0.839 + 1.0) / 2.0).abs() < 1e-9);
        assert!((w + 0.839 + l - 1.0).abs() < 1e-9);

        let root = result.root.as_ref().unwrap();
        assert_eq!(root.visits, Some(800));
        assert!((root.policy.unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_unvisited_move_values_absent() {
        let result = parse_output(LC0_TRANSCRIPT).unwrap();
        let nf3 = result.move_stats("g1f3").unwrap();
        assert_eq!(nf3.visits, Some(0));
        assert!(nf3.wl.is_none());
        assert!(nf3.d.is_none());
        assert!(nf3.m.is_none());
        assert!(nf3.v.is_none());
        assert!((nf3.q.unwrap() + 0.01875).abs() < 1e-9);
        assert!(nf3.w.is_none());
        assert!(nf3.l.is_none());
    }

    #[test]
    fn test_mate_score() {
        let raw = "info depth 3 score mate 2 pv d8h4\nbestmove d8h4\n";
        let result = parse_output(raw).unwrap();
        assert_eq!(result.score, MATE_SCORE);
        assert_eq!(result.mate, Some(2));

        let raw = "info depth 3 score mate -1 pv e1f2\nbestmove e1f2\n";
        let result = parse_output(raw).unwrap();
        assert_eq!(result.score, -MATE_SCORE);
        assert_eq!(result.mate, Some(-1));
    }

    #[test]
    fn test_score_bounds_accepted() {
        let raw = "info depth 5 score cp -35 upperbound nodes 100 pv e7e5\nbestmove e7e5\n";
        let result = parse_output(raw).unwrap();
        assert!((result.score + 0.35).abs() < 1e-9);
        assert_eq!(result.nodes, Some(100));
    }

    #[test]
    fn test_secondary_multipv_ignored() {
        let raw = "\
info depth 2 multipv 1 score cp 40 pv e2e4
info depth 2 multipv 2 score cp -10 pv a2a3
bestmove e2e4
";
        let result = parse_output(raw).unwrap();
        assert!((result.score - 0.40).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_line_rejected() {
        let raw = "info depth 1 score cp 10\nEngine crashed: out of memory\nbestmove e2e4\n";
        let err = parse_output(raw).unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("unrecognized line"));
    }

    #[test]
    fn test_unknown_info_key_rejected() {
        let err = parse_output("info depth 1 flux 3 score cp 10\nbestmove e2e4\n").unwrap_err();
        assert!(err.message.contains("unknown info key 'flux'"));
    }

    #[test]
    fn test_malformed_value_rejected() {
        assert!(parse_output("info depth x score cp 10\nbestmove e2e4\n").is_err());
        assert!(parse_output("info depth 1 score cp\nbestmove e2e4\n").is_err());
        assert!(parse_output("info score centipawns 10\nbestmove e2e4\n").is_err());
        assert!(parse_output("info wdl 1 2\nbestmove e2e4\n").is_err());
    }

    #[test]
    fn test_missing_bestmove() {
        let err = parse_output("info depth 1 score cp 10 pv e2e4\n").unwrap_err();
        assert_eq!(err.message, "missing bestmove");
    }

    #[test]
    fn test_missing_score_is_not_defaulted() {
        let err = parse_output("info depth 1 nodes 1 pv e2e4\nbestmove e2e4\n").unwrap_err();
        assert_eq!(err.message, "missing score");
    }

    #[test]
    fn test_output_after_bestmove_rejected() {
        assert!(parse_output("info score cp 1\nbestmove e2e4\nbestmove d2d4\n").is_err());
    }

    #[test]
    fn test_informational_strings_ignored() {
        let raw = "info string Found pb network file: ./weights\ninfo score cp 5\nbestmove e2e4\n";
        let result = parse_output(raw).unwrap();
        assert!(result.moves.is_empty());
        assert!(result.root.is_none());
    }

    #[test]
    fn test_policy_output_needs_only_bestmove() {
        let raw = "\
uciok
readyok
info string e2e4  (322 ) N:       1 (+ 0) (P: 18.20%) (WL:  -.-----) (D: -.---) (M:  -.-) (Q:  0.00000) (V:  -.----)
info string d2d4  (293 ) N:       0 (+ 0) (P:  9.75%) (WL:  -.-----) (D: -.---) (M:  -.-) (Q:  0.00000) (V:  -.----)
info string node  ( 20) N:       1 (+ 0) (P: 100.00%) (WL:  -.-----) (D: -.---) (M:  -.-) (Q:  0.00000) (V:  -.----)
bestmove e2e4
";
        let moves = parse_policy_output(raw).unwrap();
        assert_eq!(moves.len(), 2);
        assert!((moves[0].policy.unwrap() - 0.182).abs() < 1e-9);
        assert!((moves[1].policy.unwrap() - 0.0975).abs() < 1e-9);

        assert!(parse_policy_output("uciok\ninfo string e2e4 (P: 1.00%)\n").is_err());
        assert!(parse_policy_output("garbage\nbestmove e2e4\n").is_err());
    }

    #[test]
    fn test_bad_stat_value_rejected() {
        let err = parse_move_stats("e2e4 (P: 1.2.3%)").unwrap_err();
        assert!(err.contains("invalid P value"));
    }

    #[test]
    fn test_parse_line_classification() {
        assert_eq!(parse_line("uciok").unwrap(), UciLine::UciOk);
        assert_eq!(parse_line("readyok\r").unwrap(), UciLine::ReadyOk);
        assert_eq!(parse_line("id name Lc0").unwrap(), UciLine::Handshake);
        assert_eq!(
            parse_line("bestmove e7e8q").unwrap(),
            UciLine::BestMove { best: "e7e8q".to_string(), ponder: None }
        );
        assert!(parse_line("bestmove").is_err());
        assert!(parse_line("uciok now").is_err());
    }

    #[test]
    fn test_info_string_keeps_text() {
        let info = parse_info("depth 3 string hello   world").unwrap();
        assert_eq!(info.depth, Some(3));
        assert_eq!(info.string.as_deref(), Some("hello   world"));
    }
}
