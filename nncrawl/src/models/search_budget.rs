//! Engine search budget
//!
//! Textual form is `<kind>:<value>`: `nodes:800`, `depth:20`, `movetime:1000`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How long the engine searches each position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SearchBudget {
    Nodes(u64),
    Depth(u32),
    MoveTime(Duration),
}

impl Default for SearchBudget {
    fn default() -> Self {
        SearchBudget::Nodes(800)
    }
}

impl SearchBudget {
    /// UCI `go` command for this budget
    pub fn go_command(&self) -> String {
        match self {
            SearchBudget::Nodes(n) => format!("go nodes {}", n),
            SearchBudget::Depth(d) => format!("go depth {}", d),
            SearchBudget::MoveTime(t) => format!("go movetime {}", t.as_millis()),
        }
    }
}

impl fmt::Display for SearchBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchBudget::Nodes(n) => write!(f, "nodes:{}", n),
            SearchBudget::Depth(d) => write!(f, "depth:{}", d),
            SearchBudget::MoveTime(t) => write!(f, "movetime:{}", t.as_millis()),
        }
    }
}

impl FromStr for SearchBudget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, value) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("Invalid search budget '{}' (expected kind:value)", s))?;
        let value = value.trim();

        let budget = match kind.trim().to_ascii_lowercase().as_str() {
            "nodes" => value.parse().map(SearchBudget::Nodes).ok(),
            "depth" => value.parse().map(SearchBudget::Depth).ok(),
            "movetime" => value
                .parse()
                .map(|ms| SearchBudget::MoveTime(Duration::from_millis(ms)))
                .ok(),
            other => return Err(format!("Unknown search budget kind '{}'", other)),
        };

        match budget {
            Some(SearchBudget::Nodes(0))
            | Some(SearchBudget::Depth(0)) => Err(format!("Search budget '{}' must be non-zero", s)),
            Some(SearchBudget::MoveTime(t)) if t.is_zero() => {
                Err(format!("Search budget '{}' must be non-zero", s))
            }
            Some(budget) => Ok(budget),
            None => Err(format!("Invalid search budget value in '{}'", s)),
        }
    }
}

impl TryFrom<String> for SearchBudget {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SearchBudget> for String {
    fn from(budget: SearchBudget) -> Self {
        budget.to_string()
    }
}
