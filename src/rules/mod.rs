use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

mod table;

pub use table::{Rule, RuleSet, RuleTable};

/// Freshness label assigned to a reading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    #[serde(alias = "fresh")]
    Fresh,
    #[serde(alias = "warning")]
    Warning,
    #[serde(alias = "rotten")]
    #[default]
    Rotten,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Fresh => "Fresh",
            Label::Warning => "Warning",
            Label::Rotten => "Rotten",
        }
    }

    /// Confidence used when a rule does not specify its own.
    pub fn default_confidence(&self) -> f64 {
        match self {
            Label::Fresh => 0.85,
            Label::Warning => 0.85 * 0.7,
            Label::Rotten => 0.8,
        }
    }

    /// Hex color used by dashboards to render this label.
    pub fn color(&self) -> &'static str {
        match self {
            Label::Fresh => "#4ade80",
            Label::Warning => "#fb923c",
            Label::Rotten => "#ef4444",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fresh" => Ok(Label::Fresh),
            "warning" => Ok(Label::Warning),
            "rotten" => Ok(Label::Rotten),
            other => Err(format!("unknown label '{}'", other)),
        }
    }
}

/// Result of classifying one reading.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: Label,
    pub confidence: f64,
}

/// Anything that can turn a fruit type and color channels into a label.
///
/// `RuleTable` is the shipped implementation. The ingestion coordinator only
/// depends on this trait, so a different classifier can be swapped in at
/// runtime without touching the pipeline.
pub trait Classifier: Send + Sync {
    fn classify(&self, fruit_type: &str, r: u8, g: u8, b: u8) -> Classification;
}
