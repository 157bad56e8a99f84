//! Road condition severity reported by the classifier.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Three-level congestion severity for a road segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Condition {
    /// Traffic flowing normally
    Green,
    /// One congested reading in the lookback window
    Yellow,
    /// Repeated congestion or an accident
    Red,
}

impl Condition {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Green => "GREEN",
            Self::Yellow => "YELLOW",
            Self::Red => "RED",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How accident counters escalate a segment to RED.
///
/// Two rules exist in the field; they only disagree when a zero-valued
/// accident cell sits next to others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccidentRule {
    /// Sum every accident value in the window and compare the sum to zero
    #[default]
    WindowSum,
    /// Count accident cells whose value exceeds zero
    AnyPositiveEntry,
}
