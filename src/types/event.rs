//! Traffic sensor events and the counter cells they accumulate into.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of report a road sensor emits.
///
/// The upper-case wire name doubles as the counter tag in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Vehicles observed passing the sensor
    Vehicle,
    /// Accidents reported on the segment
    Accident,
}

impl EventKind {
    pub const ALL: [Self; 2] = [Self::Vehicle, Self::Accident];

    /// Name used in ingestion records and as the store tag.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Vehicle => "VEHICLE",
            Self::Accident => "ACCIDENT",
        }
    }

    /// Single byte identifying the tag inside storage keys.
    pub(crate) const fn tag_byte(self) -> u8 {
        match self {
            Self::Vehicle => b'V',
            Self::Accident => b'A',
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a kind token is not exactly `VEHICLE` or `ACCIDENT`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event kind '{0}'")]
pub struct UnknownKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownKind;

    /// Case-exact match, `vehicle` is rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VEHICLE" => Ok(Self::Vehicle),
            "ACCIDENT" => Ok(Self::Accident),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

/// A validated report from a road sensor.
///
/// Only the parser produces these; the store keeps their effect on counters,
/// never the event itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficEvent {
    pub segment_id: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub kind: EventKind,
    pub count: i32,
}

impl TrafficEvent {
    pub fn new(segment_id: impl Into<String>, timestamp: i64, kind: EventKind, count: i32) -> Self {
        Self {
            segment_id: segment_id.into(),
            timestamp,
            kind,
            count,
        }
    }
}

/// One counter cell returned by a range read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    /// Epoch milliseconds of the cell
    pub timestamp: i64,
    /// Sum of every amount applied to the cell
    pub value: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse_is_case_exact() {
        assert_eq!("VEHICLE".parse::<EventKind>(), Ok(EventKind::Vehicle));
        assert_eq!("ACCIDENT".parse::<EventKind>(), Ok(EventKind::Accident));
        assert!("vehicle".parse::<EventKind>().is_err());
        assert!("Accident".parse::<EventKind>().is_err());
        assert!("".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_kind_display_matches_wire_name() {
        for kind in EventKind::ALL {
            assert_eq!(kind.to_string().parse::<EventKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_kind_serde_uses_wire_name() {
        let json = serde_json::to_string(&EventKind::Accident).unwrap();
        assert_eq!(json, "\"ACCIDENT\"");
    }
}
