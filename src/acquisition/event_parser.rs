//! Traffic Sensor Record Parser
//!
//! Parses the comma-separated records road sensors emit:
//!
//! ```text
//! <segmentId>, <timestamp>, <VEHICLE|ACCIDENT>, <count>
//! ```
//!
//! - `segmentId`: identifier of the road segment the report applies to
//! - `timestamp`: `yyyy-MM-dd HH:mm:ss` (UTC) or the literal `now` (any case)
//! - kind: `VEHICLE` or `ACCIDENT`, case-exact
//! - `count`: signed 32-bit integer
//!
//! A rejected record yields a categorized [`ParseError`] and no event. Callers
//! count the rejection and move on to the next record.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime};
use thiserror::Error;

use crate::clock::{Clock, SystemClock};
use crate::types::{EventKind, TrafficEvent};

/// Token that resolves to the current wall-clock time.
pub const TIMESTAMP_NOW: &str = "now";

/// chrono pattern for `yyyy-MM-dd HH:mm:ss`.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Number of fields in a well-formed record.
const FIELD_COUNT: usize = 4;

/// Why a record was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("expected 4 comma-separated fields, got {0}")]
    FieldCount(usize),

    #[error("segment identifier is empty")]
    EmptySegment,

    #[error("timestamp should be in 'yyyy-MM-dd HH:mm:ss' format or 'now', got '{0}'")]
    BadTimestamp(String),

    #[error("kind should be 'VEHICLE' or 'ACCIDENT', got '{0}'")]
    BadKind(String),

    #[error("invalid integer for count, got '{0}'")]
    BadCount(String),
}

impl ParseError {
    /// Stable category name for diagnostics.
    pub const fn category(&self) -> ParseErrorKind {
        match self {
            Self::FieldCount(_) | Self::EmptySegment => ParseErrorKind::Malformed,
            Self::BadTimestamp(_) => ParseErrorKind::Timestamp,
            Self::BadKind(_) => ParseErrorKind::Kind,
            Self::BadCount(_) => ParseErrorKind::Count,
        }
    }
}

/// Rejection categories tracked by the ingestion counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParseErrorKind {
    Malformed,
    Timestamp,
    Kind,
    Count,
}

/// Converts raw records into [`TrafficEvent`]s.
///
/// Holds only the clock used to resolve `now`, so one parser can be shared
/// across any number of ingestion tasks.
#[derive(Clone)]
pub struct EventParser {
    clock: Arc<dyn Clock>,
}

impl Default for EventParser {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl EventParser {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Parse one record.
    pub fn parse(&self, raw: &str) -> Result<TrafficEvent, ParseError> {
        // Empty trailing fields are kept, so `a, now, VEHICLE, 1,` fails the field count.
        let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
        if parts.len() != FIELD_COUNT {
            return Err(ParseError::FieldCount(parts.len()));
        }

        let segment_id = parts[0];
        if segment_id.is_empty() {
            return Err(ParseError::EmptySegment);
        }

        let timestamp = self.parse_timestamp(parts[1])?;

        let kind: EventKind = parts[2]
            .parse()
            .map_err(|_| ParseError::BadKind(parts[2].to_string()))?;

        let count: i32 = parts[3]
            .parse()
            .map_err(|_| ParseError::BadCount(parts[3].to_string()))?;

        Ok(TrafficEvent::new(segment_id, timestamp, kind, count))
    }

    fn parse_timestamp(&self, field: &str) -> Result<i64, ParseError> {
        if field.eq_ignore_ascii_case(TIMESTAMP_NOW) {
            return Ok(self.clock.now_millis());
        }
        NaiveDateTime::parse_from_str(field, DATE_FORMAT)
            .map(|dt| dt.and_utc().timestamp_millis())
            .map_err(|_| ParseError::BadTimestamp(field.to_string()))
    }
}

/// Parse a record, resolving `now` against the system clock.
pub fn parse(raw: &str) -> Result<TrafficEvent, ParseError> {
    EventParser::default().parse(raw)
}

/// Render an event back into record form.
///
/// Sub-second precision is dropped, the record format carries whole seconds.
/// Returns `None` when the timestamp lies outside the range chrono can
/// represent as a calendar date.
pub fn format_record(event: &TrafficEvent) -> Option<String> {
    let when = DateTime::from_timestamp_millis(event.timestamp)?;
    Some(format!(
        "{}, {}, {}, {}",
        event.segment_id,
        when.format(DATE_FORMAT),
        event.kind,
        event.count
    ))
}
