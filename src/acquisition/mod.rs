//! Sensor data acquisition module
//!
//! Turns raw traffic sensor records into validated events.

pub mod event_parser;

pub use event_parser::{format_record, parse, EventParser, ParseError, ParseErrorKind};
