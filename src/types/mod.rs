//! Shared data structures for the traffic conditions pipeline
//!
//! - `TrafficEvent`: validated sensor report (parser output, sink input)
//! - `Counter`: one accumulated cell returned by store range reads
//! - `Condition`: classifier verdict for a road segment

mod condition;
mod event;

pub use condition::*;
pub use event::*;
