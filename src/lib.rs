//! Traffic Conditions: road segment congestion from sensor counts
//!
//! Road sensors report vehicle and accident counts per segment. Reports are
//! parsed, summed into a time-bucketed counter store and classified on
//! demand into GREEN / YELLOW / RED.
//!
//! ## Architecture
//!
//! - **Acquisition**: record parsing (`segment, timestamp, kind, count`)
//! - **Pipeline**: record sources, parser loops, sink workers
//! - **Storage**: `CounterStore` trait with sled and in-memory backends
//! - **Processing**: congestion classification over a lookback window
//! - **API**: axum endpoints for queries, ingestion and stats

pub mod acquisition;
pub mod api;
pub mod clock;
pub mod config;
pub mod pipeline;
pub mod processing;
pub mod storage;
pub mod types;

// Re-export configuration
pub use config::TrafficConfig;

// Re-export commonly used types
pub use types::{AccidentRule, Condition, Counter, EventKind, TrafficEvent};

// Re-export core components
pub use acquisition::{EventParser, ParseError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use processing::CongestionClassifier;
pub use storage::{CounterStore, InMemoryCounterStore, SledCounterStore, StoreError};
