//! Ingestion Pipeline
//!
//! ```text
//! RecordSource ──► ProcessingLoop ──► event channel ──► TrafficEventSink xN ──► CounterStore
//!  (stdin, file,     parse + count      (bounded mpsc)     (blocking pool,
//!   replay, HTTP)    rejections                             retry/backoff)
//! ```
//!
//! Any number of processing loops may feed the same event channel. Sink
//! workers exit once every loop has dropped its sender, so shutting the
//! loops down drains the channel before the store is flushed.

pub mod processing_loop;
pub mod sink;
pub mod source;
mod stats;

pub use processing_loop::{LoopSummary, ProcessingLoop};
pub use sink::{event_channel, SharedEventReceiver, SinkOutcome, TrafficEventSink};
pub use source::{ChannelSource, LineSource, RecordEvent, RecordSender, RecordSource, ReplaySource};
pub use stats::{IngestStats, IngestStatsSnapshot};
