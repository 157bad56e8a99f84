//! CounterStore trait: time-bucketed counter accumulation
//!
//! A counter cell is identified by `(segment, timestamp, kind)`. Increments on
//! the same cell are summed; distinct timestamps stay distinct cells even when
//! they share a bucket. Buckets (width = the store interval) only group cells
//! physically so a range read touches the storage units that overlap it.
//!
//! Backends:
//! - `SledCounterStore`: durable, one sled tree, order-preserving keys
//! - `InMemoryCounterStore`: lock-guarded maps for tests and minimal deployments

use thiserror::Error;

use crate::types::{Counter, EventKind};

/// Lazy sequence of counters produced by [`CounterStore::read`].
pub type CounterIter = Box<dyn Iterator<Item = Result<Counter, StoreError>> + Send>;

/// Counter store errors
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Backing storage could not serve the request (I/O, poisoned lock)
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    /// A stored cell could not be decoded
    #[error("corrupt counter cell: {0}")]
    Corrupt(String),

    /// An existing store was created with a different bucket interval
    #[error("store was created with interval {stored_ms}ms, configured {configured_ms}ms")]
    IntervalMismatch { stored_ms: i64, configured_ms: i64 },

    #[error("invalid store interval {0}ms, must be positive")]
    InvalidInterval(i64),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Trait for counter storage backends
///
/// Implementations must be thread-safe (Send + Sync) for shared access across
/// ingestion workers and query handlers. Both operations may block on I/O;
/// async callers should run them on the blocking pool.
pub trait CounterStore: Send + Sync {
    /// Add `amount` to the cell `(key, timestamp, tag)`, creating it if absent.
    ///
    /// Concurrent increments to the same cell never lose updates.
    /// Non-positive amounts are applied as given.
    fn increment(&self, key: &str, amount: i32, timestamp: i64, tag: EventKind)
        -> Result<(), StoreError>;

    /// Cells for `key`/`tag` with `start <= timestamp < end`, ascending.
    ///
    /// The iterator reflects the store at call time and may be dropped at any
    /// point. Calling `read` again rebuilds it.
    fn read(&self, key: &str, start: i64, end: i64, tag: EventKind)
        -> Result<CounterIter, StoreError>;

    /// Bucket width in milliseconds, fixed at creation.
    fn interval_ms(&self) -> i64;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;

    /// Push buffered writes to durable storage. No-op for volatile backends.
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Start of the bucket containing `timestamp`.
pub fn bucket_start(timestamp: i64, interval_ms: i64) -> i64 {
    timestamp.saturating_sub(timestamp.rem_euclid(interval_ms))
}

/// An iterator that yields nothing, for empty ranges.
pub(crate) fn empty_iter() -> CounterIter {
    Box::new(std::iter::empty())
}
