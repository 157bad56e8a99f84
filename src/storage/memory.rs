//! In-memory counter store
//!
//! Thread-safe via `RwLock`. Not durable, data is lost on restart.
//!
//! Cells live in `row -> bucket start -> timestamp -> value` maps. A read walks
//! the buckets overlapping its range one at a time, copying a bucket's cells
//! out under the read lock and releasing it before yielding them.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Arc, RwLock};

use super::counter_store::{bucket_start, empty_iter, CounterIter, CounterStore, StoreError};
use crate::types::{Counter, EventKind};

type Row = (String, EventKind);
type Buckets = BTreeMap<i64, BTreeMap<i64, i64>>;
type Rows = HashMap<Row, Buckets>;

/// Volatile counter store for tests and minimal deployments.
#[derive(Clone)]
pub struct InMemoryCounterStore {
    rows: Arc<RwLock<Rows>>,
    interval_ms: i64,
}

impl InMemoryCounterStore {
    pub fn new(interval_ms: i64) -> Result<Self, StoreError> {
        if interval_ms <= 0 {
            return Err(StoreError::InvalidInterval(interval_ms));
        }
        Ok(Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
            interval_ms,
        })
    }

    /// Number of counter cells stored
    pub fn cell_count(&self) -> usize {
        self.rows
            .read()
            .map(|rows| {
                rows.values()
                    .flat_map(BTreeMap::values)
                    .map(BTreeMap::len)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Number of buckets holding at least one cell
    pub fn bucket_count(&self) -> usize {
        self.rows
            .read()
            .map(|rows| rows.values().map(BTreeMap::len).sum())
            .unwrap_or(0)
    }
}

impl CounterStore for InMemoryCounterStore {
    fn increment(
        &self,
        key: &str,
        amount: i32,
        timestamp: i64,
        tag: EventKind,
    ) -> Result<(), StoreError> {
        let bucket = bucket_start(timestamp, self.interval_ms);
        let mut rows = self
            .rows
            .write()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let value = rows
            .entry((key.to_string(), tag))
            .or_default()
            .entry(bucket)
            .or_default()
            .entry(timestamp)
            .or_insert(0);
        *value = value.saturating_add(i64::from(amount));

        Ok(())
    }

    fn read(
        &self,
        key: &str,
        start: i64,
        end: i64,
        tag: EventKind,
    ) -> Result<CounterIter, StoreError> {
        if start >= end {
            return Ok(empty_iter());
        }
        Ok(Box::new(BucketScan {
            rows: Arc::clone(&self.rows),
            row: (key.to_string(), tag),
            next_bucket: Bound::Included(bucket_start(start, self.interval_ms)),
            start,
            end,
            pending: Vec::new().into_iter(),
            done: false,
        }))
    }

    fn interval_ms(&self) -> i64 {
        self.interval_ms
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Lazy bucket-by-bucket scan over one row.
struct BucketScan {
    rows: Arc<RwLock<Rows>>,
    row: Row,
    next_bucket: Bound<i64>,
    start: i64,
    end: i64,
    pending: std::vec::IntoIter<Counter>,
    done: bool,
}

impl BucketScan {
    /// Copy out the next non-empty bucket in range. Returns false when exhausted.
    fn load_next_bucket(&mut self) -> Result<bool, StoreError> {
        let rows = self
            .rows
            .read()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let Some(buckets) = rows.get(&self.row) else {
            return Ok(false);
        };

        for (&bucket, cells) in buckets.range((self.next_bucket, Bound::Unbounded)) {
            if bucket >= self.end {
                return Ok(false);
            }
            self.next_bucket = Bound::Excluded(bucket);

            let counters: Vec<Counter> = cells
                .range(self.start..self.end)
                .map(|(&timestamp, &value)| Counter { timestamp, value })
                .collect();
            if !counters.is_empty() {
                self.pending = counters.into_iter();
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Iterator for BucketScan {
    type Item = Result<Counter, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(counter) = self.pending.next() {
                return Some(Ok(counter));
            }
            if self.done {
                return None;
            }
            match self.load_next_bucket() {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
