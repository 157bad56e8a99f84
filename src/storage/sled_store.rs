//! Sled-backed counter store
//!
//! Cell key layout (all integers big-endian so sled's byte order is time order):
//!
//! ```text
//! [segment len: u32][segment bytes][tag: u8][bucket start: i64*][timestamp: i64*]
//! └──────────────────────── row ─────────────────────────────┘
//! ```
//!
//! `i64*` = sign bit flipped so negative timestamps sort before positive ones.
//! Every cell of a bucket shares the row prefix, and rows of one segment/tag
//! are adjacent in bucket order, so a range read is one contiguous scan.
//!
//! Values are the counter as an 8-byte big-endian `i64`. Increments go through
//! `update_and_fetch`, which retries its compare-and-swap until it wins, so
//! concurrent writers to one cell never lose an update.

use std::path::Path;
use std::sync::Arc;

use super::counter_store::{bucket_start, empty_iter, CounterIter, CounterStore, StoreError};
use crate::types::{Counter, EventKind};

/// Tree holding counter cells
const COUNTERS_TREE: &str = "counters";

/// Tree holding store-wide settings
const META_TREE: &str = "meta";

/// Meta key recording the interval the store was created with
const INTERVAL_KEY: &[u8] = b"interval_ms";

/// Durable counter store on sled.
#[derive(Clone)]
pub struct SledCounterStore {
    db: Arc<sled::Db>,
    counters: sled::Tree,
    interval_ms: i64,
}

impl SledCounterStore {
    /// Open or create a store at `path`.
    ///
    /// A new store records `interval_ms`; reopening with a different interval
    /// fails with [`StoreError::IntervalMismatch`].
    pub fn open<P: AsRef<Path>>(path: P, interval_ms: i64) -> Result<Self, StoreError> {
        if interval_ms <= 0 {
            return Err(StoreError::InvalidInterval(interval_ms));
        }

        let path_ref = path.as_ref();
        let db = sled::open(path_ref)?;
        let meta = db.open_tree(META_TREE)?;

        match meta.get(INTERVAL_KEY)? {
            Some(stored) => {
                let stored_ms = decode_i64(&stored)?;
                if stored_ms != interval_ms {
                    return Err(StoreError::IntervalMismatch {
                        stored_ms,
                        configured_ms: interval_ms,
                    });
                }
            }
            None => {
                meta.insert(INTERVAL_KEY, interval_ms.to_be_bytes().to_vec())?;
                meta.flush()?;
            }
        }

        let counters = db.open_tree(COUNTERS_TREE)?;

        tracing::info!(
            path = %path_ref.display(),
            interval_ms,
            cells = counters.len(),
            "Counter store opened"
        );

        Ok(Self {
            db: Arc::new(db),
            counters,
            interval_ms,
        })
    }

    /// Number of counter cells stored
    pub fn cell_count(&self) -> usize {
        self.counters.len()
    }
}

impl CounterStore for SledCounterStore {
    fn increment(
        &self,
        key: &str,
        amount: i32,
        timestamp: i64,
        tag: EventKind,
    ) -> Result<(), StoreError> {
        let cell = cell_key(key, tag, bucket_start(timestamp, self.interval_ms), timestamp);
        let mut corrupt = false;

        self.counters.update_and_fetch(&cell, |old| {
            // The closure reruns when the compare-and-swap loses a race.
            corrupt = false;
            match old {
                None => Some(i64::from(amount).to_be_bytes().to_vec()),
                Some(bytes) => match decode_i64(bytes) {
                    Ok(current) => Some(
                        current
                            .saturating_add(i64::from(amount))
                            .to_be_bytes()
                            .to_vec(),
                    ),
                    Err(_) => {
                        // Leave the cell untouched and report it below.
                        corrupt = true;
                        Some(bytes.to_vec())
                    }
                },
            }
        })?;

        if corrupt {
            return Err(StoreError::Corrupt(format!(
                "{key}/{tag}@{timestamp}: value is not 8 bytes"
            )));
        }

        tracing::trace!(segment = key, %tag, timestamp, amount, "Counter incremented");
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

        // Any cell with ts < end lives in a bucket <= bucket(end), and within
        // bucket(end) sorts below `end`, so the exclusive bound is exact.
        let lower = cell_key(key, tag, bucket_start(start, self.interval_ms), start);
        let upper = cell_key(key, tag, bucket_start(end, self.interval_ms), end);

        let iter = self.counters.range(lower..upper).map(|item| {
            let (k, v) = item?;
            Ok(Counter {
                timestamp: timestamp_from_key(&k)?,
                value: decode_i64(&v)?,
            })
        });

        Ok(Box::new(iter))
    }

    fn interval_ms(&self) -> i64 {
        self.interval_ms
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

// ============================================================================
// Key Encoding
// ============================================================================

/// Map an `i64` onto `u64` so that unsigned byte order matches signed order.
const fn sortable(value: i64) -> [u8; 8] {
    ((value as u64) ^ (1 << 63)).to_be_bytes()
}

const fn unsortable(bytes: [u8; 8]) -> i64 {
    (u64::from_be_bytes(bytes) ^ (1 << 63)) as i64
}

fn cell_key(segment: &str, tag: EventKind, bucket: i64, timestamp: i64) -> Vec<u8> {
    let seg = segment.as_bytes();
    let mut key = Vec::with_capacity(4 + seg.len() + 1 + 16);
    // Segment ids come from a single CSV field; lengths beyond u32 are not representable.
    key.extend_from_slice(&u32::try_from(seg.len()).unwrap_or(u32::MAX).to_be_bytes());
    key.extend_from_slice(seg);
    key.push(tag.tag_byte());
    key.extend_from_slice(&sortable(bucket));
    key.extend_from_slice(&sortable(timestamp));
    key
}

fn timestamp_from_key(key: &[u8]) -> Result<i64, StoreError> {
    let tail = key
        .len()
        .checked_sub(8)
        .map(|at| &key[at..])
        .ok_or_else(|| StoreError::Corrupt(format!("key too short ({} bytes)", key.len())))?;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(tail);
    Ok(unsortable(bytes))
}

fn decode_i64(bytes: &[u8]) -> Result<i64, StoreError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Corrupt(format!("expected 8-byte value, got {}", bytes.len())))?;
    Ok(i64::from_be_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: i64 = 15 * 60 * 1000;

    fn open_temp() -> (tempfile::TempDir, SledCounterStore) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SledCounterStore::open(temp_dir.path().join("counters.db"), INTERVAL).unwrap();
        (temp_dir, store)
    }

    fn collect(store: &SledCounterStore, key: &str, start: i64, end: i64, tag: EventKind) -> Vec<Counter> {
        store
            .read(key, start, end, tag)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_sortable_preserves_order() {
        let values = [i64::MIN, -INTERVAL, -1, 0, 1, INTERVAL, i64::MAX];
        for pair in values.windows(2) {
            assert!(sortable(pair[0]) < sortable(pair[1]));
            assert_eq!(unsortable(sortable(pair[0])), pair[0]);
        }
    }

    #[test]
    fn test_store_open() {
        let (_dir, store) = open_temp();
        assert_eq!(store.cell_count(), 0);
        assert_eq!(store.interval_ms(), INTERVAL);
        assert_eq!(store.backend_name(), "sled");
    }

    #[test]
    fn test_rejects_non_positive_interval() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = SledCounterStore::open(temp_dir.path().join("bad.db"), 0);
        assert!(matches!(result, Err(StoreError::InvalidInterval(0))));
    }

    #[test]
    fn test_reopen_with_other_interval_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("counters.db");
        {
            let store = SledCounterStore::open(&path, INTERVAL).unwrap();
            store.increment("66N_1", 5, 1_000, EventKind::Vehicle).unwrap();
            store.flush().unwrap();
        }
        let result = SledCounterStore::open(&path, 60_000);
        assert!(matches!(
            result,
            Err(StoreError::IntervalMismatch { stored_ms: INTERVAL, configured_ms: 60_000 })
        ));
    }

    #[test]
    fn test_counts_survive_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("counters.db");
        {
            let store = SledCounterStore::open(&path, INTERVAL).unwrap();
            store.increment("66N_1", 7, 1_000, EventKind::Vehicle).unwrap();
            store.flush().unwrap();
        }
        let store = SledCounterStore::open(&path, INTERVAL).unwrap();
        store.increment("66N_1", 3, 1_000, EventKind::Vehicle).unwrap();
        let counters = collect(&store, "66N_1", 0, 2_000, EventKind::Vehicle);
        assert_eq!(counters, vec![Counter { timestamp: 1_000, value: 10 }]);
    }

    #[test]
    fn test_same_cell_is_summed() {
        let (_dir, store) = open_temp();
        store.increment("66N_3", 51, 5_000, EventKind::Vehicle).unwrap();
        store.increment("66N_3", 51, 5_000, EventKind::Vehicle).unwrap();
        assert_eq!(store.cell_count(), 1);
        let counters = collect(&store, "66N_3", 0, 10_000, EventKind::Vehicle);
        assert_eq!(counters, vec![Counter { timestamp: 5_000, value: 102 }]);
    }

    #[test]
    fn test_range_spans_buckets_exactly() {
        let (_dir, store) = open_temp();
        let stamps = [
            INTERVAL - 1,
            INTERVAL,
            INTERVAL + 10,
            2 * INTERVAL - 1,
            2 * INTERVAL,
            3 * INTERVAL + 5,
        ];
        for ts in stamps {
            store.increment("seg", 1, ts, EventKind::Vehicle).unwrap();
        }

        let got: Vec<i64> = collect(&store, "seg", INTERVAL, 3 * INTERVAL + 5, EventKind::Vehicle)
            .iter()
            .map(|c| c.timestamp)
            .collect();
        assert_eq!(got, vec![INTERVAL, INTERVAL + 10, 2 * INTERVAL - 1, 2 * INTERVAL]);
    }

    #[test]
    fn test_segments_and_tags_do_not_bleed() {
        let (_dir, store) = open_temp();
        store.increment("a", 1, 100, EventKind::Vehicle).unwrap();
        store.increment("ab", 2, 100, EventKind::Vehicle).unwrap();
        store.increment("a", 3, 100, EventKind::Accident).unwrap();

        assert_eq!(
            collect(&store, "a", 0, 1_000, EventKind::Vehicle),
            vec![Counter { timestamp: 100, value: 1 }]
        );
        assert_eq!(
            collect(&store, "a", 0, 1_000, EventKind::Accident),
            vec![Counter { timestamp: 100, value: 3 }]
        );
        assert_eq!(
            collect(&store, "ab", 0, 1_000, EventKind::Vehicle),
            vec![Counter { timestamp: 100, value: 2 }]
        );
    }

    #[test]
    fn test_negative_timestamps_sort_first() {
        let (_dir, store) = open_temp();
        store.increment("seg", 1, 5, EventKind::Vehicle).unwrap();
        store.increment("seg", 1, -INTERVAL - 3, EventKind::Vehicle).unwrap();
        let got: Vec<i64> = collect(&store, "seg", i64::MIN, i64::MAX, EventKind::Vehicle)
            .iter()
            .map(|c| c.timestamp)
            .collect();
        assert_eq!(got, vec![-INTERVAL - 3, 5]);
    }

    #[test]
    fn test_empty_and_inverted_ranges() {
        let (_dir, store) = open_temp();
        store.increment("seg", 1, 500, EventKind::Vehicle).unwrap();
        assert!(collect(&store, "seg", 500, 500, EventKind::Vehicle).is_empty());
        assert!(collect(&store, "seg", 600, 100, EventKind::Vehicle).is_empty());
        assert!(collect(&store, "missing", 0, 1_000, EventKind::Vehicle).is_empty());
    }

    #[test]
    fn test_corrupt_cell_is_reported_not_overwritten() {
        let (_dir, store) = open_temp();
        let key = cell_key("seg", EventKind::Vehicle, bucket_start(100, INTERVAL), 100);
        store.counters.insert(&key, &b"bad"[..]).unwrap();

        let err = store.increment("seg", 1, 100, EventKind::Vehicle).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
        assert_eq!(&*store.counters.get(&key).unwrap().unwrap(), b"bad");

        let first = store.read("seg", 0, 1_000, EventKind::Vehicle).unwrap().next().unwrap();
        assert!(matches!(first, Err(StoreError::Corrupt(_))));
    }
}
