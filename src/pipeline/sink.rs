//! Sink stage: applies parsed events to the counter store.
//!
//! Several workers share one event receiver. Store calls run on the blocking
//! pool; an unavailable store is retried with exponential backoff, then the
//! event is dropped and counted.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use super::stats::IngestStats;
use crate::config::defaults::MAX_RETRY_DELAY_MS;
use crate::config::IngestConfig;
use crate::storage::{CounterStore, StoreError};
use crate::types::TrafficEvent;

/// Event receiver shared by all sink workers.
pub type SharedEventReceiver = Arc<Mutex<mpsc::Receiver<TrafficEvent>>>;

/// Bounded event channel between processing loops and sink workers.
pub fn event_channel(capacity: usize) -> (mpsc::Sender<TrafficEvent>, SharedEventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, Arc::new(Mutex::new(rx)))
}

/// What happened to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    Stored,
    Skipped,
    Failed,
}

/// Writes events into the counter store.
#[derive(Clone)]
pub struct TrafficEventSink {
    store: Arc<dyn CounterStore>,
    stats: Arc<IngestStats>,
    skip_non_positive: bool,
    max_retries: u32,
    retry_base_delay_ms: u64,
}

impl TrafficEventSink {
    pub fn new(store: Arc<dyn CounterStore>, stats: Arc<IngestStats>, config: &IngestConfig) -> Self {
        Self {
            store,
            stats,
            skip_non_positive: config.skip_non_positive,
            max_retries: config.max_store_retries,
            retry_base_delay_ms: config.retry_base_delay_ms,
        }
    }

    /// Apply one event, retrying while the store reports itself unavailable.
    pub async fn store_event(&self, event: TrafficEvent) -> SinkOutcome {
        if self.skip_non_positive && event.count <= 0 {
            debug!(
                segment = %event.segment_id,
                kind = %event.kind,
                count = event.count,
                "Skipping non-positive count"
            );
            self.stats.event_skipped();
            return SinkOutcome::Skipped;
        }

        let event = Arc::new(event);
        let mut attempt = 0u32;
        loop {
            let store = Arc::clone(&self.store);
            let ev = Arc::clone(&event);
            let result = tokio::task::spawn_blocking(move || {
                store.increment(&ev.segment_id, ev.count, ev.timestamp, ev.kind)
            })
            .await;

            let err = match result {
                Ok(Ok(())) => {
                    self.stats.event_stored();
                    return SinkOutcome::Stored;
                }
                Ok(Err(e)) => e,
                Err(join) => StoreError::Unavailable(format!("increment task failed: {join}")),
            };

            let retryable = matches!(err, StoreError::Unavailable(_));
            if !retryable || attempt >= self.max_retries {
                error!(
                    segment = %event.segment_id,
                    timestamp = event.timestamp,
                    kind = %event.kind,
                    attempts = attempt + 1,
                    error = %err,
                    "Dropping event, store write failed"
                );
                self.stats.store_failure();
                return SinkOutcome::Failed;
            }

            attempt += 1;
            let delay_ms = retry_delay_ms(self.retry_base_delay_ms, attempt);
            warn!(
                attempt,
                max_attempts = self.max_retries,
                delay_ms,
                error = %err,
                "Store unavailable, retrying"
            );
            self.stats.store_retry();
            tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
        }
    }

    /// Drain the shared receiver until every sender is gone.
    ///
    /// Returns the number of events this worker stored.
    pub async fn run(self, events: SharedEventReceiver, worker_id: usize) -> u64 {
        let mut stored = 0u64;
        debug!(worker_id, "Sink worker started");

        loop {
            let next = {
                let mut rx = events.lock().await;
                rx.recv().await
            };
            let Some(event) = next else {
                break;
            };
            if self.store_event(event).await == SinkOutcome::Stored {
                stored += 1;
            }
        }

        info!(worker_id, stored, "Sink worker finished, event channel closed");
        stored
    }
}

/// Backoff before retry `attempt` (1-based): base, 2x base, 4x base, ... capped.
fn retry_delay_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms
        .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
        .min(MAX_RETRY_DELAY_MS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CounterIter, InMemoryCounterStore};
    use crate::types::EventKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` increments with the given error.
    struct FlakyStore {
        inner: InMemoryCounterStore,
        failures: AtomicU32,
        error: StoreError,
    }

    impl FlakyStore {
        fn new(failures: u32, error: StoreError) -> Self {
            Self {
                inner: InMemoryCounterStore::new(1_000).unwrap(),
                failures: AtomicU32::new(failures),
                error,
            }
        }
    }

    impl CounterStore for FlakyStore {
        fn increment(&self, key: &str, amount: i32, timestamp: i64, tag: EventKind) -> Result<(), StoreError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(self.error.clone());
            }
            self.inner.increment(key, amount, timestamp, tag)
        }

        fn read(&self, key: &str, start: i64, end: i64, tag: EventKind) -> Result<CounterIter, StoreError> {
            self.inner.read(key, start, end, tag)
        }

        fn interval_ms(&self) -> i64 {
            self.inner.interval_ms()
        }

        fn backend_name(&self) -> &'static str {
            "flaky"
        }
    }

    fn config(max_store_retries: u32) -> IngestConfig {
        IngestConfig {
            max_store_retries,
            retry_base_delay_ms: 1,
            ..IngestConfig::default()
        }
    }

    fn sum(store: &dyn CounterStore) -> i64 {
        store
            .read("seg", 0, 10_000, EventKind::Vehicle)
            .unwrap()
            .map(|c| c.unwrap().value)
            .sum()
    }

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        assert_eq!(retry_delay_ms(50, 1), 50);
        assert_eq!(retry_delay_ms(50, 2), 100);
        assert_eq!(retry_delay_ms(50, 3), 200);
        assert_eq!(retry_delay_ms(50, 40), MAX_RETRY_DELAY_MS);
    }

    #[tokio::test]
    async fn test_skips_non_positive_counts() {
        let store = Arc::new(InMemoryCounterStore::new(1_000).unwrap());
        let stats = Arc::new(IngestStats::new());
        let sink = TrafficEventSink::new(store.clone(), stats.clone(), &config(0));

        for count in [0, -4] {
            let outcome = sink
                .store_event(TrafficEvent::new("seg", 10, EventKind::Vehicle, count))
                .await;
            assert_eq!(outcome, SinkOutcome::Skipped);
        }
        assert_eq!(store.cell_count(), 0);
        assert_eq!(stats.snapshot().events_skipped, 2);
    }

    #[tokio::test]
    async fn test_non_positive_stored_when_not_skipping() {
        let store = Arc::new(InMemoryCounterStore::new(1_000).unwrap());
        let cfg = IngestConfig {
            skip_non_positive: false,
            ..config(0)
        };
        let sink = TrafficEventSink::new(store.clone(), Arc::new(IngestStats::new()), &cfg);
        sink.store_event(TrafficEvent::new("seg", 10, EventKind::Vehicle, 5)).await;
        sink.store_event(TrafficEvent::new("seg", 10, EventKind::Vehicle, -2)).await;
        assert_eq!(sum(store.as_ref()), 3);
    }

    #[tokio::test]
    async fn test_unavailable_store_is_retried() {
        let store = Arc::new(FlakyStore::new(2, StoreError::Unavailable("disk".into())));
        let stats = Arc::new(IngestStats::new());
        let sink = TrafficEventSink::new(store.clone(), stats.clone(), &config(3));

        let outcome = sink
            .store_event(TrafficEvent::new("seg", 10, EventKind::Vehicle, 7))
            .await;
        assert_eq!(outcome, SinkOutcome::Stored);
        assert_eq!(sum(store.as_ref()), 7);

        let snap = stats.snapshot();
        assert_eq!(snap.store_retries, 2);
        assert_eq!(snap.events_stored, 1);
        assert_eq!(snap.store_failures, 0);
    }

    #[tokio::test]
    async fn test_event_dropped_after_retries_exhausted() {
        let store = Arc::new(FlakyStore::new(10, StoreError::Unavailable("disk".into())));
        let stats = Arc::new(IngestStats::new());
        let sink = TrafficEventSink::new(store.clone(), stats.clone(), &config(2));

        let outcome = sink
            .store_event(TrafficEvent::new("seg", 10, EventKind::Vehicle, 7))
            .await;
        assert_eq!(outcome, SinkOutcome::Failed);
        assert_eq!(sum(store.as_ref()), 0);
        assert_eq!(stats.snapshot().store_retries, 2);
        assert_eq!(stats.snapshot().store_failures, 1);
    }

    #[tokio::test]
    async fn test_corrupt_cell_not_retried() {
        let store = Arc::new(FlakyStore::new(1, StoreError::Corrupt("bad".into())));
        let stats = Arc::new(IngestStats::new());
        let sink = TrafficEventSink::new(store, stats.clone(), &config(5));

        let outcome = sink
            .store_event(TrafficEvent::new("seg", 10, EventKind::Vehicle, 7))
            .await;
        assert_eq!(outcome, SinkOutcome::Failed);
        assert_eq!(stats.snapshot().store_retries, 0);
    }

    #[tokio::test]
    async fn test_workers_drain_shared_channel() {
        let store = Arc::new(InMemoryCounterStore::new(1_000).unwrap());
        let stats = Arc::new(IngestStats::new());
        let sink = TrafficEventSink::new(store.clone(), stats.clone(), &config(0));
        let (tx, rx) = event_channel(8);

        let workers: Vec<_> = (0..3)
            .map(|id| tokio::spawn(sink.clone().run(rx.clone(), id)))
            .collect();

        for _ in 0..100 {
            tx.send(TrafficEvent::new("seg", 42, EventKind::Vehicle, 1))
                .await
                .unwrap();
        }
        drop(tx);

        let mut stored = 0;
        for w in workers {
            stored += w.await.unwrap();
        }
        assert_eq!(stored, 100);
        assert_eq!(sum(store.as_ref()), 100);
        assert_eq!(stats.snapshot().events_stored, 100);
    }
}
