//! Ingestion counters shared by parser loops, sink workers and the API.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::acquisition::ParseErrorKind;

/// Lock-free ingestion counters.
///
/// Every stage holds an `Arc<IngestStats>` and bumps its own counters;
/// readers take a [`snapshot`](IngestStats::snapshot).
#[derive(Debug, Default)]
pub struct IngestStats {
    records_received: AtomicU64,
    events_parsed: AtomicU64,
    bad_malformed: AtomicU64,
    bad_timestamp: AtomicU64,
    bad_kind: AtomicU64,
    bad_count: AtomicU64,
    events_stored: AtomicU64,
    events_skipped: AtomicU64,
    store_retries: AtomicU64,
    store_failures: AtomicU64,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.records_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_parsed(&self) {
        self.events_parsed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bad_record(&self, kind: ParseErrorKind) {
        let counter = match kind {
            ParseErrorKind::Malformed => &self.bad_malformed,
            ParseErrorKind::Timestamp => &self.bad_timestamp,
            ParseErrorKind::Kind => &self.bad_kind,
            ParseErrorKind::Count => &self.bad_count,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_stored(&self) {
        self.events_stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_skipped(&self) {
        self.events_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn store_retry(&self) {
        self.store_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IngestStatsSnapshot {
        let bad_malformed = self.bad_malformed.load(Ordering::Relaxed);
        let bad_timestamp = self.bad_timestamp.load(Ordering::Relaxed);
        let bad_kind = self.bad_kind.load(Ordering::Relaxed);
        let bad_count = self.bad_count.load(Ordering::Relaxed);
        IngestStatsSnapshot {
            records_received: self.records_received.load(Ordering::Relaxed),
            events_parsed: self.events_parsed.load(Ordering::Relaxed),
            bad_records: bad_malformed + bad_timestamp + bad_kind + bad_count,
            bad_malformed,
            bad_timestamp,
            bad_kind,
            bad_count,
            events_stored: self.events_stored.load(Ordering::Relaxed),
            events_skipped: self.events_skipped.load(Ordering::Relaxed),
            store_retries: self.store_retries.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`IngestStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStatsSnapshot {
    pub records_received: u64,
    pub events_parsed: u64,
    pub bad_records: u64,
    pub bad_malformed: u64,
    pub bad_timestamp: u64,
    pub bad_kind: u64,
    pub bad_count: u64,
    pub events_stored: u64,
    pub events_skipped: u64,
    pub store_retries: u64,
    pub store_failures: u64,
}

impl std::fmt::Display for IngestStatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Ingest: {} records, {} parsed, {} rejected, {} stored, {} skipped, {} failed",
            self.records_received,
            self.events_parsed,
            self.bad_records,
            self.events_stored,
            self.events_skipped,
            self.store_failures
        )
    }
}
