//! Record processing loop shared across all input modes.
//!
//! Pulls raw records from a [`RecordSource`], parses them and forwards valid
//! events onto the bounded event channel the sink workers drain. Rejected
//! records are counted and logged, never forwarded.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::source::{RecordEvent, RecordSource};
use super::stats::IngestStats;
use crate::acquisition::{EventParser, ParseErrorKind};
use crate::types::TrafficEvent;

/// Log a progress line every this many records from one source.
const PROGRESS_EVERY: u64 = 10_000;

/// Counts for one loop run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub records: u64,
    pub forwarded: u64,
    pub rejected: u64,
}

/// Owns everything one source needs to feed the sink workers.
pub struct ProcessingLoop {
    parser: EventParser,
    events: mpsc::Sender<TrafficEvent>,
    stats: Arc<IngestStats>,
    cancel_token: CancellationToken,
}

impl ProcessingLoop {
    pub fn new(
        parser: EventParser,
        events: mpsc::Sender<TrafficEvent>,
        stats: Arc<IngestStats>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            parser,
            events,
            stats,
            cancel_token,
        }
    }

    /// Run until the source is exhausted, the event channel closes or
    /// cancellation. Dropping `self` at the end releases this loop's event
    /// sender.
    pub async fn run<S: RecordSource>(self, source: &mut S) -> LoopSummary {
        let mut summary = LoopSummary::default();
        let name = source.source_name().to_string();

        info!(source = %name, "Processing traffic records");

        loop {
            let event = tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(source = %name, "Shutdown signal received");
                    break;
                }
                result = source.next_record() => {
                    match result {
                        Ok(ev) => ev,
                        Err(e) => {
                            warn!(source = %name, error = %e, "Source error");
                            break;
                        }
                    }
                }
            };

            let raw = match event {
                RecordEvent::Eof => {
                    info!(source = %name, records = summary.records, "Source reached end");
                    break;
                }
                RecordEvent::Undecodable(lossy) => {
                    summary.records += 1;
                    summary.rejected += 1;
                    self.stats.record_received();
                    self.stats.bad_record(ParseErrorKind::Malformed);
                    info!(source = %name, record = %lossy, "Rejected record: not valid UTF-8");
                    continue;
                }
                RecordEvent::Record(r) => r,
            };

            summary.records += 1;
            self.stats.record_received();

            let parsed = match self.parser.parse(&raw) {
                Ok(ev) => ev,
                Err(e) => {
                    summary.rejected += 1;
                    self.stats.bad_record(e.category());
                    info!(source = %name, record = %raw, error = %e, "Rejected record");
                    continue;
                }
            };
            self.stats.event_parsed();
            debug!(
                segment = %parsed.segment_id,
                timestamp = parsed.timestamp,
                kind = %parsed.kind,
                count = parsed.count,
                "Parsed event"
            );

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(source = %name, "Shutdown signal received while forwarding");
                    break;
                }
                sent = self.events.send(parsed) => {
                    if sent.is_err() {
                        warn!(source = %name, "Event channel closed, stopping");
                        break;
                    }
                    summary.forwarded += 1;
                }
            }

            if summary.records % PROGRESS_EVERY == 0 {
                info!(source = %name, "Progress: {}", self.stats.snapshot());
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::pipeline::source::ReplaySource;
    use crate::types::EventKind;

    fn records(lines: &[&str]) -> ReplaySource {
        ReplaySource::new(lines.iter().map(|s| (*s).to_string()).collect(), 0)
    }

    #[tokio::test]
    async fn test_forwards_valid_and_counts_rejected() {
        let (tx, mut rx) = mpsc::channel(16);
        let stats = Arc::new(IngestStats::new());
        let parser = EventParser::new(Arc::new(ManualClock::new(5_000)));
        let lp = ProcessingLoop::new(parser, tx, stats.clone(), CancellationToken::new());

        let mut source = records(&[
            "a, now, VEHICLE, 3",
            "garbage",
            "a, 2014-09-01 00:00:00, TRUCK, 1",
            "b, now, ACCIDENT, 1",
        ]);
        let summary = lp.run(&mut source).await;

        assert_eq!(
            summary,
            LoopSummary {
                records: 4,
                forwarded: 2,
                rejected: 2
            }
        );
        let first = rx.recv().await.unwrap();
        assert_eq!(first, TrafficEvent::new("a", 5_000, EventKind::Vehicle, 3));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.kind, EventKind::Accident);
        // Loop dropped its sender on return.
        assert!(rx.recv().await.is_none());

        let snap = stats.snapshot();
        assert_eq!(snap.records_received, 4);
        assert_eq!(snap.events_parsed, 2);
        assert_eq!(snap.bad_malformed, 1);
        assert_eq!(snap.bad_kind, 1);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_rejected_and_skipped() {
        let (tx, mut rx) = mpsc::channel(16);
        let stats = Arc::new(IngestStats::new());
        let lp = ProcessingLoop::new(EventParser::default(), tx, stats.clone(), CancellationToken::new());

        let input: &[u8] = b"a, now, VEHICLE, 1\nb\xff, now, VEHICLE, 2\nc, now, VEHICLE, 3\n";
        let mut source = crate::pipeline::source::LineSource::new(input, "stdin");
        let summary = lp.run(&mut source).await;

        assert_eq!(
            summary,
            LoopSummary {
                records: 3,
                forwarded: 2,
                rejected: 1
            }
        );
        assert_eq!(rx.recv().await.unwrap().segment_id, "a");
        assert_eq!(rx.recv().await.unwrap().segment_id, "c");
        assert!(rx.recv().await.is_none());

        let snap = stats.snapshot();
        assert_eq!(snap.records_received, 3);
        assert_eq!(snap.bad_malformed, 1);
        assert_eq!(snap.bad_records, 1);
    }

    #[tokio::test]
    async fn test_cancelled_loop_stops() {
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let lp = ProcessingLoop::new(
            EventParser::default(),
            tx,
            Arc::new(IngestStats::new()),
            cancel,
        );
        let (_sender, mut source) = crate::pipeline::source::ChannelSource::channel(1);
        assert_eq!(lp.run(&mut source).await, LoopSummary::default());
    }

    #[tokio::test]
    async fn test_stops_when_sinks_are_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let lp = ProcessingLoop::new(
            EventParser::default(),
            tx,
            Arc::new(IngestStats::new()),
            CancellationToken::new(),
        );
        let mut source = records(&["a, now, VEHICLE, 1", "a, now, VEHICLE, 2"]);
        let summary = lp.run(&mut source).await;
        assert_eq!(summary.records, 1);
        assert_eq!(summary.forwarded, 0);
    }
}
