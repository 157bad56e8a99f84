//! Record source abstraction for traffic sensor ingestion.
//!
//! Provides a unified trait for reading raw records from different places:
//! line streams (stdin, files), pre-loaded replays and the HTTP ingest
//! endpoint.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Events produced by a record source.
#[derive(Debug, PartialEq, Eq)]
pub enum RecordEvent {
    /// One raw record, not yet validated.
    Record(String),
    /// A line that is not valid UTF-8. Carries a lossy rendering for logs.
    Undecodable(String),
    /// Source reached end of data.
    Eof,
}

/// Trait abstracting where raw records come from.
///
/// The processing loop calls [`next_record`](RecordSource::next_record) in a
/// `select!` with cancellation.
#[async_trait]
pub trait RecordSource: Send + 'static {
    /// Read the next record.
    ///
    /// Returns `RecordEvent::Eof` when no more data is available and `Err`
    /// on unrecoverable read errors.
    async fn next_record(&mut self) -> Result<RecordEvent>;

    /// Human-readable name for logging (e.g. "stdin", "replay").
    fn source_name(&self) -> &str;
}

#[async_trait]
impl<S: RecordSource + ?Sized> RecordSource for Box<S> {
    async fn next_record(&mut self) -> Result<RecordEvent> {
        (**self).next_record().await
    }

    fn source_name(&self) -> &str {
        (**self).source_name()
    }
}

/// Turn one raw line into a record event. Blank lines yield `None`.
fn decode_line(bytes: &[u8]) -> Option<RecordEvent> {
    match std::str::from_utf8(bytes) {
        Ok(text) => {
            let line = text.trim();
            (!line.is_empty()).then(|| RecordEvent::Record(line.to_string()))
        }
        Err(_) => Some(RecordEvent::Undecodable(
            String::from_utf8_lossy(bytes).trim().to_string(),
        )),
    }
}

// ============================================================================
// Line Source (stdin / file)
// ============================================================================

/// Reads one record per line from any async buffered reader.
///
/// Blank lines are skipped and a line with invalid UTF-8 comes back as
/// [`RecordEvent::Undecodable`] without ending the stream. Used with the
/// simulator: `traffic-sim | traffic-conditions --stdin`
pub struct LineSource<R> {
    reader: R,
    line_buffer: Vec<u8>,
    name: String,
}

impl<R: AsyncBufRead + Unpin + Send + 'static> LineSource<R> {
    pub fn new(reader: R, name: impl Into<String>) -> Self {
        Self {
            reader,
            line_buffer: Vec::with_capacity(256),
            name: name.into(),
        }
    }
}

impl LineSource<BufReader<tokio::io::Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), "stdin")
    }
}

impl LineSource<BufReader<tokio::fs::File>> {
    pub async fn open(path: &Path) -> Result<Self> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open record file {}", path.display()))?;
        Ok(Self::new(BufReader::new(file), path.display().to_string()))
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send + 'static> RecordSource for LineSource<R> {
    async fn next_record(&mut self) -> Result<RecordEvent> {
        loop {
            self.line_buffer.clear();
            let bytes = self.reader.read_until(b'\n', &mut self.line_buffer).await?;
            if bytes == 0 {
                return Ok(RecordEvent::Eof);
            }
            if let Some(event) = decode_line(&self.line_buffer) {
                return Ok(event);
            }
        }
    }

    fn source_name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Replay Source
// ============================================================================

/// Replays pre-loaded records with an optional delay between them.
pub struct ReplaySource {
    records: std::vec::IntoIter<RecordEvent>,
    delay_ms: u64,
    yielded_first: bool,
}

impl ReplaySource {
    pub fn new(records: Vec<String>, delay_ms: u64) -> Self {
        Self::from_events(records.into_iter().map(RecordEvent::Record).collect(), delay_ms)
    }

    /// Split raw file contents into lines. Blank lines are dropped; lines
    /// with invalid UTF-8 are kept as [`RecordEvent::Undecodable`].
    pub fn from_bytes(contents: &[u8], delay_ms: u64) -> Self {
        let events = contents.split(|&b| b == b'\n').filter_map(decode_line).collect();
        Self::from_events(events, delay_ms)
    }

    fn from_events(events: Vec<RecordEvent>, delay_ms: u64) -> Self {
        Self {
            records: events.into_iter(),
            delay_ms,
            yielded_first: false,
        }
    }

    /// Records left to replay
    pub fn remaining(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl RecordSource for ReplaySource {
    async fn next_record(&mut self) -> Result<RecordEvent> {
        // No delay before the first record.
        if self.yielded_first && self.delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.delay_ms)).await;
        }
        match self.records.next() {
            Some(event) => {
                self.yielded_first = true;
                Ok(event)
            }
            None => Ok(RecordEvent::Eof),
        }
    }

    fn source_name(&self) -> &str {
        "replay"
    }
}

// ============================================================================
// Channel Source (HTTP ingest)
// ============================================================================

/// Handle used by the HTTP layer to push raw records into the pipeline.
pub type RecordSender = mpsc::Sender<String>;

/// Receives records pushed through a [`RecordSender`].
///
/// Reaches EOF once every sender has been dropped.
pub struct ChannelSource {
    rx: mpsc::Receiver<String>,
}

impl ChannelSource {
    /// Bounded channel: senders wait when the parser loop falls behind.
    pub fn channel(capacity: usize) -> (RecordSender, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }
}

#[async_trait]
impl RecordSource for ChannelSource {
    async fn next_record(&mut self) -> Result<RecordEvent> {
        Ok(self
            .rx
            .recv()
            .await
            .map_or(RecordEvent::Eof, RecordEvent::Record))
    }

    fn source_name(&self) -> &str {
        "http"
    }
}
