//! System-wide default constants.
//!
//! Grouped by subsystem. Every configurable value in `TrafficConfig` falls
//! back to one of these when the TOML file leaves it out.

// ============================================================================
// Counter Store
// ============================================================================

/// Bucket width for counter rows (ms). 900 000 = 15 minutes.
pub const DEFAULT_INTERVAL_MS: i64 = 15 * 60 * 1000;

/// Directory holding the sled counter database.
pub const DEFAULT_DATA_DIR: &str = "./data/traffic_counters";

// ============================================================================
// Congestion Classification
// ============================================================================

/// A single vehicle entry above this value marks a segment as busy.
pub const DEFAULT_CONGESTION_THRESHOLD: i64 = 100;

/// Lookback window in multiples of the store interval.
///
/// 3 x 15 min = the last 45 minutes.
pub const DEFAULT_LOOKBACK_MULTIPLIER: i64 = 3;

// ============================================================================
// Ingestion Pipeline
// ============================================================================

/// Number of sink workers draining the event channel.
pub const DEFAULT_SINK_WORKERS: usize = 4;

/// Bounded capacity of the record and event channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1_024;

/// Attempts after the first failed increment before the event is dropped.
pub const DEFAULT_MAX_STORE_RETRIES: u32 = 5;

/// First backoff delay after a failed increment (ms). Doubles per attempt.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 50;

/// Upper bound on a single backoff delay (ms).
pub const MAX_RETRY_DELAY_MS: u64 = 5_000;

/// Delay between replayed file records at `--speed 1` (ms).
pub const REPLAY_BASE_DELAY_MS: u64 = 1_000;

// ============================================================================
// HTTP Server
// ============================================================================

/// Bind address for the query API.
pub const DEFAULT_SERVER_ADDR: &str = "0.0.0.0:8080";

/// Overall deadline for a single congestion query (ms).
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 5_000;

/// Grace period for in-flight requests after shutdown is signalled (seconds).
pub const SHUTDOWN_GRACE_SECS: u64 = 5;
