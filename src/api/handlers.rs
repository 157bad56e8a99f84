//! API route handlers
//!
//! - Road condition queries (plain text): recent severity, vehicle and
//!   accident totals over the lookback window
//! - Record ingestion over HTTP
//! - Ingestion statistics and health

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use super::envelope::{ApiErrorResponse, ApiResponse};
use crate::config::TrafficConfig;
use crate::pipeline::{IngestStats, IngestStatsSnapshot, RecordSender};
use crate::processing::CongestionClassifier;
use crate::storage::StoreError;
use crate::types::AccidentRule;

// ============================================================================
// API State
// ============================================================================

/// Shared state for API handlers
#[derive(Clone)]
pub struct TrafficState {
    pub classifier: CongestionClassifier,
    pub stats: Arc<IngestStats>,
    /// Feeds `POST /v1/events` into the pipeline. `None` disables the endpoint.
    pub ingest: Option<RecordSender>,
    pub lookback_ms: i64,
    pub threshold: i64,
    pub query_timeout: Duration,
    pub started_at: Instant,
}

impl TrafficState {
    /// Build handler state; the lookback window uses the store's own interval.
    pub fn new(classifier: CongestionClassifier, stats: Arc<IngestStats>, config: &TrafficConfig) -> Self {
        let interval_ms = classifier.store().interval_ms();
        Self {
            lookback_ms: config.congestion.lookback_ms(interval_ms),
            threshold: config.congestion.threshold,
            query_timeout: Duration::from_millis(config.server.query_timeout_ms),
            classifier,
            stats,
            ingest: None,
            started_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn with_ingest(mut self, sender: RecordSender) -> Self {
        self.ingest = Some(sender);
        self
    }
}

// ============================================================================
// Query Errors
// ============================================================================

/// Why a road query produced no answer.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("query did not finish within {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("query task failed: {0}")]
    TaskFailed(String),
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        warn!(error = %message, "Road query failed");
        match self {
            Self::Store(_) => ApiErrorResponse::service_unavailable(message),
            Self::Timeout(_) => ApiErrorResponse::gateway_timeout(message),
            Self::TaskFailed(_) => ApiErrorResponse::internal(message),
        }
    }
}

/// Run a classifier call on the blocking pool under the query deadline.
///
/// A timed-out read keeps running on the blocking pool until the store
/// returns; its result is discarded.
async fn run_query<T, F>(state: &TrafficState, query: F) -> Result<T, QueryError>
where
    T: Send + 'static,
    F: FnOnce(&CongestionClassifier) -> Result<T, StoreError> + Send + 'static,
{
    let classifier = state.classifier.clone();
    let task = tokio::task::spawn_blocking(move || query(&classifier));
    match tokio::time::timeout(state.query_timeout, task).await {
        Err(_) => Err(QueryError::Timeout(state.query_timeout)),
        Ok(Err(join)) => Err(QueryError::TaskFailed(join.to_string())),
        Ok(Ok(result)) => result.map_err(QueryError::from),
    }
}

// ============================================================================
// Road Condition Endpoints
// ============================================================================

/// GET /v1/road/:segment/recent → `GREEN` | `YELLOW` | `RED`
pub async fn get_recent(
    State(state): State<TrafficState>,
    Path(segment): Path<String>,
) -> Result<String, QueryError> {
    let (lookback, threshold) = (state.lookback_ms, state.threshold);
    let condition = run_query(&state, move |c| c.classify(&segment, lookback, threshold)).await?;
    Ok(condition.to_string())
}

/// GET /v1/road/:segment/vehicles → total vehicle count in the window
pub async fn get_vehicles(
    State(state): State<TrafficState>,
    Path(segment): Path<String>,
) -> Result<String, QueryError> {
    let lookback = state.lookback_ms;
    let total = run_query(&state, move |c| c.total_vehicles(&segment, lookback)).await?;
    Ok(total.to_string())
}

/// GET /v1/road/:segment/accidents → total accident count in the window
pub async fn get_accidents(
    State(state): State<TrafficState>,
    Path(segment): Path<String>,
) -> Result<String, QueryError> {
    let lookback = state.lookback_ms;
    let total = run_query(&state, move |c| c.total_accidents(&segment, lookback)).await?;
    Ok(total.to_string())
}

// ============================================================================
// Ingestion Endpoint
// ============================================================================

#[derive(Debug, Serialize)]
pub struct IngestAccepted {
    pub queued: usize,
}

/// POST /v1/events: body holds one record per line.
///
/// Records are validated by the pipeline, not here; the response only says
/// how many lines were queued.
pub async fn post_events(State(state): State<TrafficState>, body: String) -> Response {
    let Some(sender) = state.ingest.as_ref() else {
        return ApiErrorResponse::service_unavailable("HTTP ingestion is not enabled");
    };

    let mut queued = 0usize;
    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if sender.send(line.to_string()).await.is_err() {
            warn!(queued, "Ingestion pipeline closed mid-request");
            return ApiErrorResponse::service_unavailable("ingestion pipeline is shut down");
        }
        queued += 1;
    }

    ApiResponse::accepted(IngestAccepted { queued })
}

// ============================================================================
// Stats & Health
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub ingest: IngestStatsSnapshot,
    pub store_backend: &'static str,
    pub interval_ms: i64,
    pub lookback_ms: i64,
    pub threshold: i64,
    pub accident_rule: AccidentRule,
}

/// GET /v1/stats
pub async fn get_stats(State(state): State<TrafficState>) -> Response {
    let store = state.classifier.store();
    ApiResponse::ok(StatsResponse {
        ingest: state.stats.snapshot(),
        store_backend: store.backend_name(),
        interval_ms: store.interval_ms(),
        lookback_ms: state.lookback_ms,
        threshold: state.threshold,
        accident_rule: state.classifier.accident_rule(),
    })
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: String,
    pub uptime_seconds: u64,
    pub store_backend: &'static str,
    pub interval_ms: i64,
}

/// GET /health
pub async fn health_check(State(state): State<TrafficState>) -> Json<HealthResponse> {
    let store = state.classifier.store();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        store_backend: store.backend_name(),
        interval_ms: store.interval_ms(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::{CounterIter, CounterStore, InMemoryCounterStore};
    use crate::types::EventKind;

    const NOW: i64 = 10_000_000;

    fn create_test_state(store: Arc<dyn CounterStore>) -> TrafficState {
        let classifier =
            CongestionClassifier::new(store, Arc::new(ManualClock::new(NOW)), AccidentRule::WindowSum);
        TrafficState::new(classifier, Arc::new(IngestStats::new()), &TrafficConfig::default())
    }

    /// Blocks every read long enough to trip a short deadline.
    struct SlowStore(InMemoryCounterStore);

    impl CounterStore for SlowStore {
        fn increment(&self, key: &str, amount: i32, timestamp: i64, tag: EventKind) -> Result<(), StoreError> {
            self.0.increment(key, amount, timestamp, tag)
        }

        fn read(&self, key: &str, start: i64, end: i64, tag: EventKind) -> Result<CounterIter, StoreError> {
            std::thread::sleep(Duration::from_millis(200));
            self.0.read(key, start, end, tag)
        }

        fn interval_ms(&self) -> i64 {
            self.0.interval_ms()
        }

        fn backend_name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_state_lookback_follows_store_interval() {
        let store = Arc::new(InMemoryCounterStore::new(60_000).unwrap());
        let state = create_test_state(store);
        assert_eq!(state.lookback_ms, 180_000);
        assert_eq!(state.threshold, 100);
    }

    #[tokio::test]
    async fn test_get_recent_text() {
        let store = Arc::new(InMemoryCounterStore::new(900_000).unwrap());
        store.increment("66N_1", 150, NOW - 1_000, EventKind::Vehicle).unwrap();
        let state = create_test_state(store);

        let body = get_recent(State(state.clone()), Path("66N_1".to_string())).await.unwrap();
        assert_eq!(body, "YELLOW");
        let body = get_vehicles(State(state), Path("66N_1".to_string())).await.unwrap();
        assert_eq!(body, "150");
    }

    #[tokio::test]
    async fn test_query_timeout() {
        let store = Arc::new(SlowStore(InMemoryCounterStore::new(900_000).unwrap()));
        let mut state = create_test_state(store);
        state.query_timeout = Duration::from_millis(10);

        let err = get_recent(State(state), Path("x".to_string())).await.unwrap_err();
        assert!(matches!(err, QueryError::Timeout(_)));
        assert_eq!(err.into_response().status(), axum::http::StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_store_error_is_503() {
        let resp = QueryError::Store(StoreError::Unavailable("disk".into())).into_response();
        assert_eq!(resp.status(), axum::http::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_post_events_disabled() {
        let store = Arc::new(InMemoryCounterStore::new(900_000).unwrap());
        let resp = post_events(State(create_test_state(store)), "a, now, VEHICLE, 1".into()).await;
        assert_eq!(resp.status(), axum::http::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_post_events_queues_lines() {
        let store = Arc::new(InMemoryCounterStore::new(900_000).unwrap());
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let state = create_test_state(store).with_ingest(tx);

        let resp = post_events(State(state), "a, now, VEHICLE, 1\n\n b, now, ACCIDENT, 2 \n".into()).await;
        assert_eq!(resp.status(), axum::http::StatusCode::ACCEPTED);
        assert_eq!(rx.recv().await.unwrap(), "a, now, VEHICLE, 1");
        assert_eq!(rx.recv().await.unwrap(), "b, now, ACCIDENT, 2");
    }

    #[tokio::test]
    async fn test_health_check() {
        let store = Arc::new(InMemoryCounterStore::new(900_000).unwrap());
        let Json(health) = health_check(State(create_test_state(store))).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.store_backend, "memory");
        assert_eq!(health.interval_ms, 900_000);
    }
}
