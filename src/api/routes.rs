//! API route definitions
//!
//! - /v1/road/:segment/recent - congestion severity (text)
//! - /v1/road/:segment/vehicles - vehicle total in the lookback window (text)
//! - /v1/road/:segment/accidents - accident total in the lookback window (text)
//! - /v1/events - record ingestion (POST)
//! - /v1/stats - ingestion counters
//! - /health - liveness

use axum::{routing::{get, post}, Router};

use super::handlers::{self, TrafficState};

/// Versioned API routes, nested under `/v1`.
pub fn api_routes(state: TrafficState) -> Router {
    Router::new()
        .route("/road/:segment/recent", get(handlers::get_recent))
        .route("/road/:segment/vehicles", get(handlers::get_vehicles))
        .route("/road/:segment/accidents", get(handlers::get_accidents))
        .route("/events", post(handlers::post_events))
        .route("/stats", get(handlers::get_stats))
        .with_state(state)
}

/// Health endpoint at root level
pub fn health_routes(state: TrafficState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .with_state(state)
}
