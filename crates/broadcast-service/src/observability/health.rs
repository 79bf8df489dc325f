//! Health endpoints for the broadcast service.
//!
//! - `GET /health` - Liveness probe (is the process running?)
//! - `GET /ready` - Readiness probe (is the push channel accepting sessions
//!   AND is the change feed being consumed?)
//!
//! The `/metrics` endpoint is served separately via `metrics-exporter-prometheus`.

use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Health state for the broadcast service.
#[derive(Debug)]
pub struct HealthState {
    /// Always true after startup initialization.
    live: AtomicBool,
    /// WebSocket listener is bound and serving.
    serving: AtomicBool,
    /// Change-feed consumer loop is running.
    consuming: AtomicBool,
    /// Cleared on shutdown so traffic drains before the process exits.
    accepting: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live, nothing running yet).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            serving: AtomicBool::new(false),
            consuming: AtomicBool::new(false),
            accepting: AtomicBool::new(true),
        }
    }

    /// Record whether the push-channel server is serving.
    pub fn set_serving(&self, serving: bool) {
        self.serving.store(serving, Ordering::SeqCst);
    }

    /// Record whether the change-feed consumer is running.
    pub fn set_consuming(&self, consuming: bool) {
        self.consuming.store(consuming, Ordering::SeqCst);
    }

    /// Mark the service as not ready (shutdown in progress).
    pub fn set_not_ready(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    /// Check if the service is live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Check if the service is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
            && self.serving.load(Ordering::SeqCst)
            && self.consuming.load(Ordering::SeqCst)
    }
}

/// Create the health router with liveness and readiness endpoints.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    #[test]
    fn test_health_state_default() {
        let state = HealthState::new();
        assert!(state.is_live(), "Should be live by default");
        assert!(!state.is_ready(), "Should not be ready by default");
    }

    #[test]
    fn test_ready_requires_server_and_feed() {
        let state = HealthState::new();

        state.set_serving(true);
        assert!(!state.is_ready(), "Feed consumer not running yet");

        state.set_consuming(true);
        assert!(state.is_ready());

        state.set_consuming(false);
        assert!(!state.is_ready(), "Feed consumer stopped");
    }

    #[test]
    fn test_not_ready_after_shutdown_starts() {
        let state = HealthState::new();
        state.set_serving(true);
        state.set_consuming(true);

        state.set_not_ready();
        assert!(!state.is_ready());
        assert!(state.is_live());
    }

    async fn status_for(state: Arc<HealthState>, uri: &str) -> StatusCode {
        let request = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("Failed to build request");

        health_router(state)
            .oneshot(request)
            .await
            .expect("Failed to execute request")
            .status()
    }

    #[tokio::test]
    async fn test_health_router_liveness_endpoint() {
        let state = Arc::new(HealthState::new());
        assert_eq!(status_for(state, "/health").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_router_readiness_endpoint() {
        let state = Arc::new(HealthState::new());
        assert_eq!(
            status_for(Arc::clone(&state), "/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.set_serving(true);
        state.set_consuming(true);
        assert_eq!(status_for(state, "/ready").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_router_unknown_path_returns_404() {
        let state = Arc::new(HealthState::new());
        assert_eq!(
            status_for(state, "/unknown").await,
            StatusCode::NOT_FOUND
        );
    }
}
