//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, feed status reporting, and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness check (simple OK)
//! - `GET /readyz` - Readiness check (sensor stream connected)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::application::services::{ConnectionPhase, MarketSnapshot, StreamSnapshot};
use crate::domain::market::MarketCalendar;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Sensor stream status.
    pub stream: StreamStatus,
    /// Market data status.
    pub market: MarketStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Stream connected.
    Healthy,
    /// Stream down but last-known data is available.
    Degraded,
    /// Nothing to show.
    Unhealthy,
}

/// Sensor stream status.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    /// Session phase.
    pub phase: ConnectionPhase,
    /// Whether a session is open.
    pub connected: bool,
    /// Sessions opened since start.
    pub sessions_opened: u64,
    /// Seconds since the last data frame.
    pub last_message_age_secs: Option<i64>,
}

/// Market data status.
#[derive(Debug, Clone, Serialize)]
pub struct MarketStatus {
    /// Whether the exchange is inside trading hours.
    pub market_open: bool,
    /// Tracked symbols.
    pub watchlist_size: usize,
    /// Symbols with a quote.
    pub quotes: usize,
    /// Cold-start loading in progress.
    pub loading: bool,
    /// Drill-in enabled.
    pub history_ready: bool,
    /// Last background quote batch.
    pub last_quotes_at: Option<DateTime<Utc>>,
    /// Last background history batch.
    pub last_history_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    calendar: MarketCalendar,
    stream: watch::Receiver<StreamSnapshot>,
    market: watch::Receiver<MarketSnapshot>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        stream: watch::Receiver<StreamSnapshot>,
        market: watch::Receiver<MarketSnapshot>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            calendar: MarketCalendar::default(),
            stream,
            market,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Build the router without binding.
    pub fn router(state: Arc<HealthServerState>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Self::router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state, Utc::now());
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.stream.borrow().connected {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState, now: DateTime<Utc>) -> HealthResponse {
    let stream = state.stream.borrow().clone();
    let market = state.market.borrow().clone();

    let stream_status = StreamStatus {
        phase: stream.phase,
        connected: stream.connected,
        sessions_opened: stream.sessions_opened,
        last_message_age_secs: stream.last_message_at.map(|at| (now - at).num_seconds()),
    };
    let market_status = MarketStatus {
        market_open: state.calendar.window(now).open,
        watchlist_size: market.watchlist.len(),
        quotes: market.book.quotes.len(),
        loading: market.loading,
        history_ready: market.history_ready,
        last_quotes_at: market.last_quotes_at,
        last_history_at: market.last_history_at,
    };

    HealthResponse {
        status: determine_health_status(&stream_status, &market_status),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: now,
        stream: stream_status,
        market: market_status,
    }
}

fn determine_health_status(stream: &StreamStatus, market: &MarketStatus) -> HealthStatus {
    if stream.connected {
        HealthStatus::Healthy
    } else if stream.last_message_age_secs.is_some() || market.quotes > 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Unhealthy
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(connected: bool, age: Option<i64>) -> StreamStatus {
        StreamStatus {
            phase: if connected {
                ConnectionPhase::Open
            } else {
                ConnectionPhase::Idle
            },
            connected,
            sessions_opened: 1,
            last_message_age_secs: age,
        }
    }

    fn market(quotes: usize) -> MarketStatus {
        MarketStatus {
            market_open: false,
            watchlist_size: 3,
            quotes,
            loading: false,
            history_ready: true,
            last_quotes_at: None,
            last_history_at: None,
        }
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn connected_stream_is_healthy() {
        assert_eq!(
            determine_health_status(&stream(true, Some(2)), &market(0)),
            HealthStatus::Healthy
        );
    }

    #[test]
    fn last_known_data_is_degraded() {
        assert_eq!(
            determine_health_status(&stream(false, Some(120)), &market(0)),
            HealthStatus::Degraded
        );
        assert_eq!(
            determine_health_status(&stream(false, None), &market(3)),
            HealthStatus::Degraded
        );
    }

    #[test]
    fn cold_and_disconnected_is_unhealthy() {
        assert_eq!(
            determine_health_status(&stream(false, None), &market(0)),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn response_reflects_snapshots() {
        let now = Utc::now();
        let (_stream_tx, stream_rx) = watch::channel(StreamSnapshot {
            phase: ConnectionPhase::Open,
            connected: true,
            last_message_at: Some(now - chrono::Duration::seconds(7)),
            ..StreamSnapshot::default()
        });
        let (_market_tx, market_rx) = watch::channel(MarketSnapshot::default());
        let state = HealthServerState::new("0.1.0".to_string(), stream_rx, market_rx);

        let response = build_health_response(&state, now);

        assert_eq!(response.status, HealthStatus::Healthy);
        assert_eq!(response.stream.last_message_age_secs, Some(7));
        assert!(response.market.loading);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["stream"]["phase"], "open");
    }
}
