//! Prometheus Metrics Module
//!
//! Exposes feed metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Stream**: frames by kind, session closes by reason, reconnects, errors
//! - **Connection**: connected flag
//! - **Polling**: fetches by kind and result, skipped ticks by reason
//! - **Watchlist**: tracked symbol count
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Without an
//! installed recorder every recording call is a no-op.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::application::ports::CloseReason;
use crate::domain::polling::{ResourceClass, SkipReason};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling this again returns the handle installed by the first call.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Stream
    describe_counter!(
        "dashboard_stream_frames_total",
        "Inbound stream frames by kind"
    );
    describe_counter!(
        "dashboard_stream_sessions_closed_total",
        "Stream sessions closed by reason"
    );
    describe_counter!(
        "dashboard_stream_reconnects_total",
        "Stream reconnect attempts"
    );
    describe_counter!(
        "dashboard_stream_errors_total",
        "Stream errors by stage"
    );
    describe_gauge!(
        "dashboard_stream_connected",
        "1 while a stream session is open"
    );

    // Polling
    describe_counter!(
        "dashboard_upstream_fetches_total",
        "Upstream fetches by kind and result"
    );
    describe_counter!(
        "dashboard_scheduler_ticks_skipped_total",
        "Scheduler ticks that fetched nothing, by reason"
    );
    describe_gauge!(
        "dashboard_watchlist_symbols",
        "Number of tracked symbols"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for inbound stream frames.
#[derive(Debug, Clone, Copy)]
pub enum FrameKind {
    /// Sensor data.
    Reading,
    /// Keepalive acknowledgment.
    Keepalive,
    /// Unparseable frame.
    Malformed,
}

impl FrameKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Reading => "reading",
            Self::Keepalive => "keepalive",
            Self::Malformed => "malformed",
        }
    }
}

/// Metric labels for upstream fetches.
#[derive(Debug, Clone, Copy)]
pub enum FetchKind {
    /// Background quote batch.
    Quotes,
    /// Background history batch.
    History,
    /// Forced single-symbol quote.
    ForcedQuote,
    /// Forced single-symbol history.
    ForcedHistory,
}

impl FetchKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Quotes => "quotes",
            Self::History => "history",
            Self::ForcedQuote => "forced_quote",
            Self::ForcedHistory => "forced_history",
        }
    }
}

impl From<ResourceClass> for FetchKind {
    fn from(class: ResourceClass) -> Self {
        match class {
            ResourceClass::Quotes => Self::Quotes,
            ResourceClass::History => Self::History,
        }
    }
}

/// Metric labels for fetch results.
#[derive(Debug, Clone, Copy)]
pub enum FetchResult {
    /// Data received and merged.
    Success,
    /// Upstream or network failure.
    Failure,
    /// Refused by the local quota.
    Denied,
}

impl FetchResult {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Denied => "denied",
        }
    }
}

/// Record an inbound stream frame.
pub fn record_frame(kind: FrameKind) {
    counter!("dashboard_stream_frames_total", "kind" => kind.as_str()).increment(1);
}

/// Record a closed stream session.
pub fn record_session_closed(reason: CloseReason) {
    counter!(
        "dashboard_stream_sessions_closed_total",
        "reason" => reason.as_str(),
        "forced" => if reason.is_forced() { "true" } else { "false" }
    )
    .increment(1);
}

/// Record a reconnect attempt.
pub fn record_reconnect() {
    counter!("dashboard_stream_reconnects_total").increment(1);
}

/// Record a stream error.
pub fn record_stream_error(stage: &'static str) {
    counter!("dashboard_stream_errors_total", "stage" => stage).increment(1);
}

/// Update the connected flag.
pub fn set_stream_connected(connected: bool) {
    gauge!("dashboard_stream_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record an upstream fetch outcome.
pub fn record_fetch(kind: FetchKind, result: FetchResult) {
    counter!(
        "dashboard_upstream_fetches_total",
        "kind" => kind.as_str(),
        "result" => result.as_str()
    )
    .increment(1);
}

/// Record a tick that fetched nothing.
pub fn record_tick_skipped(reason: SkipReason) {
    counter!(
        "dashboard_scheduler_ticks_skipped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Update the tracked symbol count.
#[allow(clippy::cast_precision_loss)]
pub fn set_watchlist_size(size: usize) {
    gauge!("dashboard_watchlist_symbols").set(size as f64);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_kind_as_str() {
        assert_eq!(FrameKind::Reading.as_str(), "reading");
        assert_eq!(FrameKind::Keepalive.as_str(), "keepalive");
        assert_eq!(FrameKind::Malformed.as_str(), "malformed");
    }

    #[test]
    fn fetch_kind_from_class() {
        assert_eq!(FetchKind::from(ResourceClass::Quotes).as_str(), "quotes");
        assert_eq!(FetchKind::from(ResourceClass::History).as_str(), "history");
        assert_eq!(FetchKind::ForcedHistory.as_str(), "forced_history");
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        record_frame(FrameKind::Reading);
        record_session_closed(CloseReason::WatchdogTimeout);
        record_fetch(FetchKind::Quotes, FetchResult::Denied);
        set_watchlist_size(5);
    }
}
