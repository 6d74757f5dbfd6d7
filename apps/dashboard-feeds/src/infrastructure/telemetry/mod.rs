//! Tracing Setup
//!
//! One subscriber for the process: a fmt layer filtered by `RUST_LOG`
//! (falling back to [`DEFAULT_FILTER`]) and, while an OTLP endpoint is
//! configured, a span exporter next to it.
//!
//! The supervisor and the scheduler each run inside their own root span
//! ([`supervisor_span`], [`scheduler_span`]), so every event they log carries
//! the feed it belongs to and exported traces group by feed.
//!
//! # Environment Variables
//!
//! - `OTEL_ENABLED`: "false" turns the exporter off (default: on)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: http://localhost:4318)
//! - `OTEL_SERVICE_NAME`: Service name for traces (default: dashboard-feeds)
//! - `RUST_LOG`: Filter directives (default: [`DEFAULT_FILTER`])

use std::fmt;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing::{Span, info_span};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "dashboard_feeds=info,tungstenite=warn,reqwest=warn,hyper=warn";

const DEFAULT_SERVICE_NAME: &str = "dashboard-feeds";
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4318";

/// Flushes and shuts down the span exporter when dropped.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Span exporter shutdown failed: {e}");
        }
    }
}

/// Subscriber configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// OTLP endpoint; `None` keeps spans local.
    pub otlp_endpoint: Option<String>,
    /// Service name attached to exported spans.
    pub service_name: String,
    /// `EnvFilter` directives.
    pub filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl TelemetryConfig {
    /// Read configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let enabled = value("OTEL_ENABLED").is_none_or(|v| !v.trim().eq_ignore_ascii_case("false"));
        let otlp_endpoint = enabled.then(|| {
            value("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or_else(|| DEFAULT_OTLP_ENDPOINT.to_string())
        });

        Self {
            otlp_endpoint,
            service_name: value("OTEL_SERVICE_NAME")
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            filter: value("RUST_LOG").unwrap_or_else(|| DEFAULT_FILTER.to_string()),
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.filter).unwrap_or_else(|e| {
            eprintln!("Ignoring invalid RUST_LOG '{}': {e}", self.filter);
            EnvFilter::new(DEFAULT_FILTER)
        })
    }
}

/// Install the global subscriber.
///
/// Keep the returned guard alive until shutdown; dropping it flushes any
/// spans still queued for export.
#[must_use]
pub fn init(config: &TelemetryConfig) -> TelemetryGuard {
    let tracer_provider = config
        .otlp_endpoint
        .as_deref()
        .and_then(|endpoint| tracer_provider(endpoint, &config.service_name));

    let otel_layer = tracer_provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    TelemetryGuard { tracer_provider }
}

fn tracer_provider(endpoint: &str, service_name: &str) -> Option<SdkTracerProvider> {
    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            eprintln!("OTLP exporter unavailable, tracing locally only: {e}");
            return None;
        }
    };

    Some(
        SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(
                opentelemetry_sdk::Resource::builder()
                    .with_service_name(service_name.to_string())
                    .build(),
            )
            .build(),
    )
}

/// Root span for the sensor stream supervisor.
#[must_use]
pub fn supervisor_span(stream_url: &impl fmt::Display) -> Span {
    info_span!("stream_supervisor", feed = "sensor", stream.url = %stream_url)
}

/// Root span for the market data poll scheduler.
#[must_use]
pub fn scheduler_span(api_base_url: &impl fmt::Display) -> Span {
    info_span!("poll_scheduler", feed = "market", api.base_url = %api_base_url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_export_to_local_collector() {
        let config = TelemetryConfig::default();
        assert_eq!(config.otlp_endpoint.as_deref(), Some(DEFAULT_OTLP_ENDPOINT));
        assert_eq!(config.service_name, "dashboard-feeds");
        assert_eq!(config.filter, DEFAULT_FILTER);
    }

    #[test]
    fn otel_disabled_keeps_spans_local() {
        let config = TelemetryConfig::from_lookup(lookup(&[
            ("OTEL_ENABLED", "FALSE"),
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4317"),
        ]));
        assert_eq!(config.otlp_endpoint, None);
    }

    #[test]
    fn environment_overrides_endpoint_and_filter() {
        let config = TelemetryConfig::from_lookup(lookup(&[
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4317"),
            ("OTEL_SERVICE_NAME", "kitchen-dashboard"),
            ("RUST_LOG", "dashboard_feeds=debug"),
            ("OTEL_ENABLED", ""),
        ]));
        assert_eq!(config.otlp_endpoint.as_deref(), Some("http://collector:4317"));
        assert_eq!(config.service_name, "kitchen-dashboard");
        assert_eq!(config.filter, "dashboard_feeds=debug");
    }

    #[test]
    fn invalid_filter_falls_back_to_default() {
        let config = TelemetryConfig {
            filter: "dashboard_feeds=[".to_string(),
            ..TelemetryConfig::default()
        };
        let filter = config.env_filter().to_string();
        assert!(filter.contains("dashboard_feeds=info"), "{filter}");
    }

    #[test]
    fn feed_spans_are_named_per_component() {
        tracing::subscriber::with_default(tracing_subscriber::registry(), || {
            let supervisor = supervisor_span(&"ws://dash.local:8000/ws/sensors");
            let scheduler = scheduler_span(&"http://dash.local:8000/api");

            assert_eq!(
                supervisor.metadata().map(|m| m.name()),
                Some("stream_supervisor")
            );
            assert_eq!(scheduler.metadata().map(|m| m.name()), Some("poll_scheduler"));
            assert!(
                scheduler
                    .metadata()
                    .is_some_and(|m| m.fields().field("api.base_url").is_some())
            );
        });
    }
}
