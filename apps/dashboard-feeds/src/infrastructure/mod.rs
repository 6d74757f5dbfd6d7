//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Configuration loading from the environment.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// WebSocket adapter for the sensor stream.
pub mod transport;

/// HTTP adapter for the quote upstream.
pub mod upstream;
