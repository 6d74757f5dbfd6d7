#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Dashboard Feeds - Live Data Supervision
//!
//! Keeps the home dashboard's two live feeds fresh: a push stream of
//! environmental sensor readings, and polled stock quotes and history from
//! a rate-limited upstream that only changes during market hours.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and decisions
//!   - `sensor`: Reading payloads and frame classification
//!   - `market`: Exchange calendar, quotes, history, watchlist
//!   - `polling`: Per-tick fetch decision
//!   - `quota`: Upstream credit accounting
//!
//! - **Application**: Long-running components and port definitions
//!   - `ports`: Transport, upstream and clock interfaces
//!   - `services`: Stream supervisor, poll scheduler, timer primitives
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `transport`: WebSocket channel to the sensor stream
//!   - `upstream`: HTTP client for quotes, history and watchlist
//!   - `config`: Environment configuration
//!   - `health`: Health, readiness and metrics endpoint
//!
//! # Data Flow
//!
//! ```text
//! sensor WS ──► StreamSupervisor ──► watch<StreamSnapshot> ──┐
//!                                                            ├──► view / health
//! quote API ◄─► PollScheduler ─────► watch<MarketSnapshot> ──┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types and decision logic with no I/O.
pub mod domain;

/// Application layer - Components and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market::{
    HistoryInterval, MarketCalendar, QuoteBook, StockQuote, Symbol, SymbolHistory,
    WatchlistSnapshot,
};
pub use domain::polling::{PollDecision, PollPolicy, SchedulerClock, SkipReason};
pub use domain::quota::{FetchPriority, QuotaGuard};
pub use domain::sensor::{SensorReading, StreamFrame};

// Components
pub use application::ports::{
    ChannelEvent, Clock, CloseReason, QuoteSource, StreamChannel, StreamTransport, SystemClock,
    TransportError, UpstreamError, WatchlistSource,
};
pub use application::services::{
    ConnectionPhase, MarketSnapshot, PollScheduler, SchedulerHandle, SchedulerPorts,
    StreamSnapshot, StreamSupervisor, SupervisorConfig, SupervisorHandle, Visibility,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, DashboardConfig, SchedulerSettings, ServerSettings, StreamSettings,
};

// Adapters
pub use infrastructure::transport::WebSocketTransport;
pub use infrastructure::upstream::HttpUpstream;

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
