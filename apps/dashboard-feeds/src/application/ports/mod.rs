//! Port Interfaces
//!
//! Contracts between the core components and the outside world, following
//! the Hexagonal Architecture pattern. Infrastructure adapters implement
//! these; tests substitute in-memory fakes.
//!
//! ## Driven Ports (Outbound)
//!
//! - `StreamTransport` / `StreamChannel`: persistent push channel
//! - `QuoteSource`: quote and history batch calls
//! - `WatchlistSource`: tracked symbols
//! - `Clock`: wall-clock time

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::market::{HistoryInterval, StockQuote, Symbol, SymbolHistory};

// =============================================================================
// Stream Transport
// =============================================================================

/// Application-level reason for closing a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Watchdog deadline passed without any inbound frame.
    WatchdogTimeout,
    /// Health check saw no data frame within the silence budget.
    HealthCheckStale,
    /// Peer closed the channel.
    PeerClosed,
    /// Transport reported an error.
    TransportError,
    /// Supervisor is shutting down.
    Shutdown,
}

impl CloseReason {
    /// Close code sent to the peer.
    ///
    /// The two forced-close reasons use distinct application codes so they can
    /// be told apart in server logs.
    #[must_use]
    pub const fn code(&self) -> u16 {
        match self {
            Self::WatchdogTimeout => 4000,
            Self::HealthCheckStale => 4001,
            Self::PeerClosed | Self::Shutdown => 1000,
            Self::TransportError => 1011,
        }
    }

    /// Label used in logs, metrics and close frames.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::WatchdogTimeout => "watchdog_timeout",
            Self::HealthCheckStale => "health_check_stale",
            Self::PeerClosed => "peer_closed",
            Self::TransportError => "transport_error",
            Self::Shutdown => "shutdown",
        }
    }

    /// Whether the supervisor forced this close because of silence.
    #[must_use]
    pub const fn is_forced(&self) -> bool {
        matches!(self, Self::WatchdogTimeout | Self::HealthCheckStale)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by a stream transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Opening the channel failed.
    #[error("connect failed: {0}")]
    Connect(String),
    /// The channel failed while open.
    #[error("channel error: {0}")]
    Channel(String),
    /// The channel is already closed.
    #[error("channel closed")]
    Closed,
}

/// One inbound event from an open channel.
#[derive(Debug)]
pub enum ChannelEvent {
    /// A text frame.
    Text(String),
    /// The peer closed the channel.
    Closed,
    /// The channel failed.
    Error(TransportError),
}

/// Opens persistent channels.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Open a new channel.
    ///
    /// Call-level timeouts are the transport's responsibility.
    async fn connect(&self) -> Result<Box<dyn StreamChannel>, TransportError>;
}

/// An open persistent channel, exclusively owned by one session.
#[async_trait]
pub trait StreamChannel: Send {
    /// Send a text frame.
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError>;

    /// Wait for the next inbound event. Must be cancel-safe.
    async fn recv(&mut self) -> ChannelEvent;

    /// Close the channel with an application reason.
    async fn close(&mut self, reason: CloseReason) -> Result<(), TransportError>;
}

// =============================================================================
// Quote Upstream
// =============================================================================

/// Errors surfaced by the quote upstream.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    /// Network-level failure.
    #[error("network error: {0}")]
    Network(String),
    /// Upstream answered with a non-success status.
    #[error("upstream returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error body or reason.
        message: String,
    },
    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
    /// Local quota refused the request.
    #[error("quota denied: {0}")]
    Quota(#[from] crate::domain::quota::QuotaDenied),
}

/// Batch quote and history calls against the upstream.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Fetch latest quotes for `symbols`.
    async fn fetch_quotes(&self, symbols: &[Symbol]) -> Result<Vec<StockQuote>, UpstreamError>;

    /// Fetch `bars` bars of `interval` history for `symbols`.
    async fn fetch_history(
        &self,
        symbols: &[Symbol],
        interval: HistoryInterval,
        bars: u32,
    ) -> Result<Vec<SymbolHistory>, UpstreamError>;
}

/// Source of the tracked symbol list.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WatchlistSource: Send + Sync {
    /// Fetch the tracked symbols.
    async fn fetch_watchlist(&self) -> Result<Vec<Symbol>, UpstreamError>;
}

// =============================================================================
// Clock
// =============================================================================

/// Wall-clock time source.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
