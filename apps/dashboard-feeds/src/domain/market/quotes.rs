//! Quote and History Types
//!
//! Canonical representation of per-symbol quotes and price history as
//! returned by the quote upstream, plus the merge-by-symbol book that the
//! scheduler publishes to the view layer.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A ticker symbol (e.g. "AAPL").
pub type Symbol = String;

/// Latest quote for a single symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockQuote {
    /// Ticker symbol.
    pub symbol: Symbol,
    /// Instrument name.
    #[serde(default)]
    pub name: String,
    /// Last price.
    pub close: Decimal,
    /// Absolute change since previous close.
    pub change: Decimal,
    /// Percentage change since previous close.
    pub percent_change: Decimal,
    /// Session high.
    pub high: Decimal,
    /// Session low.
    pub low: Decimal,
    /// Session volume.
    #[serde(default)]
    pub volume: u64,
    /// Time the quote was observed.
    pub timestamp: DateTime<Utc>,
}

/// One point of a price series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Bar time (UTC).
    pub time: DateTime<Utc>,
    /// Closing price of the bar.
    pub price: Decimal,
}

/// Price history for one symbol, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolHistory {
    /// Ticker symbol.
    pub symbol: Symbol,
    /// Points ordered oldest to newest.
    pub history: Vec<PricePoint>,
}

/// Bar interval selector for history requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HistoryInterval {
    /// One-minute bars, used for forced drill-in fetches.
    OneMinute,
    /// Five-minute bars.
    FiveMinutes,
    /// Fifteen-minute bars, used for background batches.
    #[default]
    FifteenMinutes,
}

impl HistoryInterval {
    /// Upstream interval selector.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1min",
            Self::FiveMinutes => "5min",
            Self::FifteenMinutes => "15min",
        }
    }

    /// Bar width in minutes.
    #[must_use]
    pub const fn minutes(&self) -> u32 {
        match self {
            Self::OneMinute => 1,
            Self::FiveMinutes => 5,
            Self::FifteenMinutes => 15,
        }
    }

    /// Number of bars needed to cover a session of `session_minutes`,
    /// including the bar that opens at the close.
    #[must_use]
    pub const fn bars_per_session(&self, session_minutes: u32) -> u32 {
        session_minutes / self.minutes() + 1
    }

    /// Parse an upstream interval selector.
    #[must_use]
    pub fn from_selector(s: &str) -> Option<Self> {
        match s {
            "1min" => Some(Self::OneMinute),
            "5min" => Some(Self::FiveMinutes),
            "15min" => Some(Self::FifteenMinutes),
            _ => None,
        }
    }
}

impl fmt::Display for HistoryInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the tracked symbols.
///
/// Owned by the watchlist service; the scheduler only ever replaces its copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchlistSnapshot {
    symbols: Vec<Symbol>,
}

/// Symbols added and removed between two watchlist snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchlistChanges {
    /// Symbols present only in the new snapshot.
    pub added: BTreeSet<Symbol>,
    /// Symbols present only in the old snapshot.
    pub removed: BTreeSet<Symbol>,
}

impl WatchlistChanges {
    /// Check if the snapshots were identical as sets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl WatchlistSnapshot {
    /// Build a snapshot, normalising symbols to upper case and dropping
    /// blanks and duplicates while keeping first-seen order.
    #[must_use]
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = BTreeSet::new();
        let symbols = symbols
            .into_iter()
            .map(|s| s.as_ref().trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .filter(|s| seen.insert(s.clone()))
            .collect();
        Self { symbols }
    }

    /// Tracked symbols in watchlist order.
    #[must_use]
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Number of tracked symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Check if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Check if a symbol is tracked.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.iter().any(|s| s == symbol)
    }

    /// Comma-joined symbol list for batch requests.
    #[must_use]
    pub fn joined(&self) -> String {
        self.symbols.join(",")
    }

    /// Compute what changed relative to `previous`.
    #[must_use]
    pub fn changes_since(&self, previous: &Self) -> WatchlistChanges {
        let new: BTreeSet<&Symbol> = self.symbols.iter().collect();
        let old: BTreeSet<&Symbol> = previous.symbols.iter().collect();
        WatchlistChanges {
            added: new.difference(&old).map(|s| (*s).clone()).collect(),
            removed: old.difference(&new).map(|s| (*s).clone()).collect(),
        }
    }
}

/// Per-symbol market data published to the view layer.
///
/// Every update merges by symbol; the maps are never replaced wholesale, so a
/// forced single-symbol result and a background batch cannot clobber each
/// other's unrelated symbols.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QuoteBook {
    /// Latest quote per symbol.
    pub quotes: BTreeMap<Symbol, StockQuote>,
    /// Background (coarse) history per symbol.
    pub history: BTreeMap<Symbol, SymbolHistory>,
    /// High-resolution history from forced drill-in fetches.
    pub intraday: BTreeMap<Symbol, SymbolHistory>,
}

impl QuoteBook {
    /// Merge quotes by symbol.
    pub fn merge_quotes(&mut self, quotes: impl IntoIterator<Item = StockQuote>) {
        for quote in quotes {
            self.quotes.insert(quote.symbol.clone(), quote);
        }
    }

    /// Merge background history by symbol.
    pub fn merge_history(&mut self, series: impl IntoIterator<Item = SymbolHistory>) {
        for entry in series {
            self.history.insert(entry.symbol.clone(), entry);
        }
    }

    /// Merge high-resolution history by symbol.
    pub fn merge_intraday(&mut self, series: impl IntoIterator<Item = SymbolHistory>) {
        for entry in series {
            self.intraday.insert(entry.symbol.clone(), entry);
        }
    }

    /// Drop every entry for symbols no longer on the watchlist.
    pub fn retain_watchlist(&mut self, watchlist: &WatchlistSnapshot) {
        self.quotes.retain(|symbol, _| watchlist.contains(symbol));
        self.history.retain(|symbol, _| watchlist.contains(symbol));
        self.intraday.retain(|symbol, _| watchlist.contains(symbol));
    }
}
