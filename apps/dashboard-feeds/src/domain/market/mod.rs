//! Market Data Types
//!
//! Exchange calendar evaluation and quote/history types.

pub mod calendar;
pub mod quotes;

pub use calendar::{MarketCalendar, MarketWindow};
pub use quotes::{
    HistoryInterval, PricePoint, QuoteBook, StockQuote, Symbol, SymbolHistory, WatchlistChanges,
    WatchlistSnapshot,
};
