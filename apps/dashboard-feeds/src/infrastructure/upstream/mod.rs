//! Quote Upstream Adapters
//!
//! HTTP implementation of the quote and watchlist ports.

mod http;

pub use http::HttpUpstream;
