//! HTTP Quote Upstream
//!
//! `reqwest` client for the dashboard backend's stock endpoints:
//!
//! - `GET stocks/quotes?symbols=A,B`
//! - `GET stocks/history?symbols=A,B&interval=1min&count=N`
//! - `GET stocks/watchlist`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::application::ports::{QuoteSource, UpstreamError, WatchlistSource};
use crate::domain::market::{HistoryInterval, StockQuote, Symbol, SymbolHistory};

const QUOTES_PATH: &str = "stocks/quotes";
const HISTORY_PATH: &str = "stocks/history";
const WATCHLIST_PATH: &str = "stocks/watchlist";

/// Longest error body kept in an `UpstreamError::Status` message.
const MAX_ERROR_BODY: usize = 256;

/// Watchlist entries are objects on the backend, but a bare symbol list is
/// accepted too.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WatchlistEntry {
    Stock { symbol: Symbol },
    Bare(Symbol),
}

impl WatchlistEntry {
    fn into_symbol(self) -> Symbol {
        match self {
            Self::Stock { symbol } | Self::Bare(symbol) => symbol,
        }
    }
}

/// HTTP adapter for [`QuoteSource`] and [`WatchlistSource`].
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: Client,
    base_url: Url,
}

impl HttpUpstream {
    /// Create a client rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `UpstreamError::Network` if the HTTP client cannot be built.
    pub fn new(mut base_url: Url, timeout: Duration) -> Result<Self, UpstreamError> {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("dashboard-feeds/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UpstreamError::Network(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    /// Base URL every path is joined onto.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, UpstreamError> {
        self.base_url
            .join(path)
            .map_err(|e| UpstreamError::Network(format!("invalid endpoint {path}: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, UpstreamError> {
        let url = self.endpoint(path)?;
        tracing::debug!(%url, "Upstream request");

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| UpstreamError::Network(e.to_string()))?;

        let response = check_status(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}

async fn check_status(response: Response) -> Result<Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut message = response.text().await.unwrap_or_default();
    if message.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }
    if message.is_empty() {
        message = status.canonical_reason().unwrap_or("unknown").to_string();
    }

    Err(UpstreamError::Status {
        status: status.as_u16(),
        message,
    })
}

fn join_symbols(symbols: &[Symbol]) -> String {
    symbols.join(",")
}

#[async_trait]
impl QuoteSource for HttpUpstream {
    async fn fetch_quotes(&self, symbols: &[Symbol]) -> Result<Vec<StockQuote>, UpstreamError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        self.get_json(QUOTES_PATH, &[("symbols", join_symbols(symbols))])
            .await
    }

    async fn fetch_history(
        &self,
        symbols: &[Symbol],
        interval: HistoryInterval,
        bars: u32,
    ) -> Result<Vec<SymbolHistory>, UpstreamError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        self.get_json(
            HISTORY_PATH,
            &[
                ("symbols", join_symbols(symbols)),
                ("interval", interval.as_str().to_string()),
                ("count", bars.to_string()),
            ],
        )
        .await
    }
}

#[async_trait]
impl WatchlistSource for HttpUpstream {
    async fn fetch_watchlist(&self) -> Result<Vec<Symbol>, UpstreamError> {
        let entries: Vec<WatchlistEntry> = self.get_json(WATCHLIST_PATH, &[]).await?;
        Ok(entries.into_iter().map(WatchlistEntry::into_symbol).collect())
    }
}
