//! HTTP Upstream Integration Tests
//!
//! Exercises the reqwest adapter against a wiremock server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use reqwest::Url;
use rust_decimal::Decimal;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dashboard_feeds::{HistoryInterval, HttpUpstream, QuoteSource, UpstreamError, WatchlistSource};

async fn upstream(server: &MockServer) -> HttpUpstream {
    HttpUpstream::new(Url::parse(&server.uri()).unwrap(), Duration::from_secs(2)).unwrap()
}

fn symbols(list: &[&str]) -> Vec<String> {
    list.iter().map(ToString::to_string).collect()
}

#[tokio::test]
async fn quotes_are_requested_as_one_batch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stocks/quotes"))
        .and(query_param("symbols", "AAPL,MSFT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "symbol": "AAPL",
                "name": "Apple Inc.",
                "close": 231.5,
                "change": 1.25,
                "percent_change": 0.54,
                "high": 232.0,
                "low": 229.8,
                "volume": 41200000,
                "timestamp": "2026-10-13T20:00:00Z"
            },
            {
                "symbol": "MSFT",
                "close": "415.10",
                "change": "-2.40",
                "percent_change": "-0.57",
                "high": "418.00",
                "low": "414.20",
                "timestamp": "2026-10-13T20:00:00Z"
            }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let quotes = upstream(&server)
        .await
        .fetch_quotes(&symbols(&["AAPL", "MSFT"]))
        .await
        .unwrap();

    assert_eq!(quotes.len(), 2);
    assert_eq!(quotes[0].name, "Apple Inc.");
    assert_eq!(quotes[0].volume, 41_200_000);
    assert_eq!(quotes[1].close, Decimal::new(41_510, 2));
    assert_eq!(quotes[1].volume, 0);
}

#[tokio::test]
async fn history_passes_interval_and_bar_count() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stocks/history"))
        .and(query_param("symbols", "NVDA"))
        .and(query_param("interval", "1min"))
        .and(query_param("count", "390"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "symbol": "NVDA",
                "history": [
                    {"time": "2026-10-13T13:30:00Z", "price": 181.2},
                    {"time": "2026-10-13T13:31:00Z", "price": 181.6}
                ]
            }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let series = upstream(&server)
        .await
        .fetch_history(&symbols(&["NVDA"]), HistoryInterval::OneMinute, 390)
        .await
        .unwrap();

    assert_eq!(series.len(), 1);
    assert_eq!(series[0].history.len(), 2);
    assert_eq!(series[0].history[1].price, Decimal::new(1816, 1));
}

#[tokio::test]
async fn watchlist_reads_symbol_objects() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stocks/watchlist"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"symbol": "AAPL", "name": "Apple Inc."},
            {"symbol": "NVDA", "name": "NVIDIA Corporation"}
        ])))
        .mount(&server)
        .await;

    let list = upstream(&server).await.fetch_watchlist().await.unwrap();

    assert_eq!(list, symbols(&["AAPL", "NVDA"]));
}

#[tokio::test]
async fn error_status_is_surfaced_with_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stocks/quotes"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Twelve Data unavailable"))
        .mount(&server)
        .await;

    let err = upstream(&server)
        .await
        .fetch_quotes(&symbols(&["AAPL"]))
        .await
        .unwrap_err();

    match err {
        UpstreamError::Status { status, message } => {
            assert_eq!(status, 503);
            assert_eq!(message, "Twelve Data unavailable");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stocks/history"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = upstream(&server)
        .await
        .fetch_history(&symbols(&["AAPL"]), HistoryInterval::FifteenMinutes, 26)
        .await
        .unwrap_err();

    assert!(matches!(err, UpstreamError::Decode(_)));
}

#[tokio::test]
async fn slow_upstream_times_out_as_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stocks/watchlist"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let client =
        HttpUpstream::new(Url::parse(&server.uri()).unwrap(), Duration::from_millis(200)).unwrap();
    let err = client.fetch_watchlist().await.unwrap_err();

    assert!(matches!(err, UpstreamError::Network(_)));
}
