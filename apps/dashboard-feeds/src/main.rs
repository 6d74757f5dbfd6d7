//! Dashboard Feeds Binary
//!
//! Runs the sensor stream supervisor and the market data poll scheduler,
//! and serves their state on the health port.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin dashboard-feeds
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `DASHBOARD_ORIGIN`: Dashboard backend origin, e.g. `http://dash.local:8000`
//!
//! ## Optional
//! - `DASHBOARD_API_BASE_URL`: Quote API base (default: origin)
//! - `DASHBOARD_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `STREAM_*`: Stream liveness and reconnect timing
//! - `SCHEDULER_*`: Poll cadence and quota
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `RUST_LOG`: Log filter (default: `dashboard_feeds=info`)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dashboard_feeds::infrastructure::telemetry;
use dashboard_feeds::{
    DashboardConfig, HealthServer, HealthServerState, HttpUpstream, PollScheduler, SchedulerPorts,
    StreamSupervisor, SupervisorConfig, SystemClock, WebSocketTransport, init_metrics,
};
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("failed to install rustls crypto provider");
    }

    load_dotenv();

    let _telemetry_guard = telemetry::init(&telemetry::TelemetryConfig::from_env());

    tracing::info!("Starting dashboard feeds");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics().context("installing metrics recorder")?;

    let config = DashboardConfig::from_env().context("loading configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Sensor stream
    let transport = Arc::new(WebSocketTransport::new(
        config.stream_url.clone(),
        config.stream.connect_timeout,
    ));
    let (supervisor, stream_handle) = StreamSupervisor::new(
        transport,
        SupervisorConfig::from_stream_settings(&config.stream),
        shutdown_token.clone(),
    );

    // Market data
    let upstream = Arc::new(
        HttpUpstream::new(
            config.api_base_url.clone(),
            config.scheduler.request_timeout,
        )
        .context("building upstream client")?,
    );
    let ports = SchedulerPorts {
        quotes: upstream.clone(),
        watchlist: upstream,
        clock: Arc::new(SystemClock),
    };
    let (scheduler, market_handle) = PollScheduler::new(
        ports,
        config.scheduler.poll_policy(),
        config.scheduler.quota_guard(),
        shutdown_token.clone(),
    );

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        stream_handle.subscribe(),
        market_handle.subscribe(),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );

    let mut tasks = JoinSet::new();
    tasks.spawn(
        supervisor
            .run()
            .instrument(telemetry::supervisor_span(&config.stream_url)),
    );
    tasks.spawn(
        scheduler
            .run()
            .instrument(telemetry::scheduler_span(&config.api_base_url)),
    );
    tasks.spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("Dashboard feeds ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        while tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        tracing::warn!("Shutdown timed out, aborting remaining tasks");
        tasks.abort_all();
    }

    // Handles own the command channels; keep them alive until the tasks exit.
    drop(stream_handle);
    drop(market_handle);

    tracing::info!("Dashboard feeds stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &DashboardConfig) {
    tracing::info!(
        origin = %config.origin,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        stream_url = %config.stream_url,
        api_base_url = %config.api_base_url,
        silence_budget_secs = config.stream.silence_budget.as_secs(),
        reconnect_delay_secs = config.stream.reconnect_delay.as_secs(),
        "Feed endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler installation failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
