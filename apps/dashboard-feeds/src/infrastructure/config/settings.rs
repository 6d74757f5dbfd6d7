//! Dashboard Feed Settings
//!
//! Configuration types for the feed service, loaded from environment
//! variables. Only the serving origin is required; everything else has a
//! default tuned for a single dashboard on a home network.

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use reqwest::Url;

use crate::domain::market::MarketCalendar;
use crate::domain::polling::PollPolicy;
use crate::domain::quota::{
    CREDITS_PER_DAY, CREDITS_PER_MINUTE, DailyBudget, QuotaGuard, RESERVE_PER_SESSION_HOUR,
    RateWindow,
};

/// Fixed path of the sensor stream on the serving origin.
pub const STREAM_PATH: &str = "/ruuvitag/ws";

/// Sensor stream settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    /// Maximum silence before an open session is replaced.
    pub silence_budget: Duration,
    /// Keepalive send interval.
    pub heartbeat_interval: Duration,
    /// Health-check evaluation interval.
    pub health_check_interval: Duration,
    /// Fixed delay before reconnecting.
    pub reconnect_delay: Duration,
    /// Minimum spacing of displayed value changes.
    pub display_throttle: Duration,
    /// Timeout for opening the channel.
    pub connect_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            silence_budget: Duration::from_secs(45),
            heartbeat_interval: Duration::from_secs(20),
            health_check_interval: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(5),
            display_throttle: Duration::from_millis(1000),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Poll scheduler and upstream quota settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Scheduler tick period.
    pub tick_interval: Duration,
    /// Maximum jitter added to the first tick.
    pub max_tick_jitter: Duration,
    /// Minimum spacing of background quote batches.
    pub quote_interval: Duration,
    /// Minimum spacing of background history batches.
    pub history_interval: Duration,
    /// Minimum quote age before history may run.
    pub min_safety_offset: Duration,
    /// Minimum quote age before a closed-market catch-up.
    pub catch_up_threshold: Duration,
    /// Upstream credits per rolling minute.
    pub credits_per_minute: u32,
    /// Upstream credits per exchange-local day.
    pub credits_per_day: u32,
    /// Credits reserved per remaining session hour against forced fetches.
    pub reserve_per_session_hour: u32,
    /// Timeout for one upstream request.
    pub request_timeout: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        let policy = PollPolicy::default();
        Self {
            tick_interval: policy.tick_interval,
            max_tick_jitter: policy.max_tick_jitter,
            quote_interval: to_std(policy.quote_interval),
            history_interval: to_std(policy.history_interval),
            min_safety_offset: to_std(policy.min_safety_offset),
            catch_up_threshold: to_std(policy.catch_up_threshold),
            credits_per_minute: CREDITS_PER_MINUTE,
            credits_per_day: CREDITS_PER_DAY,
            reserve_per_session_hour: RESERVE_PER_SESSION_HOUR,
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl SchedulerSettings {
    /// Build the scheduling policy.
    #[must_use]
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            tick_interval: self.tick_interval,
            max_tick_jitter: self.max_tick_jitter,
            quote_interval: to_chrono(self.quote_interval),
            history_interval: to_chrono(self.history_interval),
            min_safety_offset: to_chrono(self.min_safety_offset),
            catch_up_threshold: to_chrono(self.catch_up_threshold),
            ..PollPolicy::default()
        }
    }

    /// Build the quota guard.
    #[must_use]
    pub fn quota_guard(&self) -> QuotaGuard {
        QuotaGuard::new(
            MarketCalendar::default(),
            RateWindow::new(self.credits_per_minute, ChronoDuration::minutes(1)),
            DailyBudget::new(self.credits_per_day, self.reserve_per_session_hour),
        )
    }
}

fn to_std(duration: ChronoDuration) -> Duration {
    duration.to_std().unwrap_or_default()
}

fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or(ChronoDuration::MAX)
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check and metrics HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8082 }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardConfig {
    /// Origin the dashboard is served from.
    pub origin: Url,
    /// Base URL of the quote and watchlist API.
    pub api_base_url: Url,
    /// Sensor stream address derived from the origin.
    pub stream_url: Url,
    /// Server port settings.
    pub server: ServerSettings,
    /// Sensor stream settings.
    pub stream: StreamSettings,
    /// Scheduler settings.
    pub scheduler: SchedulerSettings,
}

impl DashboardConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `DASHBOARD_ORIGIN` is missing or any URL or
    /// duration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let origin = lookup("DASHBOARD_ORIGIN")
            .ok_or_else(|| ConfigError::MissingEnvVar("DASHBOARD_ORIGIN".to_string()))?;
        if origin.trim().is_empty() {
            return Err(ConfigError::EmptyValue("DASHBOARD_ORIGIN".to_string()));
        }
        let origin = parse_url("DASHBOARD_ORIGIN", origin.trim())?;
        let stream_url = derive_stream_url(&origin)?;

        let api_base_url = match lookup("DASHBOARD_API_BASE_URL").filter(|v| !v.trim().is_empty())
        {
            Some(value) => parse_url("DASHBOARD_API_BASE_URL", value.trim())?,
            None => origin.clone(),
        };

        let server = ServerSettings {
            health_port: parse_env(
                &lookup,
                "DASHBOARD_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        let defaults = StreamSettings::default();
        let stream = StreamSettings {
            silence_budget: parse_env_duration_secs(
                &lookup,
                "STREAM_SILENCE_BUDGET_SECS",
                defaults.silence_budget,
            )?,
            heartbeat_interval: parse_env_duration_secs(
                &lookup,
                "STREAM_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            )?,
            health_check_interval: parse_env_duration_secs(
                &lookup,
                "STREAM_HEALTH_CHECK_INTERVAL_SECS",
                defaults.health_check_interval,
            )?,
            reconnect_delay: parse_env_duration_millis(
                &lookup,
                "STREAM_RECONNECT_DELAY_MS",
                defaults.reconnect_delay,
            )?,
            display_throttle: parse_env_duration_millis(
                &lookup,
                "STREAM_DISPLAY_THROTTLE_MS",
                defaults.display_throttle,
            )?,
            connect_timeout: parse_env_duration_secs(
                &lookup,
                "STREAM_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout,
            )?,
        };
        if stream.heartbeat_interval >= stream.silence_budget {
            return Err(ConfigError::Invalid {
                key: "STREAM_HEARTBEAT_INTERVAL_SECS".to_string(),
                reason: "must be shorter than the silence budget".to_string(),
            });
        }

        let defaults = SchedulerSettings::default();
        let scheduler = SchedulerSettings {
            tick_interval: parse_env_duration_secs(
                &lookup,
                "SCHEDULER_TICK_SECS",
                defaults.tick_interval,
            )?,
            max_tick_jitter: parse_env_u64(&lookup, "SCHEDULER_MAX_TICK_JITTER_MS")
                .map_or(defaults.max_tick_jitter, Duration::from_millis),
            quote_interval: parse_env_duration_secs(
                &lookup,
                "SCHEDULER_QUOTE_INTERVAL_SECS",
                defaults.quote_interval,
            )?,
            history_interval: parse_env_duration_secs(
                &lookup,
                "SCHEDULER_HISTORY_INTERVAL_SECS",
                defaults.history_interval,
            )?,
            min_safety_offset: parse_env_duration_secs(
                &lookup,
                "SCHEDULER_MIN_SAFETY_OFFSET_SECS",
                defaults.min_safety_offset,
            )?,
            catch_up_threshold: parse_env_duration_secs(
                &lookup,
                "SCHEDULER_CATCH_UP_THRESHOLD_SECS",
                defaults.catch_up_threshold,
            )?,
            credits_per_minute: parse_env(
                &lookup,
                "UPSTREAM_CREDITS_PER_MINUTE",
                defaults.credits_per_minute,
            ),
            credits_per_day: parse_env(&lookup, "UPSTREAM_CREDITS_PER_DAY", defaults.credits_per_day),
            reserve_per_session_hour: parse_env(
                &lookup,
                "UPSTREAM_RESERVE_PER_SESSION_HOUR",
                defaults.reserve_per_session_hour,
            ),
            request_timeout: parse_env_duration_secs(
                &lookup,
                "UPSTREAM_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout,
            )?,
        };

        Ok(Self {
            origin,
            api_base_url,
            stream_url,
            server,
            stream,
            scheduler,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable holds an unusable value.
    #[error("environment variable {key} is invalid: {reason}")]
    Invalid {
        /// Variable name.
        key: String,
        /// What was wrong with it.
        reason: String,
    },
}

fn parse_url(key: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::Invalid {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Derive the stream address from the serving origin: same host and port,
/// websocket scheme, fixed path.
///
/// # Errors
///
/// Returns an error if the origin is not `http` or `https`.
pub fn derive_stream_url(origin: &Url) -> Result<Url, ConfigError> {
    let scheme = match origin.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(ConfigError::Invalid {
                key: "DASHBOARD_ORIGIN".to_string(),
                reason: format!("unsupported scheme {other}"),
            });
        }
    };

    let mut url = origin.clone();
    url.set_scheme(scheme).map_err(|()| ConfigError::Invalid {
        key: "DASHBOARD_ORIGIN".to_string(),
        reason: format!("cannot switch {} to {scheme}", origin.scheme()),
    })?;
    url.set_path(STREAM_PATH);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

fn parse_env_duration_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    non_zero(
        key,
        parse_env_u64(lookup, key).map_or(default, Duration::from_secs),
    )
}

fn parse_env_duration_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    non_zero(
        key,
        parse_env_u64(lookup, key).map_or(default, Duration::from_millis),
    )
}

fn non_zero(key: &str, duration: Duration) -> Result<Duration, ConfigError> {
    if duration.is_zero() {
        Err(ConfigError::Invalid {
            key: key.to_string(),
            reason: "must be greater than zero".to_string(),
        })
    } else {
        Ok(duration)
    }
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
    fn origin_is_required() {
        let err = DashboardConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(key) if key == "DASHBOARD_ORIGIN"));
    }

    #[test]
    fn stream_url_follows_origin_scheme() {
        let config =
            DashboardConfig::from_lookup(lookup(&[("DASHBOARD_ORIGIN", "http://dash.local:8000")]))
                .unwrap();
        assert_eq!(config.stream_url.as_str(), "ws://dash.local:8000/ruuvitag/ws");

        let config = DashboardConfig::from_lookup(lookup(&[(
            "DASHBOARD_ORIGIN",
            "https://dash.example.com/app?x=1",
        )]))
        .unwrap();
        assert_eq!(
            config.stream_url.as_str(),
            "wss://dash.example.com/ruuvitag/ws"
        );
    }

    #[test]
    fn unsupported_origin_scheme_is_rejected() {
        let err = DashboardConfig::from_lookup(lookup(&[("DASHBOARD_ORIGIN", "ftp://dash.local")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn api_base_defaults_to_origin() {
        let config =
            DashboardConfig::from_lookup(lookup(&[("DASHBOARD_ORIGIN", "http://dash.local:8000")]))
                .unwrap();
        assert_eq!(config.api_base_url, config.origin);

        let config = DashboardConfig::from_lookup(lookup(&[
            ("DASHBOARD_ORIGIN", "http://dash.local:8000"),
            ("DASHBOARD_API_BASE_URL", "http://api.local:9000"),
        ]))
        .unwrap();
        assert_eq!(config.api_base_url.as_str(), "http://api.local:9000/");
    }

    #[test]
    fn defaults_apply() {
        let config =
            DashboardConfig::from_lookup(lookup(&[("DASHBOARD_ORIGIN", "http://dash.local")]))
                .unwrap();
        assert_eq!(config.stream, StreamSettings::default());
        assert_eq!(config.scheduler, SchedulerSettings::default());
        assert_eq!(config.server.health_port, 8082);
        assert_eq!(config.scheduler.poll_policy(), PollPolicy::default());
    }

    #[test]
    fn overrides_and_garbage() {
        let config = DashboardConfig::from_lookup(lookup(&[
            ("DASHBOARD_ORIGIN", "http://dash.local"),
            ("STREAM_SILENCE_BUDGET_SECS", "60"),
            ("STREAM_RECONNECT_DELAY_MS", "2500"),
            ("DASHBOARD_HEALTH_PORT", "not-a-port"),
        ]))
        .unwrap();
        assert_eq!(config.stream.silence_budget, Duration::from_secs(60));
        assert_eq!(config.stream.reconnect_delay, Duration::from_millis(2500));
        assert_eq!(config.server.health_port, 8082);
    }

    #[test]
    fn zero_durations_are_rejected() {
        let err = DashboardConfig::from_lookup(lookup(&[
            ("DASHBOARD_ORIGIN", "http://dash.local"),
            ("SCHEDULER_TICK_SECS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key, .. } if key == "SCHEDULER_TICK_SECS"));
    }

    #[test]
    fn heartbeat_must_beat_the_watchdog() {
        let err = DashboardConfig::from_lookup(lookup(&[
            ("DASHBOARD_ORIGIN", "http://dash.local"),
            ("STREAM_HEARTBEAT_INTERVAL_SECS", "45"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
