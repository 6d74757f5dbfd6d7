//! Configuration Module
//!
//! Configuration loading for the feed service.

mod settings;

pub use settings::{
    ConfigError, DashboardConfig, STREAM_PATH, SchedulerSettings, ServerSettings, StreamSettings,
    derive_stream_url,
};
