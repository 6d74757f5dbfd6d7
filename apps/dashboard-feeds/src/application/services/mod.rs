//! Application Services
//!
//! The two long-running components and the timer primitives they share.
//!
//! - `StreamSupervisor`: keeps the sensor channel open and live
//! - `PollScheduler`: paces quote and history fetches against the upstream quota

pub mod display;
pub mod liveness;
pub mod reconnect;
pub mod scheduler;
pub mod supervisor;
pub mod timing;

pub use display::DisplayBuffer;
pub use liveness::{HealthCheck, LivenessConfig, Watchdog};
pub use reconnect::{ReconnectConfig, ReconnectTimer};
pub use scheduler::{
    MarketSnapshot, PollScheduler, SchedulerError, SchedulerHandle, SchedulerPorts,
};
pub use supervisor::{
    ConnectionPhase, SessionId, StreamSnapshot, StreamSupervisor, SupervisorConfig,
    SupervisorError, SupervisorHandle, Visibility,
};
