//! Stream Connection Supervisor
//!
//! Owns one persistent sensor channel end to end. The supervisor is a single
//! task that exclusively owns its session state and handles one event at a
//! time, so handlers never interleave.
//!
//! # Session States
//!
//! ```text
//!          start / reconnect due / foreground
//!   Idle ─────────────────────────────────────► Connecting
//!    ▲                                              │ open
//!    │ released, reconnect scheduled                ▼
//!  Closing ◄──── watchdog / health check / ──────  Open ◄─┐
//!                peer close / transport error       │     │ frame
//!                                                   └─────┘
//! ```
//!
//! The watchdog deadline, the heartbeat ticker and the health-check ticker
//! live inside the `Open` state value. Leaving `Open` drops them, and every
//! event they produce carries the [`SessionId`] it was armed for, so a timer
//! can never act on a replaced session.
//!
//! The view layer reads [`StreamSnapshot`] through a `watch` channel; its
//! `connected` flag is true exactly while a session is `Open`.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::display::{DEFAULT_THROTTLE, DisplayBuffer};
use super::liveness::{HealthCheck, LivenessConfig, Watchdog};
use super::reconnect::{ReconnectConfig, ReconnectTimer};
use super::timing::sleep_until_opt;
use crate::application::ports::{
    ChannelEvent, Clock, CloseReason, StreamChannel, StreamTransport, SystemClock, TransportError,
};
use crate::domain::sensor::{KEEPALIVE_PING, SensorReading, StreamFrame};
use crate::infrastructure::config::StreamSettings;
use crate::infrastructure::metrics::{self, FrameKind};

// =============================================================================
// Configuration and Snapshot Types
// =============================================================================

/// Supervisor timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Watchdog, health check and heartbeat timing.
    pub liveness: LivenessConfig,
    /// Reconnect delay.
    pub reconnect: ReconnectConfig,
    /// Display throttle interval.
    pub display_throttle: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            liveness: LivenessConfig::default(),
            reconnect: ReconnectConfig::default(),
            display_throttle: DEFAULT_THROTTLE,
        }
    }
}

impl SupervisorConfig {
    /// Create configuration from `StreamSettings`.
    #[must_use]
    pub const fn from_stream_settings(settings: &StreamSettings) -> Self {
        Self {
            liveness: LivenessConfig::from_stream_settings(settings),
            reconnect: ReconnectConfig::from_stream_settings(settings),
            display_throttle: settings.display_throttle,
        }
    }
}

/// Identifies one connect attempt and the session it may become.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Externally visible session phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    /// No session and no attempt in progress.
    #[default]
    Idle,
    /// Waiting for the channel to open.
    Connecting,
    /// Channel open and believed live.
    Open,
    /// Channel being released.
    Closing,
}

impl ConnectionPhase {
    /// Label used in logs and the health endpoint.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
        }
    }
}

/// What the view layer renders.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamSnapshot {
    /// Current phase.
    pub phase: ConnectionPhase,
    /// True exactly while a session is open.
    pub connected: bool,
    /// Current session or connect attempt.
    pub session: Option<SessionId>,
    /// Throttled reading to show.
    pub display: Option<SensorReading>,
    /// Wall-clock arrival of the last data frame.
    pub last_message_at: Option<DateTime<Utc>>,
    /// Sessions opened since start.
    pub sessions_opened: u64,
}

/// App visibility as reported by the view layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// App is visible.
    Foreground,
    /// App is hidden or the device is asleep.
    Background,
}

/// Errors returned by [`SupervisorHandle`].
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The supervisor task has exited.
    #[error("stream supervisor has stopped")]
    Stopped,
}

#[derive(Debug)]
enum SupervisorCommand {
    Visibility(Visibility),
}

/// Cloneable handle used by the view layer.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    commands: mpsc::Sender<SupervisorCommand>,
    snapshot: watch::Receiver<StreamSnapshot>,
}

impl SupervisorHandle {
    /// Report an app visibility transition.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Stopped`] if the supervisor has exited.
    pub async fn set_visibility(&self, visibility: Visibility) -> Result<(), SupervisorError> {
        self.commands
            .send(SupervisorCommand::Visibility(visibility))
            .await
            .map_err(|_| SupervisorError::Stopped)
    }

    /// Report that the app returned to the foreground.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Stopped`] if the supervisor has exited.
    pub async fn foreground(&self) -> Result<(), SupervisorError> {
        self.set_visibility(Visibility::Foreground).await
    }

    /// Report that the app moved to the background.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Stopped`] if the supervisor has exited.
    pub async fn background(&self) -> Result<(), SupervisorError> {
        self.set_visibility(Visibility::Background).await
    }

    /// Latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> StreamSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StreamSnapshot> {
        self.snapshot.clone()
    }
}

// =============================================================================
// Session State
// =============================================================================

type ConnectAttempt = BoxFuture<'static, Result<Box<dyn StreamChannel>, TransportError>>;

enum SessionState {
    Idle,
    Connecting {
        id: SessionId,
        attempt: ConnectAttempt,
    },
    Open(OpenSession),
    Closing {
        id: SessionId,
    },
}

/// An open session and the timers that belong to it.
struct OpenSession {
    id: SessionId,
    channel: Box<dyn StreamChannel>,
    watchdog: Watchdog,
    health: HealthCheck,
    heartbeat: Interval,
    health_ticker: Interval,
    opened_at: Instant,
}

impl OpenSession {
    fn new(
        id: SessionId,
        channel: Box<dyn StreamChannel>,
        config: &LivenessConfig,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            channel,
            watchdog: Watchdog::armed(config.silence_budget, now),
            health: HealthCheck::started(config.silence_budget, wall),
            heartbeat: ticker(config.heartbeat_interval, now),
            health_ticker: ticker(config.health_check_interval, now),
            opened_at: now,
        }
    }

    async fn next_event(&mut self) -> SupervisorEvent {
        let session = self.id;
        tokio::select! {
            biased;
            event = self.channel.recv() => SupervisorEvent::Inbound { session, event },
            () = tokio::time::sleep_until(self.watchdog.deadline()) => {
                SupervisorEvent::WatchdogFired { session }
            }
            _ = self.heartbeat.tick() => SupervisorEvent::HeartbeatDue { session },
            _ = self.health_ticker.tick() => SupervisorEvent::HealthCheckDue { session },
        }
    }
}

fn ticker(period: Duration, now: Instant) -> Interval {
    let mut interval = tokio::time::interval_at(now + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

enum SupervisorEvent {
    Shutdown,
    Command(Option<SupervisorCommand>),
    ReconnectDue,
    PromoteDue,
    Connected {
        session: SessionId,
        result: Result<Box<dyn StreamChannel>, TransportError>,
    },
    Inbound {
        session: SessionId,
        event: ChannelEvent,
    },
    WatchdogFired {
        session: SessionId,
    },
    HeartbeatDue {
        session: SessionId,
    },
    HealthCheckDue {
        session: SessionId,
    },
}

async fn session_event(state: &mut SessionState) -> SupervisorEvent {
    match state {
        SessionState::Connecting { id, attempt } => {
            let session = *id;
            let result = attempt.await;
            SupervisorEvent::Connected { session, result }
        }
        SessionState::Open(open) => open.next_event().await,
        SessionState::Idle | SessionState::Closing { .. } => std::future::pending().await,
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// Keeps one sensor channel open and live.
pub struct StreamSupervisor {
    transport: Arc<dyn StreamTransport>,
    clock: Arc<dyn Clock>,
    config: SupervisorConfig,
    state: SessionState,
    reconnect: ReconnectTimer,
    display: DisplayBuffer<SensorReading>,
    next_session: u64,
    sessions_opened: u64,
    visibility: Visibility,
    last_message_at: Option<DateTime<Utc>>,
    commands: mpsc::Receiver<SupervisorCommand>,
    commands_open: bool,
    snapshot: watch::Sender<StreamSnapshot>,
    cancel: CancellationToken,
}

impl StreamSupervisor {
    /// Create a supervisor and its handle. Nothing connects until [`run`].
    ///
    /// [`run`]: Self::run
    #[must_use]
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        config: SupervisorConfig,
        cancel: CancellationToken,
    ) -> (Self, SupervisorHandle) {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (snapshot_tx, snapshot_rx) = watch::channel(StreamSnapshot::default());

        let supervisor = Self {
            transport,
            clock: Arc::new(SystemClock),
            config,
            state: SessionState::Idle,
            reconnect: ReconnectTimer::new(config.reconnect),
            display: DisplayBuffer::new(config.display_throttle),
            next_session: 0,
            sessions_opened: 0,
            visibility: Visibility::Foreground,
            last_message_at: None,
            commands: command_rx,
            commands_open: true,
            snapshot: snapshot_tx,
            cancel,
        };
        let handle = SupervisorHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
        };
        (supervisor, handle)
    }

    /// Replace the wall clock used by the health check.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run until the cancellation token fires.
    pub async fn run(mut self) {
        info!(
            silence_budget_secs = self.config.liveness.silence_budget.as_secs(),
            reconnect_delay_secs = self.config.reconnect.delay.as_secs(),
            "Stream supervisor starting"
        );
        self.begin_connect();

        loop {
            let event = self.next_event().await;
            if !self.handle(event).await {
                break;
            }
        }

        info!(
            sessions_opened = self.sessions_opened,
            "Stream supervisor stopped"
        );
    }

    async fn next_event(&mut self) -> SupervisorEvent {
        let promote_at = self.display.promote_deadline();
        let reconnect_at = self.reconnect.pending();
        let commands_open = self.commands_open;

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => SupervisorEvent::Shutdown,
            command = self.commands.recv(), if commands_open => SupervisorEvent::Command(command),
            event = session_event(&mut self.state) => event,
            () = sleep_until_opt(promote_at) => SupervisorEvent::PromoteDue,
            () = sleep_until_opt(reconnect_at) => SupervisorEvent::ReconnectDue,
        }
    }

    /// Returns `false` once the supervisor should stop.
    async fn handle(&mut self, event: SupervisorEvent) -> bool {
        let now = Instant::now();
        match event {
            SupervisorEvent::Shutdown => {
                self.reconnect.cancel();
                self.close_session(CloseReason::Shutdown).await;
                return false;
            }
            SupervisorEvent::Command(Some(SupervisorCommand::Visibility(visibility))) => {
                self.on_visibility(visibility, now);
            }
            SupervisorEvent::Command(None) => {
                debug!("All supervisor handles dropped");
                self.commands_open = false;
            }
            SupervisorEvent::ReconnectDue => {
                if self.reconnect.take_due(now) && matches!(self.state, SessionState::Idle) {
                    metrics::record_reconnect();
                    self.begin_connect();
                }
            }
            SupervisorEvent::PromoteDue => {
                if self.display.promote(now) {
                    self.publish();
                }
            }
            SupervisorEvent::Connected { session, result } => {
                self.on_connected(session, result, now);
            }
            SupervisorEvent::Inbound { session, event } => {
                if self.open_session(session).is_some() {
                    self.on_inbound(event, now).await;
                }
            }
            SupervisorEvent::WatchdogFired { session } => {
                if self
                    .open_session(session)
                    .is_some_and(|open| open.watchdog.is_expired(now))
                {
                    warn!(session = %session, "No frames within silence budget, forcing close");
                    self.close_and_reconnect(CloseReason::WatchdogTimeout).await;
                }
            }
            SupervisorEvent::HeartbeatDue { session } => {
                self.send_heartbeat(session).await;
            }
            SupervisorEvent::HealthCheckDue { session } => {
                let wall = self.clock.now();
                let silence = self
                    .open_session(session)
                    .filter(|open| open.health.is_stale(wall))
                    .map(|open| open.health.silence(wall));
                if let Some(silence) = silence {
                    warn!(
                        session = %session,
                        silence_secs = silence.as_secs(),
                        "No data within silence budget, forcing close"
                    );
                    self.close_and_reconnect(CloseReason::HealthCheckStale).await;
                }
            }
        }
        true
    }

    fn open_session(&self, session: SessionId) -> Option<&OpenSession> {
        match &self.state {
            SessionState::Open(open) if open.id == session => Some(open),
            _ => None,
        }
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    fn begin_connect(&mut self) {
        self.next_session += 1;
        let id = SessionId(self.next_session);
        let transport = Arc::clone(&self.transport);

        debug!(session = %id, "Opening stream session");
        self.state = SessionState::Connecting {
            id,
            attempt: Box::pin(async move { transport.connect().await }),
        };
        self.publish();
    }

    fn on_connected(
        &mut self,
        session: SessionId,
        result: Result<Box<dyn StreamChannel>, TransportError>,
        now: Instant,
    ) {
        if !matches!(&self.state, SessionState::Connecting { id, .. } if *id == session) {
            return;
        }

        match result {
            Ok(channel) => {
                self.reconnect.reset();
                self.state = SessionState::Open(OpenSession::new(
                    session,
                    channel,
                    &self.config.liveness,
                    now,
                    self.clock.now(),
                ));
                self.sessions_opened += 1;
                metrics::set_stream_connected(true);
                info!(session = %session, "Stream session open");
                self.publish();
            }
            Err(error) => {
                warn!(session = %session, error = %error, "Stream connect failed");
                metrics::record_stream_error("connect");
                self.state = SessionState::Idle;
                self.publish();
                self.schedule_reconnect(now);
            }
        }
    }

    fn on_visibility(&mut self, visibility: Visibility, now: Instant) {
        self.visibility = visibility;
        if visibility == Visibility::Background {
            debug!("App moved to background");
            return;
        }

        match self.state {
            SessionState::Open(ref mut open) => {
                open.watchdog.reset(now);
                debug!(session = %open.id, "Foreground with open session, watchdog reset");
            }
            SessionState::Idle => {
                info!("Foreground with no open session, connecting now");
                self.reconnect.cancel();
                self.begin_connect();
            }
            SessionState::Connecting { .. } | SessionState::Closing { .. } => {}
        }
    }

    async fn on_inbound(&mut self, event: ChannelEvent, now: Instant) {
        match event {
            ChannelEvent::Text(text) => self.on_text(&text, now),
            ChannelEvent::Closed => {
                info!("Stream peer closed session");
                self.close_and_reconnect(CloseReason::PeerClosed).await;
            }
            ChannelEvent::Error(error) => {
                warn!(error = %error, "Stream transport error");
                metrics::record_stream_error("transport");
                self.close_and_reconnect(CloseReason::TransportError).await;
            }
        }
    }

    fn on_text(&mut self, text: &str, now: Instant) {
        let wall = self.clock.now();
        let SessionState::Open(open) = &mut self.state else {
            return;
        };

        match StreamFrame::parse(text) {
            Ok(StreamFrame::Keepalive) => {
                open.watchdog.reset(now);
                metrics::record_frame(FrameKind::Keepalive);
                trace!(session = %open.id, "Keepalive received");
            }
            Ok(StreamFrame::Reading(reading)) => {
                open.watchdog.reset(now);
                open.health.record_data(wall);
                metrics::record_frame(FrameKind::Reading);
                trace!(session = %open.id, mac = %reading.mac, "Sensor reading received");

                self.last_message_at = Some(wall);
                self.display.accept(reading, now);
                self.publish();
            }
            Err(error) => {
                metrics::record_frame(FrameKind::Malformed);
                warn!(session = %open.id, error = %error, "Discarding malformed stream frame");
            }
        }
    }

    async fn send_heartbeat(&mut self, session: SessionId) {
        let SessionState::Open(open) = &mut self.state else {
            return;
        };
        if open.id != session {
            return;
        }

        if let Err(error) = open.channel.send_text(KEEPALIVE_PING).await {
            warn!(session = %session, error = %error, "Heartbeat send failed");
            metrics::record_stream_error("heartbeat");
            self.close_and_reconnect(CloseReason::TransportError).await;
        }
    }

    async fn close_and_reconnect(&mut self, reason: CloseReason) {
        self.close_session(reason).await;
        self.schedule_reconnect(Instant::now());
    }

    /// Release the current session. Its timers are dropped before the
    /// channel close is awaited.
    async fn close_session(&mut self, reason: CloseReason) {
        match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Open(open) => {
                let OpenSession {
                    id,
                    mut channel,
                    opened_at,
                    ..
                } = open;

                self.state = SessionState::Closing { id };
                self.publish();
                metrics::record_session_closed(reason);

                if let Err(error) = channel.close(reason).await {
                    debug!(session = %id, error = %error, "Channel close failed");
                }
                drop(channel);

                info!(
                    session = %id,
                    reason = %reason,
                    code = reason.code(),
                    open_secs = opened_at.elapsed().as_secs(),
                    "Stream session closed"
                );
            }
            SessionState::Connecting { id, .. } => {
                debug!(session = %id, "Connect attempt abandoned");
            }
            SessionState::Idle | SessionState::Closing { .. } => {}
        }

        self.state = SessionState::Idle;
        metrics::set_stream_connected(false);
        self.publish();
    }

    fn schedule_reconnect(&mut self, now: Instant) {
        if self.reconnect.schedule(now) {
            info!(
                delay_ms = u64::try_from(self.config.reconnect.delay.as_millis()).unwrap_or(u64::MAX),
                attempt = self.reconnect.attempt_count() + 1,
                "Reconnect scheduled"
            );
        } else {
            debug!("Reconnect already pending");
        }
    }

    fn publish(&self) {
        let (phase, session) = match &self.state {
            SessionState::Idle => (ConnectionPhase::Idle, None),
            SessionState::Connecting { id, .. } => (ConnectionPhase::Connecting, Some(*id)),
            SessionState::Open(open) => (ConnectionPhase::Open, Some(open.id)),
            SessionState::Closing { id } => (ConnectionPhase::Closing, Some(*id)),
        };

        self.snapshot.send_replace(StreamSnapshot {
            phase,
            connected: phase == ConnectionPhase::Open,
            session,
            display: self.display.display().cloned(),
            last_message_at: self.last_message_at,
            sessions_opened: self.sessions_opened,
        });
    }
}

impl fmt::Debug for StreamSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSupervisor")
            .field("config", &self.config)
            .field("next_session", &self.next_session)
            .field("visibility", &self.visibility)
            .finish_non_exhaustive()
    }
}
