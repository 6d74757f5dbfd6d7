//! Adaptive Poll Scheduler
//!
//! Keeps watchlist quotes and history as fresh as the upstream quota allows.
//! The scheduler is one task owning all of its state; fetches run in spawned
//! tasks and report back by message, so a slow upstream never blocks the
//! ticker or user commands.
//!
//! # Lifecycle
//!
//! 1. Startup: fetch the watchlist, then quotes (the cold-start loading
//!    indicator covers this), then arm the first history fetch after a delay
//!    chosen by [`startup_history_delay`]. Started inside the post-open dead
//!    zone, the quote batch waits for the zone to end; a first history fetch
//!    that would land inside it is re-armed past its end.
//! 2. Ticker: minute-aligned with jitter. Each tick asks [`decide`] which
//!    background batch (if any) to run.
//! 3. Drill-in: selecting a symbol runs a forced quote and a forced
//!    high-resolution history fetch concurrently. Forced fetches never stamp
//!    the background clocks and are ignored until the first background
//!    history batch has landed.
//!
//! Failed or quota-refused fetches are logged and leave their clock alone, so
//! the next eligible tick retries them.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::timing::{first_tick_delay, sleep_until_opt};
use crate::application::ports::{Clock, QuoteSource, UpstreamError, WatchlistSource};
use crate::domain::market::{
    QuoteBook, StockQuote, Symbol, SymbolHistory, WatchlistSnapshot,
};
use crate::domain::polling::{
    PollDecision, PollPolicy, ResourceClass, SchedulerClock, decide, startup_history_delay,
};
use crate::domain::quota::{FetchPriority, QuotaGuard};
use crate::infrastructure::metrics::{self, FetchKind, FetchResult};

// =============================================================================
// Snapshot and Handle
// =============================================================================

/// What the view layer renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketSnapshot {
    /// Tracked symbols in watchlist order.
    pub watchlist: Vec<Symbol>,
    /// Merged quotes and history.
    pub book: QuoteBook,
    /// True only during the cold-start quote fetch.
    pub loading: bool,
    /// Whether the first background history batch has landed.
    pub history_ready: bool,
    /// Symbol currently drilled into.
    pub selected: Option<Symbol>,
    /// Issue instant of the last successful background quote batch.
    pub last_quotes_at: Option<DateTime<Utc>>,
    /// Issue instant of the last successful background history batch.
    pub last_history_at: Option<DateTime<Utc>>,
}

impl Default for MarketSnapshot {
    fn default() -> Self {
        Self {
            watchlist: Vec::new(),
            book: QuoteBook::default(),
            loading: true,
            history_ready: false,
            selected: None,
            last_quotes_at: None,
            last_history_at: None,
        }
    }
}

/// Errors returned by [`SchedulerHandle`].
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The scheduler task has exited.
    #[error("poll scheduler has stopped")]
    Stopped,
}

#[derive(Debug)]
enum SchedulerCommand {
    Select(Option<Symbol>),
    WatchlistChanged(Vec<Symbol>),
    ReloadWatchlist,
}

/// Cloneable handle used by the view layer.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<SchedulerCommand>,
    snapshot: watch::Receiver<MarketSnapshot>,
}

impl SchedulerHandle {
    async fn send(&self, command: SchedulerCommand) -> Result<(), SchedulerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SchedulerError::Stopped)
    }

    /// Drill into `symbol`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Stopped`] if the scheduler has exited.
    pub async fn select(&self, symbol: impl Into<Symbol>) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::Select(Some(symbol.into()))).await
    }

    /// Leave the drill-in view.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Stopped`] if the scheduler has exited.
    pub async fn clear_selection(&self) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::Select(None)).await
    }

    /// Replace the tracked symbols.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Stopped`] if the scheduler has exited.
    pub async fn watchlist_changed(&self, symbols: Vec<Symbol>) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::WatchlistChanged(symbols)).await
    }

    /// Re-read the watchlist from its source.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Stopped`] if the scheduler has exited.
    pub async fn reload_watchlist(&self) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::ReloadWatchlist).await
    }

    /// Latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> MarketSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<MarketSnapshot> {
        self.snapshot.clone()
    }
}

// =============================================================================
// Internal Events
// =============================================================================

enum FetchOutcome {
    Quotes {
        issued_at: DateTime<Utc>,
        epoch: u64,
        result: Result<Vec<StockQuote>, UpstreamError>,
    },
    History {
        issued_at: DateTime<Utc>,
        epoch: u64,
        result: Result<Vec<SymbolHistory>, UpstreamError>,
    },
    Forced {
        generation: u64,
        symbol: Symbol,
        quote: Result<Vec<StockQuote>, UpstreamError>,
        history: Result<Vec<SymbolHistory>, UpstreamError>,
    },
    Watchlist(Result<Vec<Symbol>, UpstreamError>),
}

enum SchedulerEvent {
    Shutdown,
    Command(Option<SchedulerCommand>),
    Tick,
    StartupQuotesDue,
    StartupHistoryDue,
    Fetched(FetchOutcome),
}

/// Collaborators the scheduler calls out to.
#[derive(Clone)]
pub struct SchedulerPorts {
    /// Quote and history upstream.
    pub quotes: Arc<dyn QuoteSource>,
    /// Tracked symbol list.
    pub watchlist: Arc<dyn WatchlistSource>,
    /// Wall clock used for market-calendar decisions.
    pub clock: Arc<dyn Clock>,
}

impl fmt::Debug for SchedulerPorts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerPorts").finish_non_exhaustive()
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Drives background and forced market data fetches.
pub struct PollScheduler {
    ports: SchedulerPorts,
    policy: PollPolicy,
    quota: QuotaGuard,
    watchlist: WatchlistSnapshot,
    watchlist_epoch: u64,
    clocks: SchedulerClock,
    book: QuoteBook,
    in_flight: HashSet<ResourceClass>,
    loading: bool,
    history_ready: bool,
    startup_quotes_at: Option<Instant>,
    startup_history_at: Option<Instant>,
    ticker: Option<Interval>,
    selected: Option<Symbol>,
    generation: u64,
    outcomes_tx: mpsc::UnboundedSender<FetchOutcome>,
    outcomes_rx: mpsc::UnboundedReceiver<FetchOutcome>,
    commands: mpsc::Receiver<SchedulerCommand>,
    commands_open: bool,
    snapshot: watch::Sender<MarketSnapshot>,
    cancel: CancellationToken,
}

impl PollScheduler {
    /// Create a scheduler and its handle. Nothing is fetched until [`run`].
    ///
    /// [`run`]: Self::run
    #[must_use]
    pub fn new(
        ports: SchedulerPorts,
        policy: PollPolicy,
        quota: QuotaGuard,
        cancel: CancellationToken,
    ) -> (Self, SchedulerHandle) {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (snapshot_tx, snapshot_rx) = watch::channel(MarketSnapshot::default());
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();

        let scheduler = Self {
            ports,
            policy,
            quota,
            watchlist: WatchlistSnapshot::default(),
            watchlist_epoch: 0,
            clocks: SchedulerClock::default(),
            book: QuoteBook::default(),
            in_flight: HashSet::new(),
            loading: true,
            history_ready: false,
            startup_quotes_at: None,
            startup_history_at: None,
            ticker: None,
            selected: None,
            generation: 0,
            outcomes_tx,
            outcomes_rx,
            commands: command_rx,
            commands_open: true,
            snapshot: snapshot_tx,
            cancel,
        };
        let handle = SchedulerHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
        };
        (scheduler, handle)
    }

    /// Run the startup sequence, then the ticker, until cancelled.
    pub async fn run(mut self) {
        info!(
            tick_secs = self.policy.tick_interval.as_secs(),
            quote_interval_secs = self.policy.quote_interval.num_seconds(),
            history_interval_secs = self.policy.history_interval.num_seconds(),
            "Poll scheduler starting"
        );

        let cancel = self.cancel.clone();
        tokio::select! {
            () = cancel.cancelled() => {
                info!("Poll scheduler stopped during startup");
                return;
            }
            () = self.startup() => {}
        }

        let first_tick = first_tick_delay(self.ports.clock.now(), self.policy.max_tick_jitter);
        let mut ticker =
            tokio::time::interval_at(Instant::now() + first_tick, self.policy.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.ticker = Some(ticker);
        debug!(first_tick_secs = first_tick.as_secs(), "Ticker armed");

        loop {
            let event = self.next_event().await;
            if !self.handle(event) {
                break;
            }
        }

        info!("Poll scheduler stopped");
    }

    async fn startup(&mut self) {
        self.publish();

        let result = self.ports.watchlist.fetch_watchlist().await;
        self.on_fetched(FetchOutcome::Watchlist(result));

        if self.watchlist.is_empty() {
            self.finish_loading();
            return;
        }

        let now = self.ports.clock.now();
        if let Some(at) = self.past_dead_zone(now, Duration::ZERO) {
            info!(
                symbols = self.watchlist.len(),
                "Started inside the post-open dead zone, quotes wait for its end"
            );
            self.startup_quotes_at = Some(at);
            return;
        }

        if self.acquire(ResourceClass::Quotes, now) {
            let result = self
                .ports
                .quotes
                .fetch_quotes(self.watchlist.symbols())
                .await;
            self.on_fetched(FetchOutcome::Quotes {
                issued_at: now,
                epoch: self.watchlist_epoch,
                result,
            });
        } else {
            self.finish_loading();
        }
    }

    /// End the cold start once the first quote batch has landed or cannot
    /// run, and arm the first history fetch.
    fn finish_loading(&mut self) {
        if !self.loading {
            return;
        }
        self.loading = false;
        self.publish();

        let now = self.ports.clock.now();
        let delay = startup_history_delay(now, self.watchlist.len(), &self.policy);
        self.startup_history_at = Some(Instant::now() + delay);
        info!(
            symbols = self.watchlist.len(),
            delay_secs = delay.as_secs(),
            "Startup quotes done, first history fetch scheduled"
        );
    }

    /// Instant `margin` past today's dead zone, if `now` falls inside it.
    fn past_dead_zone(&self, now: DateTime<Utc>, margin: Duration) -> Option<Instant> {
        let end = self.policy.calendar.dead_zone_end(now)?;
        let wait = (end - now).to_std().unwrap_or_default();
        Some(Instant::now() + wait + margin)
    }

    async fn next_event(&mut self) -> SchedulerEvent {
        let startup_quotes_at = self.startup_quotes_at;
        let startup_history_at = self.startup_history_at;
        let commands_open = self.commands_open;

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => SchedulerEvent::Shutdown,
            Some(outcome) = self.outcomes_rx.recv() => SchedulerEvent::Fetched(outcome),
            command = self.commands.recv(), if commands_open => SchedulerEvent::Command(command),
            () = sleep_until_opt(startup_quotes_at) => SchedulerEvent::StartupQuotesDue,
            () = sleep_until_opt(startup_history_at) => SchedulerEvent::StartupHistoryDue,
            () = tick(self.ticker.as_mut()) => SchedulerEvent::Tick,
        }
    }

    /// Returns `false` once the scheduler should stop.
    fn handle(&mut self, event: SchedulerEvent) -> bool {
        match event {
            SchedulerEvent::Shutdown => return false,
            SchedulerEvent::Command(Some(command)) => self.on_command(command),
            SchedulerEvent::Command(None) => {
                debug!("All scheduler handles dropped");
                self.commands_open = false;
            }
            SchedulerEvent::Tick => self.on_tick(),
            SchedulerEvent::StartupQuotesDue => self.on_startup_quotes(),
            SchedulerEvent::StartupHistoryDue => self.on_startup_history(),
            SchedulerEvent::Fetched(outcome) => self.on_fetched(outcome),
        }
        true
    }

    fn on_command(&mut self, command: SchedulerCommand) {
        match command {
            SchedulerCommand::Select(symbol) => self.on_select(symbol),
            SchedulerCommand::WatchlistChanged(symbols) => {
                self.apply_watchlist(WatchlistSnapshot::new(symbols));
            }
            SchedulerCommand::ReloadWatchlist => {
                let source = Arc::clone(&self.ports.watchlist);
                let tx = self.outcomes_tx.clone();
                tokio::spawn(async move {
                    let result = source.fetch_watchlist().await;
                    if tx.send(FetchOutcome::Watchlist(result)).is_err() {
                        debug!("Scheduler gone before watchlist reload finished");
                    }
                });
            }
        }
    }

    // -------------------------------------------------------------------------
    // Background fetches
    // -------------------------------------------------------------------------

    fn on_tick(&mut self) {
        let now = self.ports.clock.now();
        if self.watchlist.is_empty() {
            debug!("Tick skipped, watchlist empty");
            return;
        }

        match decide(now, &self.clocks, &self.policy) {
            PollDecision::Skip(reason) => {
                debug!(reason = reason.as_str(), "Tick skipped");
                metrics::record_tick_skipped(reason);
            }
            PollDecision::FetchQuotes { catch_up } => {
                if catch_up {
                    info!("Market closed with a missed close, fetching catch-up quotes");
                }
                self.spawn_background(ResourceClass::Quotes, now);
            }
            PollDecision::FetchHistory => {
                self.spawn_background(ResourceClass::History, now);
            }
        }
    }

    /// Deferred cold-start quote batch at the end of the dead zone.
    fn on_startup_quotes(&mut self) {
        self.startup_quotes_at = None;
        if !self.loading || self.in_flight.contains(&ResourceClass::Quotes) {
            return;
        }

        let now = self.ports.clock.now();
        if !self.spawn_background(ResourceClass::Quotes, now) {
            self.finish_loading();
        }
    }

    fn on_startup_history(&mut self) {
        self.startup_history_at = None;
        let now = self.ports.clock.now();

        if self.watchlist.is_empty()
            || self.clocks.last_fetch(ResourceClass::History).is_some()
            || self.in_flight.contains(&ResourceClass::History)
        {
            return;
        }
        if let Some(at) = self.past_dead_zone(now, self.policy.dead_zone_margin) {
            debug!("Startup history landed in the dead zone, re-armed past its end");
            self.startup_history_at = Some(at);
            return;
        }
        if self.in_flight.contains(&ResourceClass::Quotes)
            || matches!(
                decide(now, &self.clocks, &self.policy),
                PollDecision::FetchQuotes { .. }
            )
        {
            debug!("Quotes are due first, startup history deferred");
            self.startup_history_at =
                Some(Instant::now() + self.policy.startup_history_spread_delay);
            return;
        }
        self.spawn_background(ResourceClass::History, now);
    }

    /// Charge the quota for a full batch of `class`.
    fn acquire(&mut self, class: ResourceClass, now: DateTime<Utc>) -> bool {
        let credits = u32::try_from(self.watchlist.len()).unwrap_or(u32::MAX);
        match self
            .quota
            .try_acquire(credits, now, FetchPriority::Background)
        {
            Ok(()) => true,
            Err(denied) => {
                warn!(class = class.as_str(), error = %denied, "Background fetch refused by quota");
                metrics::record_fetch(FetchKind::from(class), FetchResult::Denied);
                self.retry_startup_history(class);
                false
            }
        }
    }

    /// Issue a full batch of `class`; returns whether it was issued.
    fn spawn_background(&mut self, class: ResourceClass, now: DateTime<Utc>) -> bool {
        if self.in_flight.contains(&class) {
            debug!(class = class.as_str(), "Previous fetch still in flight");
            return false;
        }
        if !self.acquire(class, now) {
            return false;
        }
        self.in_flight.insert(class);

        let source = Arc::clone(&self.ports.quotes);
        let symbols = self.watchlist.symbols().to_vec();
        let epoch = self.watchlist_epoch;
        let interval = self.policy.background_interval;
        let bars = interval.bars_per_session(self.policy.calendar.session_minutes());
        let tx = self.outcomes_tx.clone();

        debug!(class = class.as_str(), symbols = symbols.len(), "Background fetch issued");
        tokio::spawn(async move {
            let outcome = match class {
                ResourceClass::Quotes => FetchOutcome::Quotes {
                    issued_at: now,
                    epoch,
                    result: source.fetch_quotes(&symbols).await,
                },
                ResourceClass::History => FetchOutcome::History {
                    issued_at: now,
                    epoch,
                    result: source.fetch_history(&symbols, interval, bars).await,
                },
            };
            if tx.send(outcome).is_err() {
                debug!("Scheduler gone before background fetch finished");
            }
        });
        true
    }

    /// Keep retrying the startup history until the selection gate opens.
    fn retry_startup_history(&mut self, class: ResourceClass) {
        if class == ResourceClass::History
            && !self.history_ready
            && self.startup_history_at.is_none()
        {
            self.startup_history_at =
                Some(Instant::now() + self.policy.startup_history_spread_delay);
        }
    }

    fn on_fetched(&mut self, outcome: FetchOutcome) {
        match outcome {
            FetchOutcome::Quotes {
                issued_at,
                epoch,
                result,
            } => {
                self.in_flight.remove(&ResourceClass::Quotes);
                match result {
                    Ok(quotes) => {
                        info!(count = quotes.len(), "Quotes refreshed");
                        metrics::record_fetch(FetchKind::Quotes, FetchResult::Success);
                        self.book.merge_quotes(quotes);
                        self.finish_background(ResourceClass::Quotes, issued_at, epoch);
                    }
                    Err(error) => self.background_failed(ResourceClass::Quotes, &error),
                }
                self.finish_loading();
            }
            FetchOutcome::History {
                issued_at,
                epoch,
                result,
            } => {
                self.in_flight.remove(&ResourceClass::History);
                match result {
                    Ok(series) => {
                        info!(count = series.len(), "History refreshed");
                        metrics::record_fetch(FetchKind::History, FetchResult::Success);
                        self.book.merge_history(series);
                        if !self.history_ready {
                            info!("Initial history loaded, drill-in enabled");
                            self.history_ready = true;
                        }
                        self.finish_background(ResourceClass::History, issued_at, epoch);
                    }
                    Err(error) => self.background_failed(ResourceClass::History, &error),
                }
            }
            FetchOutcome::Forced {
                generation,
                symbol,
                quote,
                history,
            } => self.on_forced(generation, &symbol, quote, history),
            FetchOutcome::Watchlist(Ok(symbols)) => {
                self.apply_watchlist(WatchlistSnapshot::new(symbols));
            }
            FetchOutcome::Watchlist(Err(error)) => {
                warn!(error = %error, "Watchlist fetch failed, keeping current symbols");
            }
        }
    }

    fn finish_background(&mut self, class: ResourceClass, issued_at: DateTime<Utc>, epoch: u64) {
        self.book.retain_watchlist(&self.watchlist);
        if epoch == self.watchlist_epoch {
            self.clocks.stamp(class, issued_at);
        } else {
            debug!(
                class = class.as_str(),
                "Watchlist changed while fetching, clock left unstamped"
            );
        }
        self.publish();
    }

    fn background_failed(&mut self, class: ResourceClass, error: &UpstreamError) {
        warn!(class = class.as_str(), error = %error, "Background fetch failed");
        let result = if matches!(error, UpstreamError::Quota(_)) {
            FetchResult::Denied
        } else {
            FetchResult::Failure
        };
        metrics::record_fetch(FetchKind::from(class), result);
        self.retry_startup_history(class);
    }

    // -------------------------------------------------------------------------
    // Forced drill-in
    // -------------------------------------------------------------------------

    fn on_select(&mut self, symbol: Option<Symbol>) {
        let Some(symbol) = symbol.map(|s| s.trim().to_uppercase()) else {
            self.generation += 1;
            self.selected = None;
            self.publish();
            return;
        };

        if !self.history_ready {
            info!(symbol = %symbol, "Selection ignored until initial history has loaded");
            return;
        }
        if !self.watchlist.contains(&symbol) {
            warn!(symbol = %symbol, "Selection ignored, symbol not on watchlist");
            return;
        }

        self.generation += 1;
        self.selected = Some(symbol.clone());
        self.publish();

        let now = self.ports.clock.now();
        if let Err(denied) = self.quota.try_acquire(2, now, FetchPriority::Forced) {
            warn!(symbol = %symbol, error = %denied, "Forced fetch refused by quota");
            metrics::record_fetch(FetchKind::ForcedQuote, FetchResult::Denied);
            metrics::record_fetch(FetchKind::ForcedHistory, FetchResult::Denied);
            return;
        }

        let source = Arc::clone(&self.ports.quotes);
        let generation = self.generation;
        let interval = self.policy.forced_interval;
        let bars = interval.bars_per_session(self.policy.calendar.session_minutes());
        let tx = self.outcomes_tx.clone();

        debug!(symbol = %symbol, generation, "Forced fetch issued");
        tokio::spawn(async move {
            let symbols = [symbol.clone()];
            let (quote, history) = tokio::join!(
                source.fetch_quotes(&symbols),
                source.fetch_history(&symbols, interval, bars),
            );
            let outcome = FetchOutcome::Forced {
                generation,
                symbol,
                quote,
                history,
            };
            if tx.send(outcome).is_err() {
                debug!("Scheduler gone before forced fetch finished");
            }
        });
    }

    fn on_forced(
        &mut self,
        generation: u64,
        symbol: &str,
        quote: Result<Vec<StockQuote>, UpstreamError>,
        history: Result<Vec<SymbolHistory>, UpstreamError>,
    ) {
        if generation != self.generation {
            debug!(symbol, generation, "Discarding superseded forced result");
            return;
        }

        match quote {
            Ok(quotes) => {
                metrics::record_fetch(FetchKind::ForcedQuote, FetchResult::Success);
                self.book.merge_quotes(quotes);
            }
            Err(error) => {
                warn!(symbol, error = %error, "Forced quote fetch failed");
                metrics::record_fetch(FetchKind::ForcedQuote, FetchResult::Failure);
            }
        }
        match history {
            Ok(series) => {
                metrics::record_fetch(FetchKind::ForcedHistory, FetchResult::Success);
                self.book.merge_intraday(series);
            }
            Err(error) => {
                warn!(symbol, error = %error, "Forced history fetch failed");
                metrics::record_fetch(FetchKind::ForcedHistory, FetchResult::Failure);
            }
        }

        self.book.retain_watchlist(&self.watchlist);
        self.publish();
    }

    // -------------------------------------------------------------------------
    // Watchlist
    // -------------------------------------------------------------------------

    fn apply_watchlist(&mut self, next: WatchlistSnapshot) {
        let changes = next.changes_since(&self.watchlist);
        if changes.is_empty() {
            return;
        }

        self.watchlist = next;
        self.watchlist_epoch += 1;
        self.book.retain_watchlist(&self.watchlist);

        if self
            .selected
            .as_ref()
            .is_some_and(|symbol| !self.watchlist.contains(symbol))
        {
            self.generation += 1;
            self.selected = None;
        }
        if !changes.added.is_empty() {
            self.clocks.reset();
        }

        info!(
            symbols = self.watchlist.len(),
            added = changes.added.len(),
            removed = changes.removed.len(),
            "Watchlist updated"
        );
        metrics::set_watchlist_size(self.watchlist.len());
        self.publish();
    }

    fn publish(&self) {
        self.snapshot.send_replace(MarketSnapshot {
            watchlist: self.watchlist.symbols().to_vec(),
            book: self.book.clone(),
            loading: self.loading,
            history_ready: self.history_ready,
            selected: self.selected.clone(),
            last_quotes_at: self.clocks.last_fetch(ResourceClass::Quotes),
            last_history_at: self.clocks.last_fetch(ResourceClass::History),
        });
    }
}

async fn tick(ticker: Option<&mut Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl fmt::Debug for PollScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollScheduler")
            .field("policy", &self.policy)
            .field("watchlist", &self.watchlist)
            .field("clocks", &self.clocks)
            .field("history_ready", &self.history_ready)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockWatchlistSource;

    struct NoQuotes;

    #[async_trait::async_trait]
    impl QuoteSource for NoQuotes {
        async fn fetch_quotes(&self, _: &[Symbol]) -> Result<Vec<StockQuote>, UpstreamError> {
            Ok(Vec::new())
        }

        async fn fetch_history(
            &self,
            _: &[Symbol],
            _: crate::domain::market::HistoryInterval,
            _: u32,
        ) -> Result<Vec<SymbolHistory>, UpstreamError> {
            Ok(Vec::new())
        }
    }

    fn scheduler(watchlist: MockWatchlistSource) -> (PollScheduler, SchedulerHandle) {
        let ports = SchedulerPorts {
            quotes: Arc::new(NoQuotes),
            watchlist: Arc::new(watchlist),
            clock: Arc::new(crate::application::ports::SystemClock),
        };
        PollScheduler::new(
            ports,
            PollPolicy::default(),
            QuotaGuard::default(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn failed_watchlist_fetch_keeps_empty_list() {
        let mut source = MockWatchlistSource::new();
        source
            .expect_fetch_watchlist()
            .times(1)
            .returning(|| Err(UpstreamError::Network("refused".to_string())));
        let (mut scheduler, handle) = scheduler(source);

        scheduler.startup().await;

        let snapshot = handle.snapshot();
        assert!(snapshot.watchlist.is_empty());
        assert!(!snapshot.loading);
        assert!(scheduler.startup_history_at.is_some());
    }

    #[tokio::test]
    async fn adding_symbols_resets_clocks_and_removing_prunes() {
        let mut source = MockWatchlistSource::new();
        source
            .expect_fetch_watchlist()
            .returning(|| Ok(vec!["aapl".to_string(), "msft".to_string()]));
        let (mut scheduler, handle) = scheduler(source);
        scheduler.startup().await;

        let now = Utc::now();
        scheduler.clocks.stamp(ResourceClass::Quotes, now);
        scheduler.clocks.stamp(ResourceClass::History, now);

        scheduler.apply_watchlist(WatchlistSnapshot::new(["AAPL"]));
        assert_eq!(scheduler.clocks.last_fetch(ResourceClass::Quotes), Some(now));
        assert_eq!(handle.snapshot().watchlist, vec!["AAPL".to_string()]);

        scheduler.apply_watchlist(WatchlistSnapshot::new(["AAPL", "NVDA"]));
        assert_eq!(scheduler.clocks.last_fetch(ResourceClass::Quotes), None);
        assert_eq!(scheduler.clocks.last_fetch(ResourceClass::History), None);
    }

    #[tokio::test]
    async fn selection_before_history_is_a_no_op() {
        let mut source = MockWatchlistSource::new();
        source
            .expect_fetch_watchlist()
            .returning(|| Ok(vec!["AAPL".to_string()]));
        let (mut scheduler, handle) = scheduler(source);
        scheduler.startup().await;

        let generation = scheduler.generation;
        scheduler.on_select(Some("AAPL".to_string()));

        assert_eq!(scheduler.generation, generation);
        assert_eq!(handle.snapshot().selected, None);
    }
}
