//! Engine orchestrator.
//!
//! Drives the bootstrap state machine (universe discovery -> seed priority
//! instruments -> open stream -> background-fill remainder), then serialises
//! stream events, seed results, timers, and external commands onto one
//! processing loop so history mutation, metric recompute, and ranking never
//! race each other. Only immutable snapshots cross the boundary to the
//! display collaborator.

use crate::{
    batch::{InstrumentUpdate, UpdateBatch, UpdateBatcher},
    config::EngineConfig,
    error::{ApiError, EngineError},
    fetch::{ApiStatus, MarketApi, RateLimitGovernor, SnapshotFetcher},
    history::{AppendOutcome, HistoryStore},
    market::{Bar, BarUpdate, InstrumentInfo, Summary24h, Timeframe},
    metrics::{InstrumentMetrics, compute_metrics},
    rank::{RankMode, RankedEntry, rank},
    stream::{
        self, ConnectionState, StreamEvent, StreamManagerHandle, transport::StreamTransport,
    },
    subscription::StreamKey,
};
use chrono::Utc;
use fnv::{FnvHashMap, FnvHashSet};
use parking_lot::RwLock;
use serde::Serialize;
use smol_str::SmolStr;
use std::{cmp::Ordering, sync::Arc, time::Duration};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Bootstrap/run state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnginePhase {
    Idle,
    DiscoveringUniverse,
    SeedingPriority,
    Streaming,
    EnrichingBackground,
    Ready,
    /// Absorbing: unrecoverable failure (e.g. universe discovery failed).
    Error,
}

/// The two coarse signals the display layer sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Connectivity {
    pub stream_connected: bool,
    pub api_status: ApiStatus,
}

/// Commands accepted from the display collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    SetVisibleCount(usize),
    SetTimeframe(Timeframe),
    SetRankMode(RankMode),
    Shutdown,
}

/// Push notifications delivered to update subscribers.
#[derive(Debug, Clone)]
pub enum EngineUpdate {
    /// Coalesced per-instrument updates, priority or background cadence.
    Batch(UpdateBatch),
    /// Rankings were recomputed; read the new lists via the handle.
    RankingRefreshed { mode: RankMode },
    Connectivity(Connectivity),
    Phase(EnginePhase),
}

/// Internal feedback from spawned fetch tasks into the processing loop.
#[derive(Debug)]
enum InternalEvent {
    Seed {
        symbol: SmolStr,
        timeframe: Timeframe,
        bars: Vec<Bar>,
    },
    Summaries(Vec<Summary24h>),
}

/// Engine-owned state readable through the handle. Written only by the
/// processing loop; reads materialise copies.
#[derive(Debug)]
struct SharedState {
    phase: RwLock<EnginePhase>,
    connectivity: RwLock<Connectivity>,
    history: RwLock<HistoryStore>,
    rankings: RwLock<FnvHashMap<RankMode, Vec<RankedEntry>>>,
}

/// Cloneable handle: the narrow read/command interface consumed by the
/// display layer. Everything returned is an immutable snapshot.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    update_tx: broadcast::Sender<EngineUpdate>,
    shared: Arc<SharedState>,
}

impl EngineHandle {
    /// Ordered bar history snapshot, oldest-first. Empty when untracked.
    pub fn get_history(&self, symbol: &str, timeframe: Timeframe) -> Vec<Bar> {
        self.shared.history.read().read(symbol, timeframe)
    }

    /// Latest ranked list for a mode.
    pub fn get_ranking(&self, mode: RankMode) -> Vec<RankedEntry> {
        self.shared
            .rankings
            .read()
            .get(&mode)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_connectivity(&self) -> Connectivity {
        *self.shared.connectivity.read()
    }

    pub fn phase(&self) -> EnginePhase {
        *self.shared.phase.read()
    }

    /// Subscribe to batched update notifications. A lagging subscriber
    /// drops old batches rather than blocking the engine.
    pub fn subscribe_updates(&self) -> broadcast::Receiver<EngineUpdate> {
        self.update_tx.subscribe()
    }

    pub async fn set_visible_count(&self, count: usize) -> Result<(), EngineError> {
        self.send(EngineCommand::SetVisibleCount(count)).await
    }

    pub async fn set_timeframe(&self, timeframe: Timeframe) -> Result<(), EngineError> {
        self.send(EngineCommand::SetTimeframe(timeframe)).await
    }

    pub async fn set_rank_mode(&self, mode: RankMode) -> Result<(), EngineError> {
        self.send(EngineCommand::SetRankMode(mode)).await
    }

    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Shutdown).await
    }

    async fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| EngineError::Terminated)
    }
}

/// Constructor namespace for the engine task.
pub struct Engine;

impl Engine {
    /// Spawn an engine with injected collaborators (api client, stream
    /// transport) so the whole state machine is testable without a network.
    pub fn spawn(
        api: Arc<dyn MarketApi>,
        transport: Box<dyn StreamTransport>,
        config: EngineConfig,
    ) -> EngineHandle {
        let governor = Arc::new(RateLimitGovernor::new(config.rate_limit_backoff));
        let fetcher = SnapshotFetcher::new(api, governor.clone(), config.fetch.clone());
        let (stream_handle, stream_events) = stream::spawn(transport, config.stream.clone());

        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer.max(1));
        let (update_tx, _) = broadcast::channel(config.update_buffer.max(1));
        let (internal_tx, internal_rx) = mpsc::channel(1024);

        let shared = Arc::new(SharedState {
            phase: RwLock::new(EnginePhase::Idle),
            connectivity: RwLock::new(Connectivity {
                stream_connected: false,
                api_status: ApiStatus::Ok,
            }),
            history: RwLock::new(HistoryStore::new(config.history_capacity)),
            rankings: RwLock::new(FnvHashMap::default()),
        });

        let handle = EngineHandle {
            cmd_tx,
            update_tx: update_tx.clone(),
            shared: shared.clone(),
        };

        let ctx = EngineCtx {
            batcher: UpdateBatcher::new(config.priority_flush, config.background_flush),
            rank_mode: config.rank_mode,
            chart_timeframe: config.chart_timeframe,
            visible_count: config.visible_count.max(1),
            config,
            fetcher,
            governor,
            shared,
            update_tx,
            stream: stream_handle,
            internal_tx,
            universe: FnvHashMap::default(),
            summaries: FnvHashMap::default(),
            metrics: FnvHashMap::default(),
            visible: Vec::new(),
            dirty: FnvHashSet::default(),
            recompute_at: None,
            streaming_enabled: false,
        };

        tokio::spawn(run_engine(ctx, cmd_rx, stream_events, internal_rx));

        handle
    }
}

struct EngineCtx {
    config: EngineConfig,
    fetcher: SnapshotFetcher,
    governor: Arc<RateLimitGovernor>,
    shared: Arc<SharedState>,
    update_tx: broadcast::Sender<EngineUpdate>,
    stream: StreamManagerHandle,
    internal_tx: mpsc::Sender<InternalEvent>,

    universe: FnvHashMap<SmolStr, InstrumentInfo>,
    summaries: FnvHashMap<SmolStr, Summary24h>,
    metrics: FnvHashMap<SmolStr, InstrumentMetrics>,
    batcher: UpdateBatcher,
    rank_mode: RankMode,
    chart_timeframe: Timeframe,
    visible_count: usize,
    visible: Vec<SmolStr>,
    dirty: FnvHashSet<SmolStr>,
    recompute_at: Option<Instant>,
    /// False until priority seeding completes; no subscriptions go out
    /// before the first frame has data to show.
    streaming_enabled: bool,
}

async fn run_engine(
    mut ctx: EngineCtx,
    mut cmd_rx: mpsc::Receiver<EngineCommand>,
    mut stream_events: mpsc::Receiver<StreamEvent>,
    mut internal_rx: mpsc::Receiver<InternalEvent>,
) {
    if let Err(error) = bootstrap(&mut ctx).await {
        error!(%error, "engine bootstrap failed");
        ctx.set_phase(EnginePhase::Error);
        return;
    }

    let mut api_status_rx = ctx.governor.watch();
    let mut summary_timer = tokio::time::interval_at(
        Instant::now() + ctx.config.summary_refresh,
        ctx.config.summary_refresh,
    );
    let mut stream_alive = true;

    loop {
        let next_deadline = ctx.next_deadline();

        tokio::select! {
            command = cmd_rx.recv() => match command {
                Some(EngineCommand::Shutdown) | None => {
                    let _ = ctx.stream.shutdown().await;
                    info!("engine shut down");
                    return;
                }
                Some(command) => ctx.handle_command(command).await,
            },
            event = stream_events.recv(), if stream_alive => match event {
                Some(StreamEvent::Bar(update)) => ctx.on_bar(update),
                Some(StreamEvent::State(state)) => ctx.on_stream_state(state),
                None => {
                    warn!("stream manager terminated");
                    stream_alive = false;
                }
            },
            event = internal_rx.recv() => {
                if let Some(event) = event {
                    ctx.on_internal(event).await;
                }
            },
            changed = api_status_rx.changed() => {
                if changed.is_ok() {
                    let status = *api_status_rx.borrow_and_update();
                    ctx.on_api_status(status);
                }
            },
            _ = summary_timer.tick() => ctx.spawn_summary_refresh(),
            () = sleep_until_opt(next_deadline) => ctx.on_timer().await,
        }
    }
}

/// Sleep until the deadline, or forever when there is none.
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Universe discovery -> priority seeding -> stream open -> background fill.
async fn bootstrap(ctx: &mut EngineCtx) -> Result<(), EngineError> {
    ctx.set_phase(EnginePhase::DiscoveringUniverse);
    let instruments = ctx
        .fetcher
        .universe()
        .await
        .map_err(EngineError::UniverseDiscovery)?;
    let summaries = ctx
        .fetcher
        .summaries()
        .await
        .map_err(EngineError::UniverseDiscovery)?;

    let mut summary_by_symbol: FnvHashMap<SmolStr, Summary24h> = summaries
        .into_iter()
        .map(|summary| (summary.symbol.clone(), summary))
        .collect();

    // Interest-bearing universe: tradable, right quote asset, ranked by
    // 24h quote volume.
    let mut candidates: Vec<InstrumentInfo> = instruments
        .into_iter()
        .filter(|info| info.is_tradable() && info.quote_asset == ctx.config.quote_asset)
        .filter(|info| summary_by_symbol.contains_key(&info.symbol))
        .collect();
    candidates.sort_by(|a, b| {
        let volume = |info: &InstrumentInfo| {
            summary_by_symbol
                .get(&info.symbol)
                .map(|summary| summary.quote_volume)
                .unwrap_or(0.0)
        };
        volume(b)
            .partial_cmp(&volume(a))
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    candidates.truncate(ctx.config.universe_size);

    if candidates.is_empty() {
        return Err(EngineError::UniverseDiscovery(ApiError::Parse(
            "no tradable instruments discovered".to_string(),
        )));
    }
    info!(universe = candidates.len(), "active universe selected");

    ctx.universe = candidates
        .into_iter()
        .map(|info| (info.symbol.clone(), info))
        .collect();
    summary_by_symbol.retain(|symbol, _| ctx.universe.contains_key(symbol));
    ctx.summaries = summary_by_symbol;

    // First ranking pass straight from the summaries, so a visible set
    // exists before any bar history arrives.
    ctx.dirty = ctx.universe.keys().cloned().collect();
    ctx.recompute_now().await;

    // Seed the visible set before opening the stream so the first frame
    // has data.
    ctx.set_phase(EnginePhase::SeedingPriority);
    let visible = ctx.visible.clone();
    let foreground = ctx.config.fetch.foreground_pacing;
    let seeds = ctx
        .fetcher
        .seed_many(&visible, ctx.config.metric_timeframe, foreground)
        .await;
    ctx.apply_seeds(ctx.config.metric_timeframe, seeds);
    if ctx.chart_timeframe != ctx.config.metric_timeframe {
        let seeds = ctx
            .fetcher
            .seed_many(&visible, ctx.chart_timeframe, foreground)
            .await;
        ctx.apply_seeds(ctx.chart_timeframe, seeds);
    }
    ctx.recompute_now().await;

    ctx.set_phase(EnginePhase::Streaming);
    ctx.streaming_enabled = true;
    ctx.stream.subscribe(ctx.desired_keys()).await?;

    // Backfill the rest of the universe without blocking readiness.
    ctx.set_phase(EnginePhase::EnrichingBackground);
    let mut remainder: Vec<SmolStr> = ctx
        .universe
        .keys()
        .filter(|&symbol| !ctx.visible.contains(symbol))
        .cloned()
        .collect();
    remainder.sort();
    ctx.spawn_seed_task(
        remainder,
        ctx.config.metric_timeframe,
        ctx.config.fetch.background_pacing,
    );

    ctx.set_phase(EnginePhase::Ready);
    Ok(())
}

impl EngineCtx {
    fn set_phase(&self, phase: EnginePhase) {
        *self.shared.phase.write() = phase;
        let _ = self.update_tx.send(EngineUpdate::Phase(phase));
    }

    fn publish_connectivity(&self) {
        let connectivity = *self.shared.connectivity.read();
        let _ = self.update_tx.send(EngineUpdate::Connectivity(connectivity));
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.batcher.next_deadline(), self.recompute_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Stream keys the current visible set should be subscribed to.
    fn desired_keys(&self) -> Vec<StreamKey> {
        self.visible
            .iter()
            .flat_map(|symbol| self.keys_for(symbol))
            .collect()
    }

    fn keys_for(&self, symbol: &SmolStr) -> Vec<StreamKey> {
        let mut keys = vec![StreamKey::new(symbol.clone(), self.config.metric_timeframe)];
        if self.chart_timeframe != self.config.metric_timeframe {
            keys.push(StreamKey::new(symbol.clone(), self.chart_timeframe));
        }
        keys
    }

    fn schedule_recompute(&mut self) {
        if self.recompute_at.is_none() {
            self.recompute_at = Some(Instant::now() + self.config.recompute_debounce);
        }
    }

    /// Store foreground seed results. Failed symbols were already logged by
    /// the fetcher and stay isolated; everything else proceeds.
    fn apply_seeds(
        &mut self,
        timeframe: Timeframe,
        seeds: Vec<(SmolStr, Result<Vec<Bar>, ApiError>)>,
    ) {
        let mut store = self.shared.history.write();
        for (symbol, result) in seeds {
            if let Ok(bars) = result {
                store.seed(&symbol, timeframe, bars);
                if timeframe == self.config.metric_timeframe {
                    self.dirty.insert(symbol);
                }
            }
        }
    }

    /// Apply one inbound bar: store, mark dirty, enqueue for delivery.
    fn on_bar(&mut self, update: BarUpdate) {
        if !self.universe.contains_key(&update.symbol) {
            return;
        }
        // Bars for a timeframe that is no longer tracked (late events after
        // a switch) are dropped on arrival.
        if update.timeframe != self.config.metric_timeframe
            && update.timeframe != self.chart_timeframe
        {
            return;
        }

        let outcome =
            self.shared
                .history
                .write()
                .append(&update.symbol, update.timeframe, update.bar);
        if outcome == AppendOutcome::Discarded {
            debug!(symbol = %update.symbol, "discarded stale bar");
            return;
        }

        if update.timeframe == self.config.metric_timeframe {
            self.dirty.insert(update.symbol.clone());
            self.schedule_recompute();
        }

        let last_price = update.bar.close;
        self.batcher.push(
            InstrumentUpdate {
                symbol: update.symbol,
                timeframe: update.timeframe,
                bar: update.bar,
                last_price,
            },
            Instant::now(),
        );
    }

    fn on_stream_state(&mut self, state: ConnectionState) {
        self.shared.connectivity.write().stream_connected = state == ConnectionState::Connected;
        self.publish_connectivity();

        if state == ConnectionState::Failed {
            error!("stream failed terminally");
            self.set_phase(EnginePhase::Error);
        }
    }

    fn on_api_status(&mut self, status: ApiStatus) {
        self.shared.connectivity.write().api_status = status;
        self.publish_connectivity();
    }

    async fn on_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::Seed {
                symbol,
                timeframe,
                bars,
            } => {
                // A timeframe switch may have outpaced this fetch; its
                // continuation checks the active set before storing.
                if timeframe != self.config.metric_timeframe && timeframe != self.chart_timeframe {
                    debug!(%symbol, %timeframe, "discarding seed for inactive timeframe");
                    return;
                }
                if !self.universe.contains_key(&symbol) {
                    return;
                }
                self.shared.history.write().seed(&symbol, timeframe, bars);
                if timeframe == self.config.metric_timeframe {
                    self.dirty.insert(symbol);
                    self.schedule_recompute();
                }
            }
            InternalEvent::Summaries(summaries) => {
                debug!(count = summaries.len(), "24h summaries refreshed");
                for summary in summaries {
                    if self.universe.contains_key(&summary.symbol) {
                        self.summaries.insert(summary.symbol.clone(), summary);
                    }
                }
                // Full recompute bounds staleness even without new stream
                // events.
                self.dirty = self.universe.keys().cloned().collect();
                self.recompute_now().await;
            }
        }
    }

    async fn on_timer(&mut self) {
        let now = Instant::now();
        for batch in self.batcher.flush_due(now) {
            if !batch.updates.is_empty() {
                let _ = self.update_tx.send(EngineUpdate::Batch(batch));
            }
        }
        if self.recompute_at.is_some_and(|at| at <= now) {
            self.recompute_now().await;
        }
    }

    /// Recompute metrics for every dirty instrument, then re-rank.
    async fn recompute_now(&mut self) {
        self.recompute_at = None;

        if !self.dirty.is_empty() {
            let now = Utc::now();
            let symbols: Vec<SmolStr> = self.dirty.drain().collect();
            let store = self.shared.history.read();
            for symbol in symbols {
                let bars = store.read(symbol.as_str(), self.config.metric_timeframe);
                let metrics = compute_metrics(&bars, self.summaries.get(&symbol), now);
                self.metrics.insert(symbol, metrics);
            }
            drop(store);
        }

        self.rerank().await;
    }

    /// Rebuild every mode's ranking snapshot and resync the visible set.
    async fn rerank(&mut self) {
        let mut rankings = FnvHashMap::default();
        for mode in RankMode::ALL {
            rankings.insert(
                mode,
                rank(&self.universe, &self.metrics, mode, self.config.top_k),
            );
        }
        let active = rankings.get(&self.rank_mode).cloned().unwrap_or_default();
        *self.shared.rankings.write() = rankings;
        let _ = self.update_tx.send(EngineUpdate::RankingRefreshed {
            mode: self.rank_mode,
        });

        let next_visible: Vec<SmolStr> = active
            .iter()
            .take(self.visible_count)
            .map(|entry| entry.instrument.symbol.clone())
            .collect();
        if next_visible != self.visible {
            let previous = std::mem::replace(&mut self.visible, next_visible);
            self.batcher
                .set_priority_keys(self.visible.iter().cloned().collect());

            if self.streaming_enabled {
                let added: Vec<StreamKey> = self
                    .visible
                    .iter()
                    .filter(|&symbol| !previous.contains(symbol))
                    .flat_map(|symbol| self.keys_for(symbol))
                    .collect();
                let removed: Vec<StreamKey> = previous
                    .iter()
                    .filter(|&symbol| !self.visible.contains(symbol))
                    .flat_map(|symbol| self.keys_for(symbol))
                    .collect();

                // Removed keys drain lazily; added keys subscribe now.
                if !removed.is_empty() {
                    if let Err(error) = self.stream.unsubscribe(removed).await {
                        warn!(%error, "unsubscribe failed");
                    }
                }
                if !added.is_empty() {
                    if let Err(error) = self.stream.subscribe(added).await {
                        warn!(%error, "subscribe failed");
                    }
                }
            }
        }
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::SetVisibleCount(count) => {
                info!(count, "visible count changed");
                self.visible_count = count.max(1);
                // Subscriptions resync off the fresh visible set; no data
                // reseed is needed.
                self.rerank().await;
            }
            EngineCommand::SetRankMode(mode) => {
                if mode == self.rank_mode {
                    return;
                }
                info!(%mode, "rank mode changed");
                self.rank_mode = mode;
                self.rerank().await;
                self.seed_missing_visible();
            }
            EngineCommand::SetTimeframe(timeframe) => {
                if timeframe == self.chart_timeframe {
                    return;
                }
                info!(%timeframe, "timeframe changed");
                let outgoing = self.chart_timeframe;
                self.chart_timeframe = timeframe;

                // Metric buffers stay resident (ranking depends on them);
                // the outgoing chart timeframe's buffers are stale.
                if outgoing != self.config.metric_timeframe {
                    self.shared.history.write().clear_timeframe(outgoing);
                }

                // Reseed the visible set in the new timeframe.
                if timeframe != self.config.metric_timeframe {
                    self.spawn_seed_task(
                        self.visible.clone(),
                        timeframe,
                        self.config.fetch.foreground_pacing,
                    );
                }

                self.dirty = self.visible.iter().cloned().collect();
                self.recompute_now().await;

                // Forced reconciliation: stale-timeframe subscriptions are
                // unsubscribed, the new desired set subscribed.
                if let Err(error) = self.stream.resync(self.desired_keys()).await {
                    warn!(%error, "subscription resync failed");
                }
            }
            EngineCommand::Shutdown => {}
        }
    }

    /// Seed history for visible instruments that have none yet (e.g. they
    /// just entered the visible window under a new rank mode).
    fn seed_missing_visible(&self) {
        let store = self.shared.history.read();
        let missing_metric: Vec<SmolStr> = self
            .visible
            .iter()
            .filter(|symbol| !store.contains(symbol.as_str(), self.config.metric_timeframe))
            .cloned()
            .collect();
        let missing_chart: Vec<SmolStr> = if self.chart_timeframe != self.config.metric_timeframe {
            self.visible
                .iter()
                .filter(|symbol| !store.contains(symbol.as_str(), self.chart_timeframe))
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        drop(store);

        self.spawn_seed_task(
            missing_metric,
            self.config.metric_timeframe,
            self.config.fetch.foreground_pacing,
        );
        self.spawn_seed_task(
            missing_chart,
            self.chart_timeframe,
            self.config.fetch.foreground_pacing,
        );
    }

    /// Fetch bars for many symbols off the processing loop; results come
    /// back as [`InternalEvent::Seed`]s and are validated against the
    /// active timeframes on arrival.
    fn spawn_seed_task(&self, symbols: Vec<SmolStr>, timeframe: Timeframe, pacing: Duration) {
        if symbols.is_empty() {
            return;
        }
        let fetcher = self.fetcher.clone();
        let internal_tx = self.internal_tx.clone();
        let chunk_size = self.config.fetch.seed_batch_size.max(1);

        tokio::spawn(async move {
            for (index, chunk) in symbols.chunks(chunk_size).enumerate() {
                if index > 0 {
                    tokio::time::sleep(pacing).await;
                }
                for (symbol, result) in fetcher.seed_many(chunk, timeframe, pacing).await {
                    if let Ok(bars) = result {
                        let event = InternalEvent::Seed {
                            symbol,
                            timeframe,
                            bars,
                        };
                        if internal_tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });
    }

    fn spawn_summary_refresh(&self) {
        let fetcher = self.fetcher.clone();
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            match fetcher.summaries().await {
                Ok(summaries) => {
                    let _ = internal_tx.send(InternalEvent::Summaries(summaries)).await;
                }
                Err(error) => warn!(%error, "summary refresh failed"),
            }
        });
    }
}
