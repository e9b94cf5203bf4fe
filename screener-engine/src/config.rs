//! Engine configuration.

use crate::{
    backoff::ExponentialBackoff, fetch::FetchConfig, market::Timeframe, rank::RankMode,
    stream::StreamConfig,
};
use smol_str::SmolStr;
use std::time::Duration;

/// Orchestrator tuning. Component-level knobs live in the nested
/// [`FetchConfig`] and [`StreamConfig`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Quote asset defining the active universe (e.g. "USDT").
    pub quote_asset: SmolStr,
    /// Instruments kept after ranking raw summaries by 24h quote volume.
    pub universe_size: usize,
    /// Instruments treated as displayed/priority.
    pub visible_count: usize,
    /// Ranked list length per mode.
    pub top_k: usize,
    /// Timeframe feeding metric derivation. Always resident.
    pub metric_timeframe: Timeframe,
    /// Timeframe backing the display history; switchable at runtime.
    pub chart_timeframe: Timeframe,
    /// Bars kept per (instrument, timeframe) buffer.
    pub history_capacity: usize,
    /// Debounce between a bar arriving and the metrics/ranking recompute.
    pub recompute_debounce: Duration,
    /// Cadence of the coarse 24h summary refresh, which also forces a full
    /// recompute to bound staleness.
    pub summary_refresh: Duration,
    /// Flush cadence for displayed instruments.
    pub priority_flush: Duration,
    /// Flush cadence for everything else.
    pub background_flush: Duration,
    /// Suspension schedule applied when the upstream throttles.
    pub rate_limit_backoff: ExponentialBackoff,
    /// Initial ranking mode.
    pub rank_mode: RankMode,
    pub command_buffer: usize,
    pub update_buffer: usize,
    pub fetch: FetchConfig,
    pub stream: StreamConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quote_asset: SmolStr::new("USDT"),
            universe_size: 250,
            visible_count: 30,
            top_k: 100,
            metric_timeframe: Timeframe::M1,
            chart_timeframe: Timeframe::M15,
            history_capacity: 500,
            recompute_debounce: Duration::from_millis(250),
            summary_refresh: Duration::from_secs(30),
            priority_flush: Duration::from_millis(16),
            background_flush: Duration::from_millis(1000),
            rate_limit_backoff: ExponentialBackoff::new(
                Duration::from_secs(15),
                Duration::from_secs(120),
            ),
            rank_mode: RankMode::QuoteVolume24h,
            command_buffer: 64,
            update_buffer: 1024,
            fetch: FetchConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_quote_asset(mut self, quote_asset: impl Into<SmolStr>) -> Self {
        self.quote_asset = quote_asset.into();
        self
    }

    pub fn with_universe_size(mut self, universe_size: usize) -> Self {
        self.universe_size = universe_size;
        self
    }

    pub fn with_visible_count(mut self, visible_count: usize) -> Self {
        self.visible_count = visible_count;
        self
    }

    pub fn with_chart_timeframe(mut self, chart_timeframe: Timeframe) -> Self {
        self.chart_timeframe = chart_timeframe;
        self
    }

    pub fn with_rank_mode(mut self, rank_mode: RankMode) -> Self {
        self.rank_mode = rank_mode;
        self
    }

    pub fn with_fetch(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }
}
