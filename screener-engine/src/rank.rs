//! Ranking of instruments by derived metrics.

use crate::{market::InstrumentInfo, metrics::InstrumentMetrics};
use fnv::FnvHashMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::cmp::Ordering;

/// Metric family used to order instruments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RankMode {
    Range15m,
    Range1h,
    Range4h,
    Range24h,
    QuoteVolume24h,
    VolumeSurge,
    NearExtremum,
}

impl RankMode {
    pub const ALL: [RankMode; 7] = [
        RankMode::Range15m,
        RankMode::Range1h,
        RankMode::Range4h,
        RankMode::Range24h,
        RankMode::QuoteVolume24h,
        RankMode::VolumeSurge,
        RankMode::NearExtremum,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RankMode::Range15m => "range_15m",
            RankMode::Range1h => "range_1h",
            RankMode::Range4h => "range_4h",
            RankMode::Range24h => "range_24h",
            RankMode::QuoteVolume24h => "quote_volume_24h",
            RankMode::VolumeSurge => "volume_surge",
            RankMode::NearExtremum => "near_extremum",
        }
    }

    /// Extremum-proximity modes sort ascending (lower score = closer to an
    /// extreme = better); every other mode sorts descending.
    pub fn ascending(&self) -> bool {
        matches!(self, RankMode::NearExtremum)
    }

    /// Score extraction. Total: missing or inactive data scores 0.0 rather
    /// than failing the whole ranking.
    pub fn score(&self, metrics: &InstrumentMetrics) -> f64 {
        fn active_range(range: &crate::metrics::RangeMetric) -> f64 {
            if range.inactive { 0.0 } else { range.percent_range }
        }

        match self {
            RankMode::Range15m => active_range(&metrics.range_15m),
            RankMode::Range1h => active_range(&metrics.range_1h),
            RankMode::Range4h => active_range(&metrics.range_4h),
            RankMode::Range24h => active_range(&metrics.range_24h),
            RankMode::QuoteVolume24h => metrics.volume_24h.quote_volume,
            RankMode::VolumeSurge => metrics.growth.ratio.max(0.0),
            RankMode::NearExtremum => metrics.extremum.score,
        }
    }
}

impl std::fmt::Display for RankMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Materialised sort output for one instrument under one mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntry {
    pub instrument: InstrumentInfo,
    pub metrics: InstrumentMetrics,
    pub mode: RankMode,
    pub score: f64,
}

/// Rank all instruments with metrics under the given mode.
///
/// Entries with non-finite scores are excluded before sorting; ties break by
/// symbol so identical input always yields identical output. Output is
/// truncated to `top_k` - only a small visible window is ever displayed.
pub fn rank(
    instruments: &FnvHashMap<SmolStr, InstrumentInfo>,
    metrics: &FnvHashMap<SmolStr, InstrumentMetrics>,
    mode: RankMode,
    top_k: usize,
) -> Vec<RankedEntry> {
    metrics
        .iter()
        .filter_map(|(symbol, metrics)| {
            let instrument = instruments.get(symbol)?;
            let score = mode.score(metrics);
            score.is_finite().then(|| RankedEntry {
                instrument: instrument.clone(),
                metrics: metrics.clone(),
                mode,
                score,
            })
        })
        .sorted_by(|a, b| {
            let by_score = a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal);
            let by_score = if mode.ascending() {
                by_score
            } else {
                by_score.reverse()
            };
            by_score.then_with(|| a.instrument.symbol.cmp(&b.instrument.symbol))
        })
        .take(top_k)
        .collect()
}
