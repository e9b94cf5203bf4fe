//! Pure metric derivation over buffered bars plus a coarse 24h summary.
//!
//! Every function is deterministic: the reference timestamp is always passed
//! in, no wall clock is read here. Degenerate input (empty windows,
//! non-positive denominators, inverted extremes) degrades to explicit
//! sentinels, never a panic.

use crate::market::{Bar, Summary24h};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lookback window a metric was computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum MetricWindow {
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "24h")]
    H24,
}

impl MetricWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricWindow::M15 => "15m",
            MetricWindow::H1 => "1h",
            MetricWindow::H4 => "4h",
            MetricWindow::H24 => "24h",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            MetricWindow::M15 => Duration::minutes(15),
            MetricWindow::H1 => Duration::hours(1),
            MetricWindow::H4 => Duration::hours(4),
            MetricWindow::H24 => Duration::hours(24),
        }
    }
}

impl std::fmt::Display for MetricWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// High/low price range over a window.
///
/// `inactive` is the explicit no-data sentinel: true iff no bars fell inside
/// the window. A genuine zero range (flat price) is a distinct, valid case
/// with `inactive == false` and `percent_range == 0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RangeMetric {
    pub window: MetricWindow,
    pub high: f64,
    pub low: f64,
    pub absolute_range: f64,
    /// `absolute_range / low`; 0.0 when `low` is non-positive.
    pub percent_range: f64,
    pub inactive: bool,
}

impl RangeMetric {
    fn inactive(window: MetricWindow) -> Self {
        Self {
            window,
            high: 0.0,
            low: 0.0,
            absolute_range: 0.0,
            percent_range: 0.0,
            inactive: true,
        }
    }
}

/// Traded volume over a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VolumeMetric {
    pub window: MetricWindow,
    pub base_volume: f64,
    pub quote_volume: f64,
}

impl VolumeMetric {
    fn zero(window: MetricWindow) -> Self {
        Self {
            window,
            base_volume: 0.0,
            quote_volume: 0.0,
        }
    }
}

/// Which 24h extreme the last price sits closest to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NearestSide {
    High,
    Low,
    None,
}

/// Proximity of the last price to the 24h extremes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExtremumMetric {
    pub high_24h: f64,
    pub low_24h: f64,
    pub last_price: f64,
    pub dist_to_high_pct: f64,
    pub dist_to_low_pct: f64,
    pub nearest_side: NearestSide,
    /// `min(dist_to_high_pct, dist_to_low_pct)`; lower is closer to an
    /// extreme. `+inf` when inputs are non-positive or inverted.
    pub score: f64,
}

/// Short-window volume relative to a longer baseline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GrowthMetric {
    /// `volume_4h / 16`: the 4h volume expressed per 15 minutes.
    pub baseline_per_15m: f64,
    pub current_volume: f64,
    /// `current / baseline`; 0.0 when the baseline is non-positive.
    pub ratio: f64,
    /// `ratio - 1`.
    pub delta: f64,
}

/// Everything the ranking engine needs for one instrument. Recomputed
/// wholesale - a fresh snapshot fully replaces the prior one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentMetrics {
    pub last_price: f64,
    pub last_update: DateTime<Utc>,
    pub range_15m: RangeMetric,
    pub range_1h: RangeMetric,
    pub range_4h: RangeMetric,
    pub range_24h: RangeMetric,
    pub volume_15m: VolumeMetric,
    pub volume_1h: VolumeMetric,
    pub volume_4h: VolumeMetric,
    pub volume_24h: VolumeMetric,
    pub growth: GrowthMetric,
    pub extremum: ExtremumMetric,
}

/// Bars whose `close_time` falls within `[now - window, now]`.
fn bars_in_window<'a>(
    bars: &'a [Bar],
    window: MetricWindow,
    now: DateTime<Utc>,
) -> impl Iterator<Item = &'a Bar> {
    let cutoff = now - window.duration();
    bars.iter()
        .filter(move |bar| bar.close_time >= cutoff && bar.close_time <= now)
}

/// Price range over the window.
pub fn range_metric(bars: &[Bar], window: MetricWindow, now: DateTime<Utc>) -> RangeMetric {
    let mut high = f64::MIN;
    let mut low = f64::MAX;
    let mut seen = false;

    for bar in bars_in_window(bars, window, now) {
        high = high.max(bar.high);
        low = low.min(bar.low);
        seen = true;
    }

    if !seen {
        return RangeMetric::inactive(window);
    }

    let absolute_range = high - low;
    let percent_range = if low > 0.0 { absolute_range / low } else { 0.0 };

    RangeMetric {
        window,
        high,
        low,
        absolute_range,
        percent_range,
        inactive: false,
    }
}

/// Summed volume over the window.
pub fn volume_metric(bars: &[Bar], window: MetricWindow, now: DateTime<Utc>) -> VolumeMetric {
    let mut metric = VolumeMetric::zero(window);
    for bar in bars_in_window(bars, window, now) {
        metric.base_volume += bar.base_volume;
        metric.quote_volume += bar.quote_volume;
    }
    metric
}

/// Proximity to the 24h extremes.
///
/// `dist_to_high = (high - last) / high`, `dist_to_low = (last - low) / low`.
/// Non-positive or inverted inputs yield the `None`/`+inf` sentinel.
pub fn extremum_metric(high_24h: f64, low_24h: f64, last_price: f64) -> ExtremumMetric {
    if high_24h <= 0.0 || low_24h <= 0.0 || last_price <= 0.0 || high_24h < low_24h {
        return ExtremumMetric {
            high_24h,
            low_24h,
            last_price,
            dist_to_high_pct: f64::INFINITY,
            dist_to_low_pct: f64::INFINITY,
            nearest_side: NearestSide::None,
            score: f64::INFINITY,
        };
    }

    let dist_to_high_pct = (high_24h - last_price) / high_24h;
    let dist_to_low_pct = (last_price - low_24h) / low_24h;
    let (nearest_side, score) = if dist_to_high_pct <= dist_to_low_pct {
        (NearestSide::High, dist_to_high_pct)
    } else {
        (NearestSide::Low, dist_to_low_pct)
    };

    ExtremumMetric {
        high_24h,
        low_24h,
        last_price,
        dist_to_high_pct,
        dist_to_low_pct,
        nearest_side,
        score,
    }
}

/// Current 15m volume against the per-15m baseline implied by 4h volume.
pub fn growth_metric(volume_15m: f64, volume_4h: f64) -> GrowthMetric {
    let baseline_per_15m = volume_4h / 16.0;
    let ratio = if baseline_per_15m > 0.0 {
        volume_15m / baseline_per_15m
    } else {
        0.0
    };

    GrowthMetric {
        baseline_per_15m,
        current_volume: volume_15m,
        ratio,
        delta: ratio - 1.0,
    }
}

/// Derive the full metric set for one instrument.
///
/// Intraday windows (15m/1h/4h) come from the supplied bar slice; the 24h
/// family comes from the coarse summary.
pub fn compute_metrics(
    bars: &[Bar],
    summary: Option<&Summary24h>,
    now: DateTime<Utc>,
) -> InstrumentMetrics {
    let range_15m = range_metric(bars, MetricWindow::M15, now);
    let range_1h = range_metric(bars, MetricWindow::H1, now);
    let range_4h = range_metric(bars, MetricWindow::H4, now);

    let volume_15m = volume_metric(bars, MetricWindow::M15, now);
    let volume_1h = volume_metric(bars, MetricWindow::H1, now);
    let volume_4h = volume_metric(bars, MetricWindow::H4, now);

    let last_bar = bars.last();
    let last_price = last_bar
        .map(|bar| bar.close)
        .or_else(|| summary.map(|s| s.last_price))
        .unwrap_or(0.0);
    let last_update = last_bar.map(|bar| bar.close_time).unwrap_or(now);

    let (range_24h, volume_24h, extremum) = match summary {
        Some(summary) => {
            let absolute_range = (summary.high - summary.low).max(0.0);
            let range_24h = RangeMetric {
                window: MetricWindow::H24,
                high: summary.high,
                low: summary.low,
                absolute_range,
                percent_range: if summary.low > 0.0 {
                    absolute_range / summary.low
                } else {
                    0.0
                },
                inactive: false,
            };
            let volume_24h = VolumeMetric {
                window: MetricWindow::H24,
                base_volume: summary.base_volume,
                quote_volume: summary.quote_volume,
            };
            let extremum = extremum_metric(summary.high, summary.low, last_price);
            (range_24h, volume_24h, extremum)
        }
        None => (
            RangeMetric::inactive(MetricWindow::H24),
            VolumeMetric::zero(MetricWindow::H24),
            extremum_metric(0.0, 0.0, last_price),
        ),
    };

    let growth = growth_metric(volume_15m.quote_volume, volume_4h.quote_volume);

    InstrumentMetrics {
        last_price,
        last_update,
        range_15m,
        range_1h,
        range_4h,
        range_24h,
        volume_15m,
        volume_1h,
        volume_4h,
        volume_24h,
        growth,
        extremum,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Bar;
    use chrono::TimeDelta;
    use smol_str::SmolStr;

    fn bar(minutes_ago: i64, high: f64, low: f64, quote_volume: f64, now: DateTime<Utc>) -> Bar {
        let close_time = now - TimeDelta::minutes(minutes_ago);
        Bar::new(
            close_time - TimeDelta::minutes(1),
            close_time,
            low,
            high,
            low,
            (high + low) / 2.0,
            quote_volume / low.max(1.0),
            quote_volume,
            None,
            true,
        )
    }

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(20_000)
    }

    #[test]
    fn test_range_metric_percent_range() {
        let now = now();
        let bars = vec![bar(2, 10.0, 8.0, 0.0, now), bar(1, 12.0, 9.0, 0.0, now)];

        let metric = range_metric(&bars, MetricWindow::M15, now);
        assert!(!metric.inactive);
        assert_eq!(metric.high, 12.0);
        assert_eq!(metric.low, 8.0);
        assert_eq!(metric.absolute_range, 4.0);
        assert_eq!(metric.percent_range, 0.5);
    }

    #[test]
    fn test_range_metric_empty_window_is_inactive() {
        let now = now();
        // Bars exist but all close before the window starts.
        let bars = vec![bar(120, 10.0, 8.0, 0.0, now)];

        let metric = range_metric(&bars, MetricWindow::M15, now);
        assert!(metric.inactive);
        assert_eq!(metric.percent_range, 0.0);
    }

    #[test]
    fn test_range_metric_flat_price_is_active_zero() {
        let now = now();
        let bars = vec![bar(1, 10.0, 10.0, 0.0, now)];

        let metric = range_metric(&bars, MetricWindow::M15, now);
        assert!(!metric.inactive);
        assert_eq!(metric.absolute_range, 0.0);
        assert_eq!(metric.percent_range, 0.0);
    }

    #[test]
    fn test_volume_metric_filters_by_window() {
        let now = now();
        let bars = vec![
            bar(120, 1.0, 1.0, 999.0, now), // outside 1h window
            bar(30, 1.0, 1.0, 100.0, now),
            bar(5, 1.0, 1.0, 50.0, now),
        ];

        let metric = volume_metric(&bars, MetricWindow::H1, now);
        assert_eq!(metric.quote_volume, 150.0);
    }

    #[test]
    fn test_extremum_metric_nearest_high() {
        let metric = extremum_metric(110.0, 90.0, 108.0);
        assert_eq!(metric.nearest_side, NearestSide::High);
        assert!((metric.score - 0.0182).abs() < 0.0001);
        assert!((metric.dist_to_low_pct - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_extremum_metric_degenerate_inputs() {
        for (high, low, last) in [(0.0, 90.0, 100.0), (110.0, 0.0, 100.0), (90.0, 110.0, 100.0)] {
            let metric = extremum_metric(high, low, last);
            assert_eq!(metric.nearest_side, NearestSide::None);
            assert!(metric.score.is_infinite());
        }
    }

    #[test]
    fn test_growth_metric_baseline() {
        let metric = growth_metric(100.0, 1600.0);
        assert_eq!(metric.baseline_per_15m, 100.0);
        assert_eq!(metric.ratio, 1.0);
        assert_eq!(metric.delta, 0.0);
    }

    #[test]
    fn test_growth_metric_dead_baseline() {
        let metric = growth_metric(100.0, 0.0);
        assert_eq!(metric.ratio, 0.0);
        assert_eq!(metric.delta, -1.0);
    }

    #[test]
    fn test_compute_metrics_is_deterministic() {
        let now = now();
        let bars = vec![bar(10, 11.0, 10.0, 500.0, now), bar(1, 12.0, 10.5, 800.0, now)];
        let summary = Summary24h {
            symbol: SmolStr::new("BTCUSDT"),
            last_price: 11.5,
            high: 13.0,
            low: 9.0,
            base_volume: 1000.0,
            quote_volume: 11_000.0,
        };

        let first = compute_metrics(&bars, Some(&summary), now);
        let second = compute_metrics(&bars, Some(&summary), now);
        assert_eq!(first, second);
        assert_eq!(first.last_price, bars[1].close);
        assert_eq!(first.volume_24h.quote_volume, 11_000.0);
    }

    #[test]
    fn test_compute_metrics_without_summary_degrades() {
        let now = now();
        let metrics = compute_metrics(&[], None, now);
        assert!(metrics.range_15m.inactive);
        assert!(metrics.range_24h.inactive);
        assert_eq!(metrics.extremum.nearest_side, NearestSide::None);
        assert_eq!(metrics.last_price, 0.0);
    }
}
