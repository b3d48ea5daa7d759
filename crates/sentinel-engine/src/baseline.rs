//! Per-market rolling baselines.
//!
//! Maintains the reference statistics z-scores are computed against: trade
//! size, hourly volume, and hourly absolute price change over the retention
//! window. Statistics are plain f64 (they describe distributions, not
//! ledger amounts) while the inputs stay `Decimal` until the boundary.
//!
//! Every query returns `None` until a market has `min_samples` trades, and
//! on zero variance rather than dividing toward infinity.

use std::collections::{BTreeMap, HashMap};

use rust_decimal::prelude::ToPrimitive;

use sentinel_common::{Trade, MS_PER_HOUR};

/// Configuration for the baseline calculator.
#[derive(Debug, Clone)]
pub struct BaselineConfig {
    /// Retention window in milliseconds.
    pub window_ms: i64,
    /// Minimum trades before baseline queries answer.
    pub min_samples: usize,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            window_ms: 86_400_000, // 24h
            min_samples: 100,
        }
    }
}

/// Rolling statistics for one market.
#[derive(Debug, Clone, Default)]
pub struct MarketBaseline {
    pub avg_trade_size: f64,
    pub stddev_trade_size: f64,
    pub median_trade_size: f64,
    pub avg_hourly_volume: f64,
    pub stddev_hourly_volume: f64,
    pub avg_abs_hourly_price_change: f64,
    pub stddev_abs_hourly_price_change: f64,
    pub trades_per_hour: f64,
    pub first_trade_ms: i64,
    pub last_trade_ms: i64,
    pub sample_count: usize,
}

/// Per-market baseline calculator.
#[derive(Debug)]
pub struct BaselineCalculator {
    config: BaselineConfig,
    baselines: HashMap<String, MarketBaseline>,
}

impl BaselineCalculator {
    pub fn new(config: BaselineConfig) -> Self {
        Self {
            config,
            baselines: HashMap::new(),
        }
    }

    /// Recompute a market's baseline from its retained trades.
    ///
    /// `now_ms` anchors the retention window so replay clocks flow through;
    /// trades older than the window are ignored.
    pub fn update_baseline(&mut self, market_id: &str, trades: &[&Trade], now_ms: i64) {
        let cutoff = now_ms - self.config.window_ms;
        let mut sizes: Vec<f64> = Vec::new();
        let mut hourly_volume: BTreeMap<i64, f64> = BTreeMap::new();
        // Per hour bucket: (first trade ts, first price, last trade ts, last price).
        let mut hourly_prices: BTreeMap<i64, (i64, f64, i64, f64)> = BTreeMap::new();
        let mut first_ts = i64::MAX;
        let mut last_ts = i64::MIN;

        for trade in trades.iter().filter(|t| t.timestamp_ms >= cutoff) {
            let usd = trade.usd_size().to_f64().unwrap_or(0.0);
            let price = trade.price.to_f64().unwrap_or(0.0);
            let bucket = trade.timestamp_ms.div_euclid(MS_PER_HOUR);

            sizes.push(usd);
            *hourly_volume.entry(bucket).or_insert(0.0) += usd;

            hourly_prices
                .entry(bucket)
                .and_modify(|(first_t, first_p, last_t, last_p)| {
                    if trade.timestamp_ms < *first_t {
                        *first_t = trade.timestamp_ms;
                        *first_p = price;
                    }
                    if trade.timestamp_ms >= *last_t {
                        *last_t = trade.timestamp_ms;
                        *last_p = price;
                    }
                })
                .or_insert((trade.timestamp_ms, price, trade.timestamp_ms, price));

            first_ts = first_ts.min(trade.timestamp_ms);
            last_ts = last_ts.max(trade.timestamp_ms);
        }

        if sizes.is_empty() {
            self.baselines.remove(market_id);
            return;
        }

        let (avg_size, std_size) = mean_stddev(&sizes);
        let median_size = median(&mut sizes.clone());

        let volumes: Vec<f64> = hourly_volume.values().copied().collect();
        let (avg_vol, std_vol) = mean_stddev(&volumes);

        let abs_changes: Vec<f64> = hourly_prices
            .values()
            .map(|(_, first_p, _, last_p)| (last_p - first_p).abs())
            .collect();
        let (avg_change, std_change) = mean_stddev(&abs_changes);

        let window_hours = self.config.window_ms as f64 / MS_PER_HOUR as f64;
        let baseline = MarketBaseline {
            avg_trade_size: avg_size,
            stddev_trade_size: std_size,
            median_trade_size: median_size,
            avg_hourly_volume: avg_vol,
            stddev_hourly_volume: std_vol,
            avg_abs_hourly_price_change: avg_change,
            stddev_abs_hourly_price_change: std_change,
            trades_per_hour: sizes.len() as f64 / window_hours,
            first_trade_ms: first_ts,
            last_trade_ms: last_ts,
            sample_count: sizes.len(),
        };

        self.baselines.insert(market_id.to_string(), baseline);
    }

    /// Whether a market has enough history to answer queries.
    pub fn is_ready(&self, market_id: &str) -> bool {
        self.baselines
            .get(market_id)
            .is_some_and(|b| b.sample_count >= self.config.min_samples)
    }

    fn ready(&self, market_id: &str) -> Option<&MarketBaseline> {
        self.baselines
            .get(market_id)
            .filter(|b| b.sample_count >= self.config.min_samples)
    }

    /// Z-score of a trade's USD size against the market's distribution.
    pub fn trade_size_z(&self, market_id: &str, size_usd: f64) -> Option<f64> {
        let b = self.ready(market_id)?;
        if b.stddev_trade_size == 0.0 {
            return None;
        }
        Some((size_usd - b.avg_trade_size) / b.stddev_trade_size)
    }

    /// Expected volume over a window, scaled from the hourly average.
    pub fn expected_volume(&self, market_id: &str, window_ms: i64) -> Option<f64> {
        let b = self.ready(market_id)?;
        let scale = window_ms as f64 / MS_PER_HOUR as f64;
        Some(b.avg_hourly_volume * scale)
    }

    /// Z-score of an observed window volume; expected value and deviation
    /// both scale with the window length.
    pub fn volume_z(&self, market_id: &str, observed: f64, window_ms: i64) -> Option<f64> {
        let b = self.ready(market_id)?;
        let scale = window_ms as f64 / MS_PER_HOUR as f64;
        let expected = b.avg_hourly_volume * scale;
        let stddev = b.stddev_hourly_volume * scale;
        if stddev == 0.0 {
            return None;
        }
        Some((observed - expected) / stddev)
    }

    /// Observed-over-expected volume multiple.
    pub fn volume_multiple(&self, market_id: &str, observed: f64, window_ms: i64) -> Option<f64> {
        let expected = self.expected_volume(market_id, window_ms)?;
        if expected == 0.0 {
            return None;
        }
        Some(observed / expected)
    }

    /// Z-score of an absolute price change against the hourly distribution.
    pub fn price_change_z(&self, market_id: &str, delta: f64) -> Option<f64> {
        let b = self.ready(market_id)?;
        if b.stddev_abs_hourly_price_change == 0.0 {
            return None;
        }
        Some((delta.abs() - b.avg_abs_hourly_price_change) / b.stddev_abs_hourly_price_change)
    }

    /// The raw baseline for a market, ready or not.
    pub fn baseline(&self, market_id: &str) -> Option<&MarketBaseline> {
        self.baselines.get(market_id)
    }

    /// Number of markets with a baseline.
    pub fn market_count(&self) -> usize {
        self.baselines.len()
    }
}

impl Default for BaselineCalculator {
    fn default() -> Self {
        Self::new(BaselineConfig::default())
    }
}

/// Mean and population standard deviation.
fn mean_stddev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Median of a mutable slice (sorted in place).
fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
