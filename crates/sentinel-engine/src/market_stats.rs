//! Per-market percentile tracking for low-price BUY flow.
//!
//! Keeps a sorted multiset of the USD sizes of BUY trades executed below the
//! low-price threshold, alongside a FIFO ring of the last `max_samples` raw
//! trades so evicted entries leave the multiset too. Insert, remove, and
//! rank queries are all binary searches on a sorted vec, which is plenty up
//! to the 10k sample cap.

use std::collections::{HashMap, VecDeque};

use rust_decimal::Decimal;

use sentinel_common::{Severity, Side};

/// Configuration for the percentile tracker.
#[derive(Debug, Clone)]
pub struct PercentileConfig {
    /// Only BUY trades strictly below this price are tracked.
    pub low_price_threshold: Decimal,
    /// Percentile boundaries for the severity ladder.
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    /// Ring capacity per market.
    pub max_samples: usize,
    /// Minimum tracked samples before queries answer.
    pub min_samples: usize,
}

impl Default for PercentileConfig {
    fn default() -> Self {
        Self {
            low_price_threshold: Decimal::new(25, 2), // 0.25
            p90: 0.90,
            p95: 0.95,
            p99: 0.99,
            max_samples: 10_000,
            min_samples: 50,
        }
    }
}

/// One entry in the recent-trade ring.
#[derive(Debug, Clone, Copy)]
struct RecentTrade {
    size_usd: Decimal,
    /// Whether this trade's size lives in the sorted multiset.
    tracked: bool,
}

/// Per-market state: sorted sizes + recent ring.
#[derive(Debug, Default)]
struct MarketState {
    /// Ascending USD sizes of tracked low-price BUYs.
    sorted_sizes: Vec<Decimal>,
    recent: VecDeque<RecentTrade>,
}

/// Result of a percentile query for one trade size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentileResult {
    /// Fraction of tracked sizes strictly smaller than the queried size.
    pub percentile: f64,
    /// 1-based rank from the top: 1 means the largest seen.
    pub rank: usize,
    /// Number of tracked samples.
    pub total: usize,
    /// Median tracked size.
    pub median: Decimal,
    pub severity: Severity,
}

/// Reported p90/p95/p99 boundary sizes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentileThresholds {
    pub p90: Decimal,
    pub p95: Decimal,
    pub p99: Decimal,
}

/// Tracker over the distribution of low-price BUY sizes per market.
#[derive(Debug)]
pub struct PercentileTracker {
    config: PercentileConfig,
    markets: HashMap<String, MarketState>,
}

impl PercentileTracker {
    pub fn new(config: PercentileConfig) -> Self {
        Self {
            config,
            markets: HashMap::new(),
        }
    }

    /// Record a trade. Low-price BUYs enter the sorted multiset; everything
    /// enters the ring, and ring eviction removes tracked sizes again.
    pub fn add_trade(&mut self, market_id: &str, size_usd: Decimal, price: Decimal, side: Side) {
        let tracked = side == Side::Buy && price < self.config.low_price_threshold;
        let state = self.markets.entry(market_id.to_string()).or_default();

        if tracked {
            let idx = state.sorted_sizes.partition_point(|s| *s < size_usd);
            state.sorted_sizes.insert(idx, size_usd);
        }

        state.recent.push_back(RecentTrade { size_usd, tracked });

        if state.recent.len() > self.config.max_samples {
            if let Some(evicted) = state.recent.pop_front() {
                if evicted.tracked {
                    let idx = state
                        .sorted_sizes
                        .partition_point(|s| *s < evicted.size_usd);
                    // The element at idx equals the evicted size unless the
                    // multiset drifted, which would be a bug upstream.
                    if state.sorted_sizes.get(idx) == Some(&evicted.size_usd) {
                        state.sorted_sizes.remove(idx);
                    }
                }
            }
        }
    }

    /// Rank `size_usd` against the tracked distribution. `None` until the
    /// market has `min_samples` tracked sizes.
    pub fn percentile(&self, market_id: &str, size_usd: Decimal) -> Option<PercentileResult> {
        let state = self.markets.get(market_id)?;
        let total = state.sorted_sizes.len();
        if total < self.config.min_samples {
            return None;
        }

        let smaller = state.sorted_sizes.partition_point(|s| *s < size_usd);
        let percentile = smaller as f64 / total as f64;
        let rank = total - smaller;

        let severity = if percentile >= self.config.p99 {
            Severity::Critical
        } else if percentile >= self.config.p95 {
            Severity::High
        } else if percentile >= self.config.p90 {
            Severity::Medium
        } else {
            return Some(PercentileResult {
                percentile,
                rank,
                total,
                median: state.sorted_sizes[total / 2],
                severity: Severity::Low,
            });
        };

        Some(PercentileResult {
            percentile,
            rank,
            total,
            median: state.sorted_sizes[total / 2],
            severity,
        })
    }

    /// Alert decision for one trade: answers only for low-price BUYs whose
    /// size clears the p90 ladder.
    pub fn should_alert(
        &self,
        market_id: &str,
        size_usd: Decimal,
        price: Decimal,
        side: Side,
    ) -> Option<PercentileResult> {
        if side != Side::Buy || price >= self.config.low_price_threshold {
            return None;
        }
        let result = self.percentile(market_id, size_usd)?;
        if result.percentile >= self.config.p90 {
            Some(result)
        } else {
            None
        }
    }

    /// The p90/p95/p99 boundary elements of a market's distribution.
    pub fn thresholds(&self, market_id: &str) -> Option<PercentileThresholds> {
        let state = self.markets.get(market_id)?;
        let n = state.sorted_sizes.len();
        if n < self.config.min_samples {
            return None;
        }

        let at = |q: f64| {
            let idx = ((n as f64 * q) as usize).min(n - 1);
            state.sorted_sizes[idx]
        };

        Some(PercentileThresholds {
            p90: at(self.config.p90),
            p95: at(self.config.p95),
            p99: at(self.config.p99),
        })
    }

    /// Number of tracked (low-price BUY) samples for a market.
    pub fn tracked_count(&self, market_id: &str) -> usize {
        self.markets
            .get(market_id)
            .map(|s| s.sorted_sizes.len())
            .unwrap_or(0)
    }
}

impl Default for PercentileTracker {
    fn default() -> Self {
        Self::new(PercentileConfig::default())
    }
}
