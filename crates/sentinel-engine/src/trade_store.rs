//! Bounded per-market sliding window of trades.
//!
//! Keeps each market's recent trades and a parallel price-history sequence,
//! and answers windowed aggregate queries against either wall-clock time or
//! a caller-supplied simulated clock (for tape replay).
//!
//! Unknown markets are silent no-ops: writes create the window, reads return
//! empty aggregates.

use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::Decimal;

use sentinel_common::Trade;

/// Configuration for the trade store.
#[derive(Debug, Clone)]
pub struct TradeStoreConfig {
    /// Window size in milliseconds; trades older than this are evicted.
    pub window_ms: i64,
    /// Run eviction every N insertions per market.
    pub cleanup_every: usize,
}

impl Default for TradeStoreConfig {
    fn default() -> Self {
        Self {
            window_ms: 86_400_000, // 24h, matches the baseline retention
            cleanup_every: 100,
        }
    }
}

/// A single price observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub timestamp_ms: i64,
    pub price: Decimal,
}

/// Price movement across a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceChange {
    pub start: Decimal,
    pub end: Decimal,
    pub delta: Decimal,
    /// Delta relative to the window's starting price.
    pub delta_percent: Decimal,
}

/// Per-market window state.
#[derive(Debug, Default)]
struct MarketWindow {
    trades: Vec<Trade>,
    prices: Vec<PricePoint>,
    inserts_since_cleanup: usize,
}

/// Per-market bounded sliding windows with replay-friendly time.
#[derive(Debug)]
pub struct TradeStore {
    config: TradeStoreConfig,
    windows: HashMap<String, MarketWindow>,
    /// When set, all windowed reads and evictions use this clock.
    simulated_time_ms: Option<i64>,
}

impl TradeStore {
    pub fn new(config: TradeStoreConfig) -> Self {
        Self {
            config,
            windows: HashMap::new(),
            simulated_time_ms: None,
        }
    }

    /// Pin "now" to a simulated timestamp for replay. `None` restores the
    /// wall clock.
    pub fn set_simulated_time(&mut self, timestamp_ms: Option<i64>) {
        self.simulated_time_ms = timestamp_ms;
    }

    /// The store's current notion of now, epoch milliseconds.
    pub fn now_ms(&self) -> i64 {
        self.simulated_time_ms
            .unwrap_or_else(|| Utc::now().timestamp_millis())
    }

    /// Append a trade to its market's window. Every `cleanup_every`
    /// insertions the window is trimmed against the current clock.
    pub fn add(&mut self, trade: Trade) {
        let cutoff = self.now_ms() - self.config.window_ms;
        let window = self.windows.entry(trade.market_id.clone()).or_default();

        window.prices.push(PricePoint {
            timestamp_ms: trade.timestamp_ms,
            price: trade.price,
        });
        window.trades.push(trade);
        window.inserts_since_cleanup += 1;

        if window.inserts_since_cleanup >= self.config.cleanup_every {
            window.trades.retain(|t| t.timestamp_ms >= cutoff);
            window.prices.retain(|p| p.timestamp_ms >= cutoff);
            window.inserts_since_cleanup = 0;
        }
    }

    /// Append a batch, restore chronological order, and trim once.
    pub fn bulk_add(&mut self, market_id: &str, trades: Vec<Trade>) {
        if trades.is_empty() {
            return;
        }

        let cutoff = self.now_ms() - self.config.window_ms;
        let window = self.windows.entry(market_id.to_string()).or_default();

        for trade in trades {
            window.prices.push(PricePoint {
                timestamp_ms: trade.timestamp_ms,
                price: trade.price,
            });
            window.trades.push(trade);
        }

        window.trades.sort_by_key(|t| t.timestamp_ms);
        window.prices.sort_by_key(|p| p.timestamp_ms);
        window.trades.retain(|t| t.timestamp_ms >= cutoff);
        window.prices.retain(|p| p.timestamp_ms >= cutoff);
        window.inserts_since_cleanup = 0;
    }

    /// Trim every market's window against the current clock and drop
    /// markets whose windows emptied out.
    pub fn cleanup(&mut self) {
        let cutoff = self.now_ms() - self.config.window_ms;
        for window in self.windows.values_mut() {
            window.trades.retain(|t| t.timestamp_ms >= cutoff);
            window.prices.retain(|p| p.timestamp_ms >= cutoff);
            window.inserts_since_cleanup = 0;
        }
        self.windows.retain(|_, w| !w.trades.is_empty());
    }

    /// Trades for `market_id` newer than `now - duration_ms`, oldest first.
    pub fn recent_trades(&self, market_id: &str, duration_ms: i64) -> Vec<&Trade> {
        let cutoff = self.now_ms() - duration_ms;
        self.windows
            .get(market_id)
            .map(|w| {
                let start = w.trades.partition_point(|t| t.timestamp_ms < cutoff);
                w.trades[start..].iter().collect()
            })
            .unwrap_or_default()
    }

    /// All trades currently retained for a market, oldest first.
    pub fn all_trades(&self, market_id: &str) -> Vec<&Trade> {
        self.windows
            .get(market_id)
            .map(|w| w.trades.iter().collect())
            .unwrap_or_default()
    }

    /// USD volume traded in the window.
    pub fn volume_in_window(&self, market_id: &str, duration_ms: i64) -> Decimal {
        self.recent_trades(market_id, duration_ms)
            .iter()
            .map(|t| t.usd_size())
            .sum()
    }

    /// Trade count in the window.
    pub fn trade_count_in_window(&self, market_id: &str, duration_ms: i64) -> usize {
        self.recent_trades(market_id, duration_ms).len()
    }

    /// Price movement across the window, or `None` with fewer than two
    /// price points in it.
    pub fn price_change_in_window(&self, market_id: &str, duration_ms: i64) -> Option<PriceChange> {
        let cutoff = self.now_ms() - duration_ms;
        let window = self.windows.get(market_id)?;
        let start_idx = window.prices.partition_point(|p| p.timestamp_ms < cutoff);
        let points = &window.prices[start_idx..];

        if points.len() < 2 {
            return None;
        }

        let start = points.first()?.price;
        let end = points.last()?.price;
        let delta = end - start;
        let delta_percent = if start.is_zero() {
            Decimal::ZERO
        } else {
            delta / start
        };

        Some(PriceChange {
            start,
            end,
            delta,
            delta_percent,
        })
    }

    /// Latest observed price for a market.
    pub fn latest_price(&self, market_id: &str) -> Option<Decimal> {
        self.windows
            .get(market_id)
            .and_then(|w| w.prices.last())
            .map(|p| p.price)
    }

    /// (min, max) price observed inside the window.
    pub fn price_range_in_window(
        &self,
        market_id: &str,
        duration_ms: i64,
    ) -> Option<(Decimal, Decimal)> {
        let cutoff = self.now_ms() - duration_ms;
        let window = self.windows.get(market_id)?;
        let start_idx = window.prices.partition_point(|p| p.timestamp_ms < cutoff);
        let points = &window.prices[start_idx..];

        if points.is_empty() {
            return None;
        }

        let mut min = points[0].price;
        let mut max = points[0].price;
        for p in points {
            min = min.min(p.price);
            max = max.max(p.price);
        }
        Some((min, max))
    }

    /// Number of markets with at least one retained trade.
    pub fn market_count(&self) -> usize {
        self.windows.len()
    }

    /// Total retained trades across all markets.
    pub fn total_trades(&self) -> usize {
        self.windows.values().map(|w| w.trades.len()).sum()
    }
}

impl Default for TradeStore {
    fn default() -> Self {
        Self::new(TradeStoreConfig::default())
    }
}
