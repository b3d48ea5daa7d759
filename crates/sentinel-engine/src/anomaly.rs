//! Anomaly detection over the live trade feed.
//!
//! Four detectors run against every trade **in a fixed order**:
//!
//! 1. Unusual low-price BUY (percentile rank of the size)
//! 2. Large trade (absolute size + baseline z-score)
//! 3. Volume spike (windowed volume vs baseline expectation)
//! 4. Rapid price move (windowed price change)
//!
//! The low-price detector feeds the percentile tracker on every trade, alert
//! or not, so history accrues from the first trade. Detection is pure with
//! respect to its inputs; the orchestrator owns the stores.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use sentinel_common::{ImpliedDirection, Market, Severity, Side, Trade};

use crate::baseline::BaselineCalculator;
use crate::market_stats::PercentileTracker;
use crate::trade_store::TradeStore;

/// Detection thresholds; defaults match the service's documented knobs.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub large_trade_min: Decimal,
    pub large_trade_high: Decimal,
    pub large_trade_critical: Decimal,

    pub volume_spike_window_ms: i64,
    pub volume_spike_low: f64,
    pub volume_spike_high: f64,
    pub volume_spike_critical: f64,

    pub price_window_ms: i64,
    pub price_change_low: Decimal,
    pub price_change_high: Decimal,
    pub price_change_critical: Decimal,

    pub z_score_low: f64,
    pub z_score_high: f64,
    pub z_score_critical: f64,

    /// Minimum severity an anomaly needs to be emitted.
    pub min_severity: Severity,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            large_trade_min: Decimal::new(5_000, 0),
            large_trade_high: Decimal::new(10_000, 0),
            large_trade_critical: Decimal::new(25_000, 0),

            volume_spike_window_ms: 300_000,
            volume_spike_low: 5.0,
            volume_spike_high: 10.0,
            volume_spike_critical: 20.0,

            price_window_ms: 300_000,
            price_change_low: Decimal::new(5, 2),       // 0.05
            price_change_high: Decimal::new(10, 2),     // 0.10
            price_change_critical: Decimal::new(20, 2), // 0.20

            z_score_low: 2.0,
            z_score_high: 3.0,
            z_score_critical: 4.0,

            min_severity: Severity::Medium,
        }
    }
}

/// Anomaly kind tag; also the dedup key component and stats bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyKind {
    UnusualLowPriceBuy,
    LargeTrade,
    VolumeSpike,
    RapidPriceMove,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::UnusualLowPriceBuy => "UNUSUAL_LOW_PRICE_BUY",
            AnomalyKind::LargeTrade => "LARGE_TRADE",
            AnomalyKind::VolumeSpike => "VOLUME_SPIKE",
            AnomalyKind::RapidPriceMove => "RAPID_PRICE_MOVE",
        }
    }
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Variant-specific detail payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyDetails {
    UnusualLowPriceBuy {
        trade_size: Decimal,
        percentile: f64,
        rank: usize,
        total_trades: usize,
        median_size: Decimal,
    },
    LargeTrade {
        size_usd: Decimal,
        z_score: Option<f64>,
    },
    VolumeSpike {
        window_volume: Decimal,
        multiple: f64,
        z_score: Option<f64>,
    },
    RapidPriceMove {
        price_start: Decimal,
        price_end: Decimal,
        change_percent: Decimal,
        z_score: Option<f64>,
    },
}

impl AnomalyDetails {
    pub fn kind(&self) -> AnomalyKind {
        match self {
            AnomalyDetails::UnusualLowPriceBuy { .. } => AnomalyKind::UnusualLowPriceBuy,
            AnomalyDetails::LargeTrade { .. } => AnomalyKind::LargeTrade,
            AnomalyDetails::VolumeSpike { .. } => AnomalyKind::VolumeSpike,
            AnomalyDetails::RapidPriceMove { .. } => AnomalyKind::RapidPriceMove,
        }
    }
}

/// A detected anomaly: common header plus the variant payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub market_id: String,
    /// Question text snapshot at detection time.
    pub question: String,
    pub severity: Severity,
    pub timestamp_ms: i64,
    pub current_price: Decimal,
    pub direction: ImpliedDirection,
    /// The trade that triggered detection, where one did.
    pub trade: Option<Trade>,
    pub details: AnomalyDetails,
}

impl Anomaly {
    pub fn kind(&self) -> AnomalyKind {
        self.details.kind()
    }
}

/// Outcome of running the detector chain for one trade.
#[derive(Debug)]
pub struct TradeAssessment {
    /// Anomalies that cleared the minimum severity, in detector order.
    pub anomalies: Vec<Anomaly>,
    /// Everything the detectors fired, pre-filter. The baseline only absorbs
    /// a trade when this is zero.
    pub detected: usize,
}

/// The detector chain.
#[derive(Debug)]
pub struct AnomalyEngine {
    config: DetectorConfig,
}

impl AnomalyEngine {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Does an anomaly clear the configured floor?
    pub fn meets_min_severity(&self, anomaly: &Anomaly) -> bool {
        anomaly.severity >= self.config.min_severity
    }

    /// Run all four detectors against a trade, in order.
    pub fn assess(
        &self,
        trade: &Trade,
        market: &Market,
        store: &TradeStore,
        baseline: &BaselineCalculator,
        tracker: &mut PercentileTracker,
    ) -> TradeAssessment {
        let mut detected = Vec::new();

        if let Some(a) = self.detect_low_price_buy(trade, market, tracker) {
            detected.push(a);
        }
        if let Some(a) = self.detect_large_trade(trade, market, baseline) {
            detected.push(a);
        }
        if let Some(a) = self.detect_volume_spike(trade, market, store, baseline) {
            detected.push(a);
        }
        if let Some(a) = self.detect_rapid_price_move(trade, market, store, baseline) {
            detected.push(a);
        }

        let total = detected.len();
        let anomalies = detected
            .into_iter()
            .filter(|a| self.meets_min_severity(a))
            .collect();

        TradeAssessment {
            anomalies,
            detected: total,
        }
    }

    /// Detector 1: unusual low-price BUY. Always feeds the tracker.
    fn detect_low_price_buy(
        &self,
        trade: &Trade,
        market: &Market,
        tracker: &mut PercentileTracker,
    ) -> Option<Anomaly> {
        let size_usd = trade.usd_size();

        // Record first, then rank: the trade is part of its own distribution,
        // and history accrues even when nothing alerts.
        tracker.add_trade(&trade.market_id, size_usd, trade.price, trade.side);
        let result = tracker.should_alert(&trade.market_id, size_usd, trade.price, trade.side)?;

        Some(Anomaly {
            market_id: trade.market_id.clone(),
            question: market.question.clone(),
            severity: result.severity,
            timestamp_ms: trade.timestamp_ms,
            current_price: trade.price,
            direction: ImpliedDirection::Yes,
            trade: Some(trade.clone()),
            details: AnomalyDetails::UnusualLowPriceBuy {
                trade_size: size_usd,
                percentile: result.percentile,
                rank: result.rank,
                total_trades: result.total,
                median_size: result.median,
            },
        })
    }

    /// Detector 2: large trade by absolute size, escalated by z-score.
    fn detect_large_trade(
        &self,
        trade: &Trade,
        market: &Market,
        baseline: &BaselineCalculator,
    ) -> Option<Anomaly> {
        let size_usd = trade.usd_size();
        if size_usd < self.config.large_trade_min {
            return None;
        }

        let z = baseline.trade_size_z(&trade.market_id, size_usd.to_f64().unwrap_or(0.0));

        let severity = if size_usd >= self.config.large_trade_critical {
            Severity::Critical
        } else if size_usd >= self.config.large_trade_high {
            Severity::High
        } else if z.is_some_and(|z| z >= self.config.z_score_high) {
            Severity::High
        } else {
            Severity::Medium
        };

        let direction = match trade.side {
            Side::Buy => ImpliedDirection::Yes,
            Side::Sell => ImpliedDirection::No,
        };

        Some(Anomaly {
            market_id: trade.market_id.clone(),
            question: market.question.clone(),
            severity,
            timestamp_ms: trade.timestamp_ms,
            current_price: trade.price,
            direction,
            trade: Some(trade.clone()),
            details: AnomalyDetails::LargeTrade {
                size_usd,
                z_score: z,
            },
        })
    }

    /// Detector 3: volume spike against the baseline expectation.
    fn detect_volume_spike(
        &self,
        trade: &Trade,
        market: &Market,
        store: &TradeStore,
        baseline: &BaselineCalculator,
    ) -> Option<Anomaly> {
        if !baseline.is_ready(&trade.market_id) {
            return None;
        }

        let window_ms = self.config.volume_spike_window_ms;
        let window_volume = store.volume_in_window(&trade.market_id, window_ms);
        let observed = window_volume.to_f64().unwrap_or(0.0);

        let multiple = baseline.volume_multiple(&trade.market_id, observed, window_ms)?;
        if multiple < self.config.volume_spike_low {
            return None;
        }

        let z = baseline.volume_z(&trade.market_id, observed, window_ms);

        let severity = if multiple >= self.config.volume_spike_critical {
            Severity::Critical
        } else if multiple >= self.config.volume_spike_high {
            Severity::High
        } else if z.is_some_and(|z| z >= self.config.z_score_high) {
            Severity::High
        } else {
            Severity::Medium
        };

        Some(Anomaly {
            market_id: trade.market_id.clone(),
            question: market.question.clone(),
            severity,
            timestamp_ms: trade.timestamp_ms,
            current_price: trade.price,
            direction: window_flow_direction(store, &trade.market_id, window_ms),
            trade: Some(trade.clone()),
            details: AnomalyDetails::VolumeSpike {
                window_volume,
                multiple,
                z_score: z,
            },
        })
    }

    /// Detector 4: rapid price move inside the price window.
    fn detect_rapid_price_move(
        &self,
        trade: &Trade,
        market: &Market,
        store: &TradeStore,
        baseline: &BaselineCalculator,
    ) -> Option<Anomaly> {
        let change = store.price_change_in_window(&trade.market_id, self.config.price_window_ms)?;
        let magnitude = change.delta_percent.abs();
        if magnitude < self.config.price_change_low {
            return None;
        }

        let z = baseline.price_change_z(&trade.market_id, change.delta.to_f64().unwrap_or(0.0));

        let severity = if magnitude >= self.config.price_change_critical {
            Severity::Critical
        } else if magnitude >= self.config.price_change_high {
            Severity::High
        } else if z.is_some_and(|z| z >= self.config.z_score_high) {
            Severity::High
        } else {
            Severity::Medium
        };

        let direction = if change.delta > Decimal::ZERO {
            ImpliedDirection::Yes
        } else {
            ImpliedDirection::No
        };

        Some(Anomaly {
            market_id: trade.market_id.clone(),
            question: market.question.clone(),
            severity,
            timestamp_ms: trade.timestamp_ms,
            current_price: trade.price,
            direction,
            trade: Some(trade.clone()),
            details: AnomalyDetails::RapidPriceMove {
                price_start: change.start,
                price_end: change.end,
                change_percent: change.delta_percent,
                z_score: z,
            },
        })
    }
}

impl Default for AnomalyEngine {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

/// Infer YES/NO pressure from net BUY vs SELL notional inside the window.
/// A 1.5x skew is required either way; anything closer is UNKNOWN.
fn window_flow_direction(store: &TradeStore, market_id: &str, window_ms: i64) -> ImpliedDirection {
    let mut buy = Decimal::ZERO;
    let mut sell = Decimal::ZERO;
    for trade in store.recent_trades(market_id, window_ms) {
        match trade.side {
            Side::Buy => buy += trade.usd_size(),
            Side::Sell => sell += trade.usd_size(),
        }
    }

    let skew = Decimal::new(15, 1); // 1.5
    if buy > sell * skew {
        ImpliedDirection::Yes
    } else if sell > buy * skew {
        ImpliedDirection::No
    } else {
        ImpliedDirection::Unknown
    }
}
