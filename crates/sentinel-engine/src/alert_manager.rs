//! Alert routing: dedup, rate limiting, formatting, delivery.
//!
//! One anomaly in, at most one notification out. A per-(market, kind)
//! cooldown suppresses repeats, a global hourly cap bounds the outbound
//! rate, and only a *delivered* alert updates the dedup clock and lands in
//! the store; a failed send leaves the way open for a retry on the next
//! anomaly.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use sentinel_common::{Market, Notifier, NotifyError, Severity};

use crate::alert_store::AlertStore;
use crate::anomaly::{Anomaly, AnomalyDetails};

/// Configuration for the alert manager.
#[derive(Debug, Clone)]
pub struct AlertManagerConfig {
    /// Minimum interval between alerts for the same (market, kind).
    pub cooldown_ms: i64,
    /// Maximum alerts per rolling hour, all markets combined.
    pub max_alerts_per_hour: u32,
}

impl Default for AlertManagerConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 300_000,
            max_alerts_per_hour: 20,
        }
    }
}

/// Routes anomalies to the notifier and the alert store.
pub struct AlertManager {
    config: AlertManagerConfig,
    notifier: Arc<dyn Notifier>,
    /// Last delivery time per `market:kind`.
    last_sent: HashMap<String, i64>,
    hourly_count: u32,
    hour_started_ms: i64,
}

impl AlertManager {
    pub fn new(config: AlertManagerConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            config,
            notifier,
            last_sent: HashMap::new(),
            hourly_count: 0,
            hour_started_ms: Utc::now().timestamp_millis(),
        }
    }

    /// Alerts counted in the current hourly window.
    pub fn alerts_this_hour(&self) -> u32 {
        self.hourly_count
    }

    /// Try to deliver an anomaly. Returns `Ok(true)` when the alert went
    /// out and was stored, `Ok(false)` when suppressed, and `Err` when the
    /// notifier failed (dedup state untouched).
    pub async fn send(
        &mut self,
        anomaly: &Anomaly,
        market: &Market,
        store: &mut AlertStore,
    ) -> Result<bool, NotifyError> {
        let now_ms = Utc::now().timestamp_millis();
        let key = format!("{}:{}", anomaly.market_id, anomaly.kind());

        if let Some(last) = self.last_sent.get(&key) {
            if now_ms - last < self.config.cooldown_ms {
                debug!(key = %key, "Alert suppressed by cooldown");
                return Ok(false);
            }
        }

        if now_ms - self.hour_started_ms > 3_600_000 {
            self.hourly_count = 0;
            self.hour_started_ms = now_ms;
        }
        if self.hourly_count >= self.config.max_alerts_per_hour {
            warn!(
                "Hourly alert cap reached ({}), dropping {} for {}",
                self.config.max_alerts_per_hour,
                anomaly.kind(),
                anomaly.market_id
            );
            return Ok(false);
        }

        let message = format_alert(anomaly, market);
        self.notifier.send(&message).await?;

        self.hourly_count += 1;
        self.last_sent.insert(key, now_ms);
        store.add(anomaly);
        Ok(true)
    }
}

/// Severity marker used in message headers.
fn severity_marker(severity: Severity) -> &'static str {
    match severity {
        Severity::Low => "[low]",
        Severity::Medium => "[medium]",
        Severity::High => "[HIGH]",
        Severity::Critical => "[CRITICAL]",
    }
}

/// Render one alert message. Formatting never fails: absent numbers render
/// as `?` or 0 rather than aborting delivery.
pub fn format_alert(anomaly: &Anomaly, market: &Market) -> String {
    let marker = severity_marker(anomaly.severity);
    let question = if anomaly.question.is_empty() {
        "?"
    } else {
        &anomaly.question
    };
    let link = market
        .slug
        .as_deref()
        .map(|s| format!("https://polymarket.com/event/{}", s))
        .unwrap_or_else(|| format!("market {}", anomaly.market_id));

    let body = match &anomaly.details {
        AnomalyDetails::UnusualLowPriceBuy {
            trade_size,
            percentile,
            rank,
            total_trades,
            median_size,
        } => format!(
            "Unusual low-price buy: ${:.0} at {} (top {:.1}% of {} low-price buys, rank #{}, median ${:.0})",
            trade_size,
            anomaly.current_price,
            (1.0 - percentile) * 100.0,
            total_trades,
            rank,
            median_size,
        ),
        AnomalyDetails::LargeTrade { size_usd, z_score } => format!(
            "Large trade: ${:.0} {} at {} (z={})",
            size_usd,
            anomaly
                .trade
                .as_ref()
                .map(|t| t.side.to_string())
                .unwrap_or_else(|| "?".to_string()),
            anomaly.current_price,
            z_score
                .map(|z| format!("{:.1}", z))
                .unwrap_or_else(|| "?".to_string()),
        ),
        AnomalyDetails::VolumeSpike {
            window_volume,
            multiple,
            z_score,
        } => format!(
            "Volume spike: ${:.0} in window, {:.1}x expected (z={})",
            window_volume,
            multiple,
            z_score
                .map(|z| format!("{:.1}", z))
                .unwrap_or_else(|| "?".to_string()),
        ),
        AnomalyDetails::RapidPriceMove {
            price_start,
            price_end,
            change_percent,
            ..
        } => format!(
            "Rapid price move: {} -> {} ({:.1}%)",
            price_start,
            price_end,
            change_percent * rust_decimal::Decimal::from(100),
        ),
    };

    format!(
        "{} {} | {}\n{}\nimplied: {}",
        marker,
        anomaly.kind(),
        question,
        body,
        anomaly.direction,
    )
    + &format!("\n{}", link)
}
