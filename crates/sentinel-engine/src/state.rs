//! Shared engine counters.
//!
//! Lock-free atomics updated from the receive loop and read by the health
//! endpoint and the periodic stats log. Point-in-time lag between writers
//! and readers is acceptable.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// Counters shared between the orchestrator and read-only surfaces.
#[derive(Debug)]
pub struct EngineState {
    started_at_ms: i64,
    /// Markets currently monitored.
    pub markets_monitored: AtomicU64,
    /// Trades accepted into the store.
    pub trades_seen: AtomicU64,
    /// Events dropped for schema reasons (missing side, bad numbers).
    pub events_dropped: AtomicU64,
    /// Anomalies the detectors fired, pre-severity-filter.
    pub anomalies_detected: AtomicU64,
    /// Anomalies that cleared the severity floor.
    pub anomalies_emitted: AtomicU64,
    /// Alerts delivered.
    pub alerts_sent: AtomicU64,
    /// Alerts counted in the manager's current hourly window (gauge).
    pub alerts_this_hour: AtomicU64,
    /// Alerts suppressed by cooldown or the hourly cap.
    pub alerts_suppressed: AtomicU64,
    /// WebSocket reconnects.
    pub reconnects: AtomicU64,
}

impl EngineState {
    pub fn new() -> Self {
        Self {
            started_at_ms: Utc::now().timestamp_millis(),
            markets_monitored: AtomicU64::new(0),
            trades_seen: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            anomalies_detected: AtomicU64::new(0),
            anomalies_emitted: AtomicU64::new(0),
            alerts_sent: AtomicU64::new(0),
            alerts_this_hour: AtomicU64::new(0),
            alerts_suppressed: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }

    pub fn uptime_ms(&self) -> i64 {
        Utc::now().timestamp_millis() - self.started_at_ms
    }

    pub fn snapshot(&self) -> EngineStateSnapshot {
        EngineStateSnapshot {
            uptime_ms: self.uptime_ms(),
            markets_monitored: self.markets_monitored.load(Ordering::Relaxed),
            trades_seen: self.trades_seen.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            anomalies_detected: self.anomalies_detected.load(Ordering::Relaxed),
            anomalies_emitted: self.anomalies_emitted.load(Ordering::Relaxed),
            alerts_sent: self.alerts_sent.load(Ordering::Relaxed),
            alerts_this_hour: self.alerts_this_hour.load(Ordering::Relaxed),
            alerts_suppressed: self.alerts_suppressed.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

impl Default for EngineState {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct EngineStateSnapshot {
    pub uptime_ms: i64,
    pub markets_monitored: u64,
    pub trades_seen: u64,
    pub events_dropped: u64,
    pub anomalies_detected: u64,
    pub anomalies_emitted: u64,
    pub alerts_sent: u64,
    pub alerts_this_hour: u64,
    pub alerts_suppressed: u64,
    pub reconnects: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let state = EngineState::new();
        state.trades_seen.fetch_add(3, Ordering::Relaxed);
        state.alerts_sent.fetch_add(1, Ordering::Relaxed);

        let snap = state.snapshot();
        assert_eq!(snap.trades_seen, 3);
        assert_eq!(snap.alerts_sent, 1);
        assert!(snap.uptime_ms >= 0);
    }
}
