//! Append-only bounded log of emitted alerts.
//!
//! Newest-first in memory, truncated at `max_alerts`; summary statistics are
//! recomputed on every write. The on-disk JSON snapshot is written atomically
//! (temp file, fsync, rename) so a crash never leaves a half-written file.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use sentinel_common::{ImpliedDirection, Severity};

use crate::anomaly::{Anomaly, AnomalyKind};

/// Errors from the alert store's disk snapshot.
#[derive(Debug, Error)]
pub enum AlertStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration for the alert store.
#[derive(Debug, Clone)]
pub struct AlertStoreConfig {
    /// Maximum alerts retained in memory and in the snapshot.
    pub max_alerts: usize,
    /// Snapshot file path.
    pub snapshot_path: PathBuf,
}

impl Default for AlertStoreConfig {
    fn default() -> Self {
        Self {
            max_alerts: 500,
            snapshot_path: PathBuf::from("data/smart-money-alerts.json"),
        }
    }
}

/// A persisted alert: the anomaly header, normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAlert {
    /// Stable id: `{market}:{type}:{timestamp}`.
    pub id: String,
    pub market_id: String,
    pub question: String,
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub timestamp_ms: i64,
    pub current_price: String,
    pub direction: ImpliedDirection,
    /// Post-hoc outcome annotation, when backfilled offline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}

impl StoredAlert {
    pub fn from_anomaly(anomaly: &Anomaly) -> Self {
        let kind = anomaly.kind();
        Self {
            id: format!("{}:{}:{}", anomaly.market_id, kind, anomaly.timestamp_ms),
            market_id: anomaly.market_id.clone(),
            question: anomaly.question.clone(),
            kind,
            severity: anomaly.severity,
            timestamp_ms: anomaly.timestamp_ms,
            current_price: anomaly.current_price.to_string(),
            direction: anomaly.direction,
            outcome: None,
        }
    }
}

/// Aggregate statistics over the retained alerts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertStats {
    pub by_type: HashMap<String, u64>,
    pub by_severity: HashMap<String, u64>,
    pub last_24h: u64,
    pub last_7d: u64,
}

/// Snapshot document layout on disk.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotDoc {
    last_updated: String,
    total_alerts: u64,
    alerts: Vec<StoredAlert>,
    stats: AlertStats,
}

/// Bounded in-memory alert log with a durable JSON snapshot.
#[derive(Debug)]
pub struct AlertStore {
    config: AlertStoreConfig,
    /// Newest first.
    alerts: Vec<StoredAlert>,
    stats: AlertStats,
    /// Alerts accepted over the store's lifetime, including truncated ones.
    total_accepted: u64,
}

impl AlertStore {
    pub fn new(config: AlertStoreConfig) -> Self {
        Self {
            config,
            alerts: Vec::new(),
            stats: AlertStats::default(),
            total_accepted: 0,
        }
    }

    /// Load the previous snapshot if one exists, otherwise start empty.
    pub fn load_or_new(config: AlertStoreConfig) -> Self {
        match Self::load(&config.snapshot_path) {
            Ok(Some((alerts, total))) => {
                let mut store = Self::new(config);
                store.alerts = alerts;
                store.total_accepted = total;
                store.recompute_stats();
                store
            }
            Ok(None) => Self::new(config),
            Err(e) => {
                tracing::warn!("Failed to load alert snapshot, starting empty: {}", e);
                Self::new(config)
            }
        }
    }

    fn load(path: &Path) -> Result<Option<(Vec<StoredAlert>, u64)>, AlertStoreError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        let doc: SnapshotDoc = serde_json::from_str(&content)?;
        Ok(Some((doc.alerts, doc.total_alerts)))
    }

    /// Prepend a normalized alert, recompute stats, and persist. The local
    /// snapshot is durable by the time this returns; a write failure is
    /// logged and the in-memory log still advances.
    pub fn add(&mut self, anomaly: &Anomaly) -> StoredAlert {
        let stored = StoredAlert::from_anomaly(anomaly);
        self.alerts.insert(0, stored.clone());
        self.alerts.truncate(self.config.max_alerts);
        self.total_accepted += 1;
        self.recompute_stats();
        if let Err(e) = self.save_snapshot() {
            tracing::warn!("Alert snapshot write failed: {}", e);
        }
        stored
    }

    /// The `n` most recent alerts, newest first.
    pub fn recent(&self, n: usize) -> &[StoredAlert] {
        &self.alerts[..n.min(self.alerts.len())]
    }

    pub fn stats(&self) -> &AlertStats {
        &self.stats
    }

    pub fn total_accepted(&self) -> u64 {
        self.total_accepted
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    fn recompute_stats(&mut self) {
        let now_ms = Utc::now().timestamp_millis();
        let day_ago = now_ms - 86_400_000;
        let week_ago = now_ms - 7 * 86_400_000;

        let mut stats = AlertStats::default();
        for alert in &self.alerts {
            *stats.by_type.entry(alert.kind.to_string()).or_insert(0) += 1;
            *stats
                .by_severity
                .entry(alert.severity.to_string())
                .or_insert(0) += 1;
            if alert.timestamp_ms >= day_ago {
                stats.last_24h += 1;
            }
            if alert.timestamp_ms >= week_ago {
                stats.last_7d += 1;
            }
        }
        self.stats = stats;
    }

    /// Write the snapshot atomically: temp file in the same directory,
    /// fsync, rename over the target.
    pub fn save_snapshot(&self) -> Result<(), AlertStoreError> {
        let path = &self.config.snapshot_path;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let doc = SnapshotDoc {
            last_updated: Utc::now().to_rfc3339(),
            total_alerts: self.total_accepted,
            alerts: self.alerts.clone(),
            stats: self.stats.clone(),
        };

        let tmp_path = path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(serde_json::to_string_pretty(&doc)?.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        debug!("Alert snapshot written: {} alerts", self.alerts.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::AnomalyDetails;
    use rust_decimal_macros::dec;

    fn temp_store(max_alerts: usize) -> (tempfile::TempDir, AlertStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = AlertStore::new(AlertStoreConfig {
            max_alerts,
            snapshot_path: dir.path().join("alerts.json"),
        });
        (dir, store)
    }

    fn anomaly(market: &str, ts: i64, severity: Severity) -> Anomaly {
        Anomaly {
            market_id: market.to_string(),
            question: "Will it happen?".to_string(),
            severity,
            timestamp_ms: ts,
            current_price: dec!(0.5),
            direction: ImpliedDirection::Yes,
            trade: None,
            details: AnomalyDetails::LargeTrade {
                size_usd: dec!(10000),
                z_score: None,
            },
        }
    }

    #[test]
    fn test_add_and_recent_newest_first() {
        let (_dir, mut store) = temp_store(100);
        let now = Utc::now().timestamp_millis();
        store.add(&anomaly("m1", now - 2_000, Severity::High));
        store.add(&anomaly("m2", now - 1_000, Severity::Critical));

        let recent = store.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].market_id, "m2");
        assert_eq!(recent[1].market_id, "m1");
    }

    #[test]
    fn test_stable_id_format() {
        let (_dir, mut store) = temp_store(100);
        let stored = store.add(&anomaly("m1", 1_700_000_000_000, Severity::High));
        assert_eq!(stored.id, "m1:LARGE_TRADE:1700000000000");
    }

    #[test]
    fn test_truncation_at_max() {
        let (_dir, mut store) = temp_store(3);
        let now = Utc::now().timestamp_millis();
        for i in 0..5 {
            store.add(&anomaly("m1", now + i, Severity::Medium));
        }
        assert_eq!(store.len(), 3);
        assert_eq!(store.total_accepted(), 5);
        // Newest retained.
        assert_eq!(store.recent(1)[0].timestamp_ms, now + 4);
    }

    #[test]
    fn test_stats_recomputed_on_write() {
        let (_dir, mut store) = temp_store(100);
        let now = Utc::now().timestamp_millis();
        store.add(&anomaly("m1", now, Severity::High));
        store.add(&anomaly("m2", now - 8 * 86_400_000, Severity::Critical)); // past 7d

        let stats = store.stats();
        assert_eq!(stats.by_type.get("LARGE_TRADE"), Some(&2));
        assert_eq!(stats.by_severity.get("HIGH"), Some(&1));
        assert_eq!(stats.by_severity.get("CRITICAL"), Some(&1));
        assert_eq!(stats.last_24h, 1);
        assert_eq!(stats.last_7d, 1);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.json");
        let config = AlertStoreConfig {
            max_alerts: 100,
            snapshot_path: path.clone(),
        };

        let mut store = AlertStore::new(config.clone());
        let now = Utc::now().timestamp_millis();
        store.add(&anomaly("m1", now, Severity::High));
        store.add(&anomaly("m2", now + 1, Severity::Critical));
        store.save_snapshot().unwrap();

        let reloaded = AlertStore::load_or_new(config);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.total_accepted(), 2);
        assert_eq!(reloaded.recent(2), store.recent(2));
    }

    #[test]
    fn test_load_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = AlertStore::load_or_new(AlertStoreConfig {
            max_alerts: 10,
            snapshot_path: dir.path().join("absent.json"),
        });
        assert!(store.is_empty());
    }
}
