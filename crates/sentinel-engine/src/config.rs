//! Configuration for the surveillance engine.
//!
//! Loads from a TOML file with environment-variable overrides for secrets
//! and CLI overrides for the operational knobs. Every section has working
//! defaults so the service starts with no config file at all.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;

use sentinel_common::Severity;
use sentinel_discover::{DiscoveryConfig, EmbedConfig, LlmConfig, MonitorConfig};
use sentinel_market::MarketsClientConfig;

use crate::alert_manager::AlertManagerConfig;
use crate::alert_store::AlertStoreConfig;
use crate::anomaly::DetectorConfig;
use crate::baseline::BaselineConfig;
use crate::market_stats::PercentileConfig;
use crate::trade_store::TradeStoreConfig;

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct SentinelConfig {
    /// Logging level.
    pub log_level: String,

    /// Markets API client settings.
    pub markets: MarketsClientConfig,

    /// Minimum 24h volume for the universe filter.
    pub filter_min_volume: Decimal,

    /// Orchestrator / WebSocket lifecycle.
    pub orchestrator: OrchestratorConfig,

    /// Trade window settings.
    pub trade_store: TradeStoreConfig,

    /// Baseline statistics.
    pub baseline: BaselineConfig,

    /// Low-price-buy percentile tracking.
    pub percentile: PercentileConfig,

    /// Detector thresholds.
    pub detectors: DetectorConfig,

    /// Alert dedup and rate limiting.
    pub alerts: AlertManagerConfig,

    /// Alert store retention and snapshot.
    pub alert_store: AlertStoreConfig,

    /// Trade tape recording.
    pub recorder: RecorderConfig,

    /// Health endpoint.
    pub health: HealthConfig,

    /// Discovery pipeline.
    pub discovery: DiscoveryConfig,

    /// Leader monitor.
    pub monitor: MonitorConfig,

    /// Completion provider for pair evaluation.
    pub llm: LlmConfig,

    /// Embedding provider for clustering.
    pub embed: EmbedConfig,

    /// Webhook URL for the notifier; stdout fallback when absent.
    pub webhook_url: Option<String>,

    /// Opportunity state file path.
    pub state_path: PathBuf,
}

/// Orchestrator lifecycle settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Trade stream WebSocket URL.
    pub ws_url: String,
    /// Token ids per subscribe message.
    pub subscribe_batch_size: usize,
    /// WebSocket open timeout.
    pub connect_timeout: Duration,
    /// Delay before reconnecting after a drop.
    pub reconnect_delay: Duration,
    /// Trade store cleanup cadence.
    pub cleanup_interval: Duration,
    /// Stats log cadence.
    pub stats_interval: Duration,
    /// Market universe refresh cadence.
    pub refresh_interval: Duration,
    /// Alert snapshot publish cadence.
    pub publish_interval: Duration,
    /// Cap on monitored markets.
    pub max_markets: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string(),
            subscribe_batch_size: 100,
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
            cleanup_interval: Duration::from_secs(3600),
            stats_interval: Duration::from_secs(300),
            refresh_interval: Duration::from_secs(1800),
            publish_interval: Duration::from_secs(3600),
            max_markets: 1000,
        }
    }
}

/// Trade tape settings.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("data/trade_tape.csv"),
        }
    }
}

/// Health endpoint settings.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8787,
        }
    }
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            markets: MarketsClientConfig::default(),
            filter_min_volume: Decimal::new(1_000, 0),
            orchestrator: OrchestratorConfig::default(),
            trade_store: TradeStoreConfig::default(),
            baseline: BaselineConfig::default(),
            percentile: PercentileConfig::default(),
            detectors: DetectorConfig::default(),
            alerts: AlertManagerConfig::default(),
            alert_store: AlertStoreConfig::default(),
            recorder: RecorderConfig::default(),
            health: HealthConfig::default(),
            discovery: DiscoveryConfig::default(),
            monitor: MonitorConfig::default(),
            llm: LlmConfig::default(),
            embed: EmbedConfig::default(),
            webhook_url: None,
            state_path: PathBuf::from("data/opportunity-state.json"),
        }
    }
}

impl SentinelConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: TomlConfig = toml::from_str(content).context("Failed to parse TOML config")?;
        Ok(Self::from(file))
    }

    /// Apply environment overrides for secrets.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("SENTINEL_WEBHOOK_URL") {
            if !url.is_empty() {
                self.webhook_url = Some(url);
            }
        }
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            self.llm.api_key = key;
        }
        if let Ok(key) = std::env::var("EMBED_API_KEY") {
            self.embed.api_key = key;
        }
    }

    /// Apply CLI overrides.
    pub fn apply_cli_overrides(&mut self, min_trade: Option<u64>, min_severity: Option<Severity>) {
        if let Some(min) = min_trade {
            self.detectors.large_trade_min = Decimal::from(min);
        }
        if let Some(severity) = min_severity {
            self.detectors.min_severity = severity;
        }
    }

    /// Validate before start; a failure here exits the process with code 1.
    pub fn validate(&self) -> Result<()> {
        if self.orchestrator.subscribe_batch_size == 0 || self.orchestrator.subscribe_batch_size > 100 {
            bail!("subscribe_batch_size must be in 1..=100");
        }
        if self.detectors.large_trade_min <= Decimal::ZERO {
            bail!("large_trade_min must be positive");
        }
        if self.detectors.large_trade_min > self.detectors.large_trade_high
            || self.detectors.large_trade_high > self.detectors.large_trade_critical
        {
            bail!("large trade thresholds must be ordered min <= high <= critical");
        }
        if self.percentile.min_samples == 0 || self.percentile.min_samples > self.percentile.max_samples {
            bail!("percentile min_samples must be in 1..=max_samples");
        }
        if self.alerts.max_alerts_per_hour == 0 {
            bail!("max_alerts_per_hour must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.monitor.near_certainty_threshold) {
            bail!("near_certainty_threshold must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.discovery.min_confidence) {
            bail!("discovery min_confidence must be within [0, 1]");
        }
        Ok(())
    }
}

// ============================================================================
// TOML deserialization structures
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct TomlConfig {
    #[serde(default)]
    general: GeneralToml,
    #[serde(default)]
    stream: StreamToml,
    #[serde(default)]
    detectors: DetectorsToml,
    #[serde(default)]
    baseline: BaselineToml,
    #[serde(default)]
    percentile: PercentileToml,
    #[serde(default)]
    alerts: AlertsToml,
    #[serde(default)]
    discovery: DiscoveryToml,
    #[serde(default)]
    monitor: MonitorToml,
    #[serde(default)]
    providers: ProvidersToml,
    #[serde(default)]
    health: HealthToml,
    #[serde(default)]
    recorder: RecorderToml,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GeneralToml {
    log_level: String,
    markets_api_url: String,
    filter_min_volume: f64,
    state_path: String,
    alert_snapshot_path: String,
}

impl Default for GeneralToml {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            markets_api_url: "https://gamma-api.polymarket.com".to_string(),
            filter_min_volume: 1_000.0,
            state_path: "data/opportunity-state.json".to_string(),
            alert_snapshot_path: "data/smart-money-alerts.json".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct StreamToml {
    ws_url: String,
    subscribe_batch_size: usize,
    connect_timeout_secs: u64,
    reconnect_delay_secs: u64,
    refresh_interval_secs: u64,
    max_markets: usize,
}

impl Default for StreamToml {
    fn default() -> Self {
        let d = OrchestratorConfig::default();
        Self {
            ws_url: d.ws_url,
            subscribe_batch_size: d.subscribe_batch_size,
            connect_timeout_secs: d.connect_timeout.as_secs(),
            reconnect_delay_secs: d.reconnect_delay.as_secs(),
            refresh_interval_secs: d.refresh_interval.as_secs(),
            max_markets: d.max_markets,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct DetectorsToml {
    large_trade_min: f64,
    large_trade_high: f64,
    large_trade_critical: f64,
    volume_spike_window_ms: i64,
    volume_spike_low: f64,
    volume_spike_high: f64,
    volume_spike_critical: f64,
    price_window_ms: i64,
    price_change_low: f64,
    price_change_high: f64,
    price_change_critical: f64,
    z_score_low: f64,
    z_score_high: f64,
    z_score_critical: f64,
    min_severity: String,
}

impl Default for DetectorsToml {
    fn default() -> Self {
        Self {
            large_trade_min: 5_000.0,
            large_trade_high: 10_000.0,
            large_trade_critical: 25_000.0,
            volume_spike_window_ms: 300_000,
            volume_spike_low: 5.0,
            volume_spike_high: 10.0,
            volume_spike_critical: 20.0,
            price_window_ms: 300_000,
            price_change_low: 0.05,
            price_change_high: 0.10,
            price_change_critical: 0.20,
            z_score_low: 2.0,
            z_score_high: 3.0,
            z_score_critical: 4.0,
            min_severity: "MEDIUM".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct BaselineToml {
    window_ms: i64,
    min_samples: usize,
}

impl Default for BaselineToml {
    fn default() -> Self {
        Self {
            window_ms: 86_400_000,
            min_samples: 100,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct PercentileToml {
    low_price_threshold: f64,
    max_samples: usize,
    min_samples: usize,
}

impl Default for PercentileToml {
    fn default() -> Self {
        Self {
            low_price_threshold: 0.25,
            max_samples: 10_000,
            min_samples: 50,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct AlertsToml {
    cooldown_ms: i64,
    max_alerts_per_hour: u32,
    max_stored: usize,
}

impl Default for AlertsToml {
    fn default() -> Self {
        Self {
            cooldown_ms: 300_000,
            max_alerts_per_hour: 20,
            max_stored: 500,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct DiscoveryToml {
    rescan_interval_ms: i64,
    min_time_gap_days: f64,
    min_confidence: f64,
    max_pairs_per_cluster: usize,
    min_volume: f64,
    min_days_to_end: f64,
    market_retention_days: i64,
    cluster_seed: u64,
}

impl Default for DiscoveryToml {
    fn default() -> Self {
        let d = DiscoveryConfig::default();
        Self {
            rescan_interval_ms: d.rescan_interval_ms,
            min_time_gap_days: d.min_time_gap_days,
            min_confidence: d.min_confidence,
            max_pairs_per_cluster: d.max_pairs_per_cluster,
            min_volume: 10_000.0,
            min_days_to_end: d.min_days_to_end,
            market_retention_days: d.market_retention_days,
            cluster_seed: d.cluster_seed,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct MonitorToml {
    check_interval_ms: i64,
    near_certainty_threshold: f64,
    fetch_delay_ms: u64,
}

impl Default for MonitorToml {
    fn default() -> Self {
        let d = MonitorConfig::default();
        Self {
            check_interval_ms: d.check_interval_ms,
            near_certainty_threshold: d.near_certainty_threshold,
            fetch_delay_ms: d.fetch_delay_ms,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ProvidersToml {
    llm_base_url: String,
    llm_model: String,
    embed_base_url: String,
    embed_model: String,
}

impl Default for ProvidersToml {
    fn default() -> Self {
        let llm = LlmConfig::default();
        let embed = EmbedConfig::default();
        Self {
            llm_base_url: llm.base_url,
            llm_model: llm.model,
            embed_base_url: embed.base_url,
            embed_model: embed.model,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct HealthToml {
    enabled: bool,
    port: u16,
}

impl Default for HealthToml {
    fn default() -> Self {
        let d = HealthConfig::default();
        Self {
            enabled: d.enabled,
            port: d.port,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RecorderToml {
    enabled: bool,
    path: String,
}

impl Default for RecorderToml {
    fn default() -> Self {
        let d = RecorderConfig::default();
        Self {
            enabled: d.enabled,
            path: d.path.display().to_string(),
        }
    }
}

fn dec(value: f64) -> Decimal {
    Decimal::from_f64_retain(value).unwrap_or(Decimal::ZERO)
}

impl From<TomlConfig> for SentinelConfig {
    fn from(file: TomlConfig) -> Self {
        let defaults = SentinelConfig::default();

        Self {
            log_level: file.general.log_level,
            markets: MarketsClientConfig {
                base_url: file.general.markets_api_url,
                ..MarketsClientConfig::default()
            },
            filter_min_volume: dec(file.general.filter_min_volume),
            orchestrator: OrchestratorConfig {
                ws_url: file.stream.ws_url,
                subscribe_batch_size: file.stream.subscribe_batch_size,
                connect_timeout: Duration::from_secs(file.stream.connect_timeout_secs),
                reconnect_delay: Duration::from_secs(file.stream.reconnect_delay_secs),
                refresh_interval: Duration::from_secs(file.stream.refresh_interval_secs),
                max_markets: file.stream.max_markets,
                ..defaults.orchestrator
            },
            trade_store: TradeStoreConfig {
                window_ms: file.baseline.window_ms,
                ..defaults.trade_store
            },
            baseline: BaselineConfig {
                window_ms: file.baseline.window_ms,
                min_samples: file.baseline.min_samples,
            },
            percentile: PercentileConfig {
                low_price_threshold: dec(file.percentile.low_price_threshold),
                max_samples: file.percentile.max_samples,
                min_samples: file.percentile.min_samples,
                ..defaults.percentile
            },
            detectors: DetectorConfig {
                large_trade_min: dec(file.detectors.large_trade_min),
                large_trade_high: dec(file.detectors.large_trade_high),
                large_trade_critical: dec(file.detectors.large_trade_critical),
                volume_spike_window_ms: file.detectors.volume_spike_window_ms,
                volume_spike_low: file.detectors.volume_spike_low,
                volume_spike_high: file.detectors.volume_spike_high,
                volume_spike_critical: file.detectors.volume_spike_critical,
                price_window_ms: file.detectors.price_window_ms,
                price_change_low: dec(file.detectors.price_change_low),
                price_change_high: dec(file.detectors.price_change_high),
                price_change_critical: dec(file.detectors.price_change_critical),
                z_score_low: file.detectors.z_score_low,
                z_score_high: file.detectors.z_score_high,
                z_score_critical: file.detectors.z_score_critical,
                min_severity: Severity::parse(&file.detectors.min_severity)
                    .unwrap_or(Severity::Medium),
            },
            alerts: AlertManagerConfig {
                cooldown_ms: file.alerts.cooldown_ms,
                max_alerts_per_hour: file.alerts.max_alerts_per_hour,
            },
            alert_store: AlertStoreConfig {
                max_alerts: file.alerts.max_stored,
                snapshot_path: PathBuf::from(file.general.alert_snapshot_path),
            },
            recorder: RecorderConfig {
                enabled: file.recorder.enabled,
                path: PathBuf::from(file.recorder.path),
            },
            health: HealthConfig {
                enabled: file.health.enabled,
                port: file.health.port,
            },
            discovery: DiscoveryConfig {
                rescan_interval_ms: file.discovery.rescan_interval_ms,
                min_time_gap_days: file.discovery.min_time_gap_days,
                min_confidence: file.discovery.min_confidence,
                max_pairs_per_cluster: file.discovery.max_pairs_per_cluster,
                min_volume: dec(file.discovery.min_volume),
                min_days_to_end: file.discovery.min_days_to_end,
                market_retention_days: file.discovery.market_retention_days,
                cluster_seed: file.discovery.cluster_seed,
                ..defaults.discovery
            },
            monitor: MonitorConfig {
                check_interval_ms: file.monitor.check_interval_ms,
                near_certainty_threshold: file.monitor.near_certainty_threshold,
                fetch_delay_ms: file.monitor.fetch_delay_ms,
            },
            llm: LlmConfig {
                base_url: file.providers.llm_base_url,
                model: file.providers.llm_model,
                ..defaults.llm
            },
            embed: EmbedConfig {
                base_url: file.providers.embed_base_url,
                model: file.providers.embed_model,
                ..defaults.embed
            },
            webhook_url: None,
            state_path: PathBuf::from(file.general.state_path),
        }
    }
}
