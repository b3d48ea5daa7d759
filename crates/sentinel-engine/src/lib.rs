//! Streaming market-surveillance engine.
//!
//! Ingests every executed trade across a filtered market universe, keeps
//! per-market rolling statistics, and alerts on trades consistent with
//! informed flow. The companion `sentinel-discover` crate runs the slow
//! leader-follower path; this crate owns the hot one.
//!
//! ## Modules
//!
//! - `config`: TOML + env + CLI configuration layering
//! - `trade_store`: bounded per-market sliding windows with replay time
//! - `baseline`: rolling reference statistics and z-scores
//! - `market_stats`: low-price BUY percentile tracking
//! - `anomaly`: the four-detector chain
//! - `alert_manager` / `alert_store`: dedup, rate limits, durable log
//! - `orchestrator`: WebSocket lifecycle and the receive loop
//! - `health`: read-only HTTP surface
//! - `recorder`: CSV trade tape for offline replay

pub mod alert_manager;
pub mod alert_store;
pub mod anomaly;
pub mod baseline;
pub mod config;
pub mod health;
pub mod market_stats;
pub mod orchestrator;
pub mod recorder;
pub mod state;
pub mod trade_store;
pub mod ws;

pub use alert_manager::{format_alert, AlertManager, AlertManagerConfig};
pub use alert_store::{AlertStats, AlertStore, AlertStoreConfig, AlertStoreError, StoredAlert};
pub use anomaly::{
    Anomaly, AnomalyDetails, AnomalyEngine, AnomalyKind, DetectorConfig, TradeAssessment,
};
pub use baseline::{BaselineCalculator, BaselineConfig, MarketBaseline};
pub use config::{HealthConfig, OrchestratorConfig, RecorderConfig, SentinelConfig};
pub use market_stats::{
    PercentileConfig, PercentileResult, PercentileThresholds, PercentileTracker,
};
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use recorder::{RecorderError, TradeRecorder};
pub use state::{EngineState, EngineStateSnapshot};
pub use trade_store::{PriceChange, PricePoint, TradeStore, TradeStoreConfig};
