//! Leader-follower discovery: clustering, pair evaluation, opportunity
//! tracking, and the leader monitor.
//!
//! Runs off the trade path on a slow cadence. The durable JSON state file
//! is the single source of truth for tracked opportunities and caches.

pub mod cluster;
pub mod embed;
pub mod llm;
pub mod monitor;
pub mod pipeline;
pub mod state;
pub mod types;

pub use cluster::{kmeans, KmeansConfig, TopicExtractor, TAXONOMY};
pub use embed::{EmbedConfig, EmbedError, EmbeddingClient, HttpEmbeddingClient};
pub use llm::{extract_json, HttpLlmClient, LlmClient, LlmConfig, LlmError};
pub use monitor::{
    LeaderMonitor, MonitorConfig, MonitorError, MonitorEvent, StatusSource,
};
pub use pipeline::{
    series_key, DiscoveryConfig, DiscoveryError, DiscoveryPipeline, MarketSource, ScanReport,
};
pub use state::{AnalyzedPair, CacheState, OpportunityState, SeenMarket, StateError};
pub use types::{
    canonical_pair_id, MarketRelation, Opportunity, OpportunityStatus, PairEvaluation,
    RelationshipType,
};
