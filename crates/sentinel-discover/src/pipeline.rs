//! Leader-follower discovery scan.
//!
//! Periodic, off the trade path: list active markets, cluster them
//! semantically, ask the evaluator about candidate pairs inside each
//! cluster, and register actionable relations as opportunities. The
//! analyzed-pair and embedding caches make a rescan cost only what changed
//! since the last one.

use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info, warn};

use async_trait::async_trait;

use sentinel_common::{Market, Notifier};
use sentinel_market::{ApiEvent, MarketApiError, MarketsClient};

use crate::cluster::{kmeans, KmeansConfig, TopicExtractor, TAXONOMY};
use crate::embed::EmbeddingClient;
use crate::llm::{extract_json, LlmClient};
use crate::state::OpportunityState;
use crate::types::{MarketRelation, PairEvaluation, RelationshipType};

/// Source of the active-market listing. The HTTP client implements this;
/// the seam exists so scans can be driven without a network.
#[async_trait]
pub trait MarketSource: Send + Sync {
    async fn fetch_active_events(&self) -> Result<Vec<ApiEvent>, MarketApiError>;
}

#[async_trait]
impl MarketSource for MarketsClient {
    async fn fetch_active_events(&self) -> Result<Vec<ApiEvent>, MarketApiError> {
        MarketsClient::fetch_active_events(self).await
    }
}

/// Errors that abort a whole scan. Per-pair evaluator failures never do.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("market listing failed: {0}")]
    MarketApi(#[from] MarketApiError),

    #[error("state persistence failed: {0}")]
    State(#[from] crate::state::StateError),
}

/// Configuration for the discovery scan.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Interval between scans.
    pub rescan_interval_ms: i64,
    /// Delay between evaluator calls, to respect provider rate limits.
    pub evaluator_delay_ms: u64,
    /// Minimum |end-time gap| for a pair to be worth a look, in days.
    pub min_time_gap_days: f64,
    /// Minimum evaluator confidence for an actionable relation.
    pub min_confidence: f64,
    /// Evaluator-call cap per cluster per scan; cached pairs are free.
    pub max_pairs_per_cluster: usize,
    /// Minimum 24h volume for a market to enter the scan.
    pub min_volume: Decimal,
    /// Markets ending sooner than this many days are skipped.
    pub min_days_to_end: f64,
    /// Event tags excluded from discovery.
    pub excluded_tags: Vec<String>,
    /// Seed for k-means centroid initialization.
    pub cluster_seed: u64,
    /// Representative questions shown to the labeler per cluster.
    pub max_label_examples: usize,
    /// Seen-market / embedding retention after market end, in days.
    pub market_retention_days: i64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            rescan_interval_ms: 86_400_000,
            evaluator_delay_ms: 200,
            min_time_gap_days: 0.0,
            min_confidence: 0.5,
            max_pairs_per_cluster: 10,
            min_volume: Decimal::new(10_000, 0),
            min_days_to_end: 7.0,
            excluded_tags: vec![
                "sports".to_string(),
                "esports".to_string(),
                "entertainment".to_string(),
                "pop-culture".to_string(),
                "weather".to_string(),
            ],
            cluster_seed: 0,
            max_label_examples: 5,
            market_retention_days: 30,
        }
    }
}

/// What one scan did, for the log line and for tests.
#[derive(Debug, Default, Clone)]
pub struct ScanReport {
    pub markets_considered: usize,
    pub new_markets: usize,
    pub clusters: usize,
    pub used_topic_fallback: bool,
    pub evaluator_calls: usize,
    pub cache_hits: usize,
    pub pairs_skipped_by_cap: usize,
    pub opportunities_added: usize,
    /// Cluster label per market id, from the labeling step.
    pub labels: HashMap<String, String>,
}

/// The discovery pipeline.
pub struct DiscoveryPipeline {
    config: DiscoveryConfig,
}

impl DiscoveryPipeline {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Run one full scan.
    pub async fn run_scan(
        &self,
        markets_client: &dyn MarketSource,
        embedder: &dyn EmbeddingClient,
        llm: &dyn LlmClient,
        state: &mut OpportunityState,
        notifier: &dyn Notifier,
    ) -> Result<ScanReport, DiscoveryError> {
        let mut report = ScanReport::default();

        // 1. Ingest.
        let events = markets_client.fetch_active_events().await?;
        let markets = self.ingest(&events);
        report.markets_considered = markets.len();
        if markets.len() < 2 {
            info!("Discovery scan: {} eligible markets, nothing to pair", markets.len());
            return Ok(report);
        }

        // New-market flags must be read before the seen-cache is updated.
        let newness: HashMap<String, bool> = markets
            .iter()
            .map(|m| (m.id.clone(), state.is_market_new(&m.id)))
            .collect();
        report.new_markets = newness.values().filter(|n| **n).count();
        for market in &markets {
            state.mark_market_seen(&market.id, &market.question, market.end_time);
        }

        // 2 + 3. Embed (cache-first) and cluster.
        let assignments = self.cluster_markets(&markets, embedder, state, &mut report).await;
        let clusters = group_by_cluster(&markets, &assignments);
        report.clusters = clusters.len();

        // 4. Label clusters.
        self.label_clusters(&clusters, llm, &mut report).await;

        // 5-7. Evaluate pairs and register opportunities.
        for cluster in clusters.values() {
            if cluster.len() < 2 {
                continue;
            }
            self.evaluate_cluster(cluster, &newness, llm, state, notifier, &mut report)
                .await;
        }

        // 8. Cache maintenance, then persist.
        state.cleanup_ended_markets(self.config.market_retention_days, Utc::now());
        state.save()?;

        info!(
            markets = report.markets_considered,
            new = report.new_markets,
            clusters = report.clusters,
            evaluated = report.evaluator_calls,
            cached = report.cache_hits,
            added = report.opportunities_added,
            "Discovery scan complete"
        );
        Ok(report)
    }

    /// Step 1: flatten events into eligible markets.
    fn ingest(&self, events: &[ApiEvent]) -> Vec<Market> {
        let now = Utc::now();
        let mut markets = Vec::new();

        for event in events {
            let tags: Vec<String> = event
                .tags
                .iter()
                .flatten()
                .filter_map(|t| t.slug.clone().or_else(|| t.label.clone()))
                .map(|t| t.to_lowercase())
                .collect();
            if tags
                .iter()
                .any(|t| self.config.excluded_tags.iter().any(|x| t.contains(x)))
            {
                continue;
            }

            for api_market in event.markets.iter().flatten() {
                let Some(market) = sentinel_market::client::parse_market(api_market) else {
                    continue;
                };
                if market.closed || market.volume_24h < self.config.min_volume {
                    continue;
                }
                match market.days_to_resolution(now) {
                    Some(days) if days >= self.config.min_days_to_end => {}
                    _ => continue,
                }
                markets.push(market);
            }
        }

        markets
    }

    /// Steps 2-3: cached embeddings + k-means, with the rule-based topic
    /// table as the no-provider fallback.
    async fn cluster_markets(
        &self,
        markets: &[Market],
        embedder: &dyn EmbeddingClient,
        state: &mut OpportunityState,
        report: &mut ScanReport,
    ) -> Vec<usize> {
        let missing: Vec<&Market> = markets
            .iter()
            .filter(|m| state.embedding(&m.id).is_none())
            .collect();

        if !missing.is_empty() {
            let texts: Vec<String> = missing.iter().map(|m| m.question.clone()).collect();
            match embedder.embed(&texts).await {
                Ok(vectors) => {
                    for (market, vector) in missing.iter().zip(vectors) {
                        state.save_embedding(&market.id, vector);
                    }
                }
                Err(e) => {
                    warn!("Embedding provider failed ({}), using rule-based topics", e);
                    report.used_topic_fallback = true;
                    let questions: Vec<String> =
                        markets.iter().map(|m| m.question.clone()).collect();
                    return TopicExtractor::new().assign(&questions);
                }
            }
        }

        let vectors: Vec<Vec<f32>> = markets
            .iter()
            .map(|m| state.embedding(&m.id).cloned().unwrap_or_default())
            .collect();

        // A market whose vector is still missing (partial provider reply)
        // would poison the geometry; fall back if any are empty.
        if vectors.iter().any(|v| v.is_empty()) {
            report.used_topic_fallback = true;
            let questions: Vec<String> = markets.iter().map(|m| m.question.clone()).collect();
            return TopicExtractor::new().assign(&questions);
        }

        kmeans(
            &vectors,
            &KmeansConfig {
                k: None,
                max_iterations: 10,
                seed: self.config.cluster_seed,
            },
        )
    }

    /// Step 4: ask the labeler to classify each cluster into the taxonomy.
    async fn label_clusters(
        &self,
        clusters: &HashMap<usize, Vec<&Market>>,
        llm: &dyn LlmClient,
        report: &mut ScanReport,
    ) {
        for cluster in clusters.values() {
            let examples: Vec<&str> = cluster
                .iter()
                .take(self.config.max_label_examples)
                .map(|m| m.question.as_str())
                .collect();

            let label = match self.classify_cluster(&examples, llm).await {
                Some(label) => label,
                None => "other".to_string(),
            };

            for market in cluster {
                report.labels.insert(market.id.clone(), label.clone());
            }
        }
    }

    async fn classify_cluster(&self, examples: &[&str], llm: &dyn LlmClient) -> Option<String> {
        let system = "You classify prediction-market questions into exactly one category. \
                      Reply with JSON: {\"category\": \"<name>\"}.";
        let user = format!(
            "Categories: {}.\n\nQuestions:\n{}\n\nPick the single best category.",
            TAXONOMY.join(", "),
            examples
                .iter()
                .map(|q| format!("- {}", q))
                .collect::<Vec<_>>()
                .join("\n"),
        );

        let reply = match llm.complete(system, &user).await {
            Ok(r) => r,
            Err(e) => {
                debug!("Cluster labeling failed: {}", e);
                return None;
            }
        };

        #[derive(serde::Deserialize)]
        struct LabelReply {
            category: String,
        }

        let parsed: LabelReply = serde_json::from_str(extract_json(&reply)).ok()?;
        let category = parsed.category.to_lowercase();
        if TAXONOMY.contains(&category.as_str()) {
            Some(category)
        } else {
            Some("other".to_string())
        }
    }

    /// Steps 5-7 for one cluster.
    async fn evaluate_cluster(
        &self,
        cluster: &[&Market],
        newness: &HashMap<String, bool>,
        llm: &dyn LlmClient,
        state: &mut OpportunityState,
        notifier: &dyn Notifier,
        report: &mut ScanReport,
    ) {
        let mut calls_this_cluster = 0usize;

        for i in 0..cluster.len() {
            for j in (i + 1)..cluster.len() {
                let (m1, m2) = (cluster[i], cluster[j]);

                let (Some(end1), Some(end2)) = (m1.end_time, m2.end_time) else {
                    continue;
                };
                // Tied deadlines cannot be oriented into leader and follower;
                // `min_time_gap_days` is only an additional floor on top.
                if end1 == end2 {
                    continue;
                }
                let gap_days = (end2 - end1).num_seconds().abs() as f64 / 86_400.0;
                if gap_days < self.config.min_time_gap_days {
                    continue;
                }

                let either_new = newness.get(&m1.id).copied().unwrap_or(true)
                    || newness.get(&m2.id).copied().unwrap_or(true);

                let (relationship, confidence, rationale, edge) =
                    if state.is_pair_analyzed(&m1.id, &m2.id) && !either_new {
                        let cached = state
                            .pair_result(&m1.id, &m2.id)
                            .expect("pair checked as analyzed");
                        report.cache_hits += 1;
                        (
                            cached.result,
                            cached.confidence,
                            "previously analyzed (cached)".to_string(),
                            String::new(),
                        )
                    } else {
                        if calls_this_cluster >= self.config.max_pairs_per_cluster {
                            report.pairs_skipped_by_cap += 1;
                            continue;
                        }
                        if report.evaluator_calls > 0 {
                            tokio::time::sleep(std::time::Duration::from_millis(
                                self.config.evaluator_delay_ms,
                            ))
                            .await;
                        }
                        calls_this_cluster += 1;
                        report.evaluator_calls += 1;

                        match self.evaluate_pair(m1, m2, llm).await {
                            Some(eval) => {
                                state.save_pair_result(
                                    &m1.id,
                                    &m2.id,
                                    eval.relationship_type,
                                    eval.confidence_score,
                                );
                                (
                                    eval.relationship_type,
                                    eval.confidence_score,
                                    eval.trading_rationale,
                                    eval.expected_edge,
                                )
                            }
                            // Unparseable verdicts degrade to UNRELATED and
                            // are NOT cached, so the pair gets another look
                            // next scan.
                            None => (RelationshipType::Unrelated, 0.0, String::new(), String::new()),
                        }
                    };

                if !relationship.is_actionable() || confidence < self.config.min_confidence {
                    continue;
                }

                // Orient by time: leader resolves strictly first.
                let (leader, follower) = if end1 < end2 { (m1, m2) } else { (m2, m1) };

                let relation = MarketRelation {
                    leader_id: leader.id.clone(),
                    follower_id: follower.id.clone(),
                    leader_question: leader.question.clone(),
                    follower_question: follower.question.clone(),
                    leader_end_time: leader.end_time,
                    follower_end_time: follower.end_time,
                    relationship,
                    confidence,
                    trading_rationale: rationale,
                    expected_edge: edge,
                    time_gap_days: gap_days,
                    series_id: series_key(&leader.question),
                };

                if state.has_opportunity(&format!("{}-{}", relation.leader_id, relation.follower_id)) {
                    continue;
                }

                let text = format!(
                    "New leader-follower opportunity ({}, confidence {:.2}, gap {:.0}d)\nleader: {}\nfollower: {}",
                    relationship, confidence, gap_days, relation.leader_question, relation.follower_question,
                );
                state.add_opportunity(relation);
                report.opportunities_added += 1;

                if let Err(e) = notifier.send(&text).await {
                    warn!("Opportunity notification failed: {}", e);
                }
            }
        }
    }

    /// One evaluator call. `None` means the reply was unusable.
    async fn evaluate_pair(
        &self,
        m1: &Market,
        m2: &Market,
        llm: &dyn LlmClient,
    ) -> Option<PairEvaluation> {
        let system = "You analyze pairs of prediction markets for causally linked resolutions. \
                      Reply ONLY with JSON: {\"isSameEvent\": bool, \"areMutuallyExclusive\": bool, \
                      \"relationshipType\": \"SAME_EVENT_REJECT\"|\"SAME_OUTCOME\"|\"DIFFERENT_OUTCOME\"|\"UNRELATED\", \
                      \"confidenceScore\": 0.0-1.0, \"tradingRationale\": string, \"expectedEdge\": string}.";
        let user = format!(
            "Market A: \"{}\" (resolves {})\nMarket B: \"{}\" (resolves {})\n\n\
             Does the earlier market's resolution meaningfully predict the later one's?",
            m1.question,
            m1.end_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
            m2.question,
            m2.end_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
        );

        let reply = match llm.complete(system, &user).await {
            Ok(r) => r,
            Err(e) => {
                warn!("Pair evaluation call failed: {}", e);
                return None;
            }
        };

        match serde_json::from_str::<PairEvaluation>(extract_json(&reply)) {
            Ok(eval) => Some(eval),
            Err(e) => {
                warn!("Unparseable evaluator reply ({}); treating pair as UNRELATED", e);
                None
            }
        }
    }
}

/// Group markets by cluster assignment, preserving market order.
fn group_by_cluster<'a>(
    markets: &'a [Market],
    assignments: &[usize],
) -> HashMap<usize, Vec<&'a Market>> {
    let mut clusters: HashMap<usize, Vec<&Market>> = HashMap::new();
    for (market, cluster) in markets.iter().zip(assignments) {
        clusters.entry(*cluster).or_default().push(market);
    }
    clusters
}

/// Derive a series key from a question by stripping deadline qualifiers:
/// "Maduro out by January?" and "Maduro out by March?" share a key.
pub fn series_key(question: &str) -> Option<String> {
    const MONTHS: &[&str] = &[
        "january", "february", "march", "april", "may", "june", "july",
        "august", "september", "october", "november", "december",
    ];
    const FILLER: &[&str] = &["by", "in", "before", "until", "of", "end"];

    let lowered = question.to_lowercase();
    let mut words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let had_deadline = words
        .iter()
        .any(|w| MONTHS.contains(w) || w.parse::<u32>().map(|y| y >= 2000).unwrap_or(false));
    if !had_deadline {
        return None;
    }

    words.retain(|w| {
        !MONTHS.contains(w) && !FILLER.contains(w) && w.parse::<u32>().is_err()
    });
    if words.is_empty() {
        return None;
    }

    Some(words.join("-"))
}
