//! Durable opportunity and cache state.
//!
//! One JSON document holds everything the slow path must survive a restart
//! with: tracked opportunities and their lifecycle, the analyzed-pair cache,
//! seen-market digests, and cached embeddings. Saves are atomic (temp file,
//! fsync, rename); the file is the single source of truth and is loaded or
//! created once at startup, then passed explicitly to whoever needs it.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::{
    canonical_pair_id, MarketRelation, Opportunity, OpportunityStatus, RelationshipType,
};

/// Errors from the state file.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Digest of a market the pipeline has seen.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeenMarket {
    pub question: String,
    pub end_time: Option<DateTime<Utc>>,
    pub first_seen: DateTime<Utc>,
}

/// Cached verdict for an analyzed pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedPair {
    pub result: RelationshipType,
    pub confidence: f64,
    pub analyzed_at: DateTime<Utc>,
}

/// The cache section of the document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheState {
    pub seen_markets: HashMap<String, SeenMarket>,
    pub analyzed_pairs: HashMap<String, AnalyzedPair>,
    pub embeddings: HashMap<String, Vec<f32>>,
}

/// The persisted document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateDoc {
    opportunities: Vec<Opportunity>,
    last_checked: DateTime<Utc>,
    #[serde(default)]
    cache: CacheState,
}

/// In-memory handle over the state document.
#[derive(Debug)]
pub struct OpportunityState {
    path: PathBuf,
    opportunities: Vec<Opportunity>,
    last_checked: DateTime<Utc>,
    cache: CacheState,
}

impl OpportunityState {
    /// Load the document, or start fresh when the file is absent or
    /// unreadable (a corrupt state file should not keep the service down).
    pub fn load_or_create(path: PathBuf) -> Self {
        match Self::load(&path) {
            Ok(Some(doc)) => {
                info!(
                    "Loaded opportunity state: {} opportunities, {} cached pairs",
                    doc.opportunities.len(),
                    doc.cache.analyzed_pairs.len()
                );
                Self {
                    path,
                    opportunities: doc.opportunities,
                    last_checked: doc.last_checked,
                    cache: doc.cache,
                }
            }
            Ok(None) => Self::empty(path),
            Err(e) => {
                warn!("Failed to load opportunity state ({}), starting fresh", e);
                Self::empty(path)
            }
        }
    }

    fn empty(path: PathBuf) -> Self {
        Self {
            path,
            opportunities: Vec::new(),
            last_checked: Utc::now(),
            cache: CacheState::default(),
        }
    }

    fn load(path: &Path) -> Result<Option<StateDoc>, StateError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Atomic save: temp file in the same directory, fsync, rename.
    pub fn save(&mut self) -> Result<(), StateError> {
        self.last_checked = Utc::now();

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let doc = StateDoc {
            opportunities: self.opportunities.clone(),
            last_checked: self.last_checked,
            cache: self.cache.clone(),
        };

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(serde_json::to_string_pretty(&doc)?.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        debug!("Opportunity state saved: {} opportunities", self.opportunities.len());
        Ok(())
    }

    // ---- opportunity lifecycle ----

    pub fn has_opportunity(&self, id: &str) -> bool {
        self.opportunities.iter().any(|o| o.id == id)
    }

    /// Idempotent insert keyed by the leader-follower pair id. Returns the
    /// new opportunity, or `None` when the pair is already tracked.
    pub fn add_opportunity(&mut self, relation: MarketRelation) -> Option<&Opportunity> {
        let id = format!("{}-{}", relation.leader_id, relation.follower_id);
        if self.has_opportunity(&id) {
            return None;
        }
        self.opportunities.push(Opportunity::new(relation, Utc::now()));
        self.opportunities.last()
    }

    pub fn get(&self, id: &str) -> Option<&Opportunity> {
        self.opportunities.iter().find(|o| o.id == id)
    }

    /// Opportunities whose leader has not resolved yet.
    pub fn unresolved(&self) -> Vec<Opportunity> {
        self.opportunities
            .iter()
            .filter(|o| !o.is_resolved())
            .cloned()
            .collect()
    }

    /// Opportunities still waiting on any signal: neither resolved nor
    /// threshold-triggered.
    pub fn active(&self) -> Vec<Opportunity> {
        self.opportunities
            .iter()
            .filter(|o| o.is_active())
            .cloned()
            .collect()
    }

    /// All opportunities sharing a series tag.
    pub fn in_series(&self, series_id: &str) -> Vec<Opportunity> {
        self.opportunities
            .iter()
            .filter(|o| o.relation.series_id.as_deref() == Some(series_id))
            .cloned()
            .collect()
    }

    /// Advance to `threshold_triggered`. Only an `active` opportunity moves;
    /// the lifecycle never goes backward.
    pub fn mark_threshold_triggered(&mut self, id: &str, price: f64) -> bool {
        let Some(opp) = self.opportunities.iter_mut().find(|o| o.id == id) else {
            return false;
        };
        if opp.status != OpportunityStatus::Active {
            return false;
        }
        opp.status = OpportunityStatus::ThresholdTriggered;
        opp.trigger_price = Some(price);
        opp.updated_at = Utc::now();
        true
    }

    /// Advance to `resolved` with the leader's outcome. Allowed from both
    /// `active` and `threshold_triggered`.
    pub fn mark_leader_resolved(&mut self, id: &str, outcome: &str) -> bool {
        let Some(opp) = self.opportunities.iter_mut().find(|o| o.id == id) else {
            return false;
        };
        if opp.status == OpportunityStatus::Resolved {
            return false;
        }
        opp.status = OpportunityStatus::Resolved;
        opp.leader_outcome = Some(outcome.to_string());
        opp.updated_at = Utc::now();
        true
    }

    pub fn opportunity_count(&self) -> usize {
        self.opportunities.len()
    }

    // ---- pair cache ----

    pub fn is_pair_analyzed(&self, id1: &str, id2: &str) -> bool {
        self.cache
            .analyzed_pairs
            .contains_key(&canonical_pair_id(id1, id2))
    }

    pub fn pair_result(&self, id1: &str, id2: &str) -> Option<&AnalyzedPair> {
        self.cache.analyzed_pairs.get(&canonical_pair_id(id1, id2))
    }

    pub fn save_pair_result(&mut self, id1: &str, id2: &str, result: RelationshipType, confidence: f64) {
        self.cache.analyzed_pairs.insert(
            canonical_pair_id(id1, id2),
            AnalyzedPair {
                result,
                confidence,
                analyzed_at: Utc::now(),
            },
        );
    }

    // ---- market cache ----

    pub fn is_market_new(&self, market_id: &str) -> bool {
        !self.cache.seen_markets.contains_key(market_id)
    }

    pub fn mark_market_seen(
        &mut self,
        market_id: &str,
        question: &str,
        end_time: Option<DateTime<Utc>>,
    ) {
        self.cache
            .seen_markets
            .entry(market_id.to_string())
            .or_insert_with(|| SeenMarket {
                question: question.to_string(),
                end_time,
                first_seen: Utc::now(),
            });
    }

    // ---- embedding cache ----

    pub fn embedding(&self, market_id: &str) -> Option<&Vec<f32>> {
        self.cache.embeddings.get(market_id)
    }

    pub fn save_embedding(&mut self, market_id: &str, vector: Vec<f32>) {
        self.cache.embeddings.insert(market_id.to_string(), vector);
    }

    // ---- cleanup ----

    /// Purge markets whose end time passed more than `retention_days` ago,
    /// their embeddings, and any pair entry referencing a purged market.
    /// Markets first, then pairs: the pair cache holds only the two ids, so
    /// no reference cycle survives.
    pub fn cleanup_ended_markets(&mut self, retention_days: i64, now: DateTime<Utc>) -> usize {
        let cutoff = now - chrono::Duration::days(retention_days);

        let stale: Vec<String> = self
            .cache
            .seen_markets
            .iter()
            .filter(|(_, seen)| seen.end_time.is_some_and(|end| end < cutoff))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            self.cache.seen_markets.remove(id);
            self.cache.embeddings.remove(id);
        }

        self.cache.analyzed_pairs.retain(|key, _| {
            !stale.iter().any(|id| {
                key.split('|').any(|part| part == id)
            })
        });

        if !stale.is_empty() {
            info!("Cache cleanup purged {} ended markets", stale.len());
        }
        stale.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relation(leader: &str, follower: &str, series: Option<&str>) -> MarketRelation {
        let now = Utc::now();
        MarketRelation {
            leader_id: leader.to_string(),
            follower_id: follower.to_string(),
            leader_question: format!("{} question", leader),
            follower_question: format!("{} question", follower),
            leader_end_time: Some(now + chrono::Duration::days(10)),
            follower_end_time: Some(now + chrono::Duration::days(40)),
            relationship: RelationshipType::SameOutcome,
            confidence: 0.8,
            trading_rationale: String::new(),
            expected_edge: String::new(),
            time_gap_days: 30.0,
            series_id: series.map(|s| s.to_string()),
        }
    }

    fn state() -> OpportunityState {
        OpportunityState::empty(PathBuf::from("unused.json"))
    }

    #[test]
    fn test_add_opportunity_idempotent() {
        let mut state = state();
        assert!(state.add_opportunity(relation("a", "b", None)).is_some());
        assert!(state.add_opportunity(relation("a", "b", None)).is_none());
        assert_eq!(state.opportunity_count(), 1);
        assert!(state.has_opportunity("a-b"));
    }

    #[test]
    fn test_lifecycle_forward_only() {
        let mut state = state();
        state.add_opportunity(relation("a", "b", None));

        assert!(state.mark_threshold_triggered("a-b", 0.92));
        assert_eq!(state.get("a-b").unwrap().status, OpportunityStatus::ThresholdTriggered);
        assert_eq!(state.get("a-b").unwrap().trigger_price, Some(0.92));

        // A second trigger is a no-op.
        assert!(!state.mark_threshold_triggered("a-b", 0.95));
        assert_eq!(state.get("a-b").unwrap().trigger_price, Some(0.92));

        assert!(state.mark_leader_resolved("a-b", "YES"));
        assert_eq!(state.get("a-b").unwrap().status, OpportunityStatus::Resolved);

        // Nothing moves a resolved opportunity.
        assert!(!state.mark_leader_resolved("a-b", "NO"));
        assert!(!state.mark_threshold_triggered("a-b", 0.99));
        assert_eq!(state.get("a-b").unwrap().leader_outcome.as_deref(), Some("YES"));
    }

    #[test]
    fn test_direct_active_to_resolved() {
        let mut state = state();
        state.add_opportunity(relation("a", "b", None));
        assert!(state.mark_leader_resolved("a-b", "NO"));
    }

    #[test]
    fn test_unresolved_and_active_views() {
        let mut state = state();
        state.add_opportunity(relation("a", "b", None));
        state.add_opportunity(relation("c", "d", None));
        state.add_opportunity(relation("e", "f", None));

        state.mark_threshold_triggered("a-b", 0.91);
        state.mark_leader_resolved("c-d", "YES");

        let unresolved: Vec<String> = state.unresolved().into_iter().map(|o| o.id).collect();
        assert_eq!(unresolved, vec!["a-b", "e-f"]);

        let active: Vec<String> = state.active().into_iter().map(|o| o.id).collect();
        assert_eq!(active, vec!["e-f"]);
    }

    #[test]
    fn test_series_grouping() {
        let mut state = state();
        state.add_opportunity(relation("jan", "x", Some("maduro-out")));
        state.add_opportunity(relation("feb", "y", Some("maduro-out")));
        state.add_opportunity(relation("mar", "z", None));

        assert_eq!(state.in_series("maduro-out").len(), 2);
        assert!(state.in_series("absent").is_empty());
    }

    #[test]
    fn test_pair_cache_symmetric() {
        let mut state = state();
        state.save_pair_result("m2", "m1", RelationshipType::Unrelated, 0.3);

        assert!(state.is_pair_analyzed("m1", "m2"));
        assert!(state.is_pair_analyzed("m2", "m1"));
        let a = state.pair_result("m1", "m2").unwrap();
        let b = state.pair_result("m2", "m1").unwrap();
        assert_eq!(a.result, b.result);
        assert_eq!(a.confidence, 0.3);
    }

    #[test]
    fn test_market_and_embedding_cache() {
        let mut state = state();
        assert!(state.is_market_new("m1"));

        state.mark_market_seen("m1", "q", None);
        assert!(!state.is_market_new("m1"));

        state.save_embedding("m1", vec![0.1, 0.2]);
        assert_eq!(state.embedding("m1"), Some(&vec![0.1, 0.2]));
        assert!(state.embedding("m2").is_none());
    }

    #[test]
    fn test_cleanup_purges_markets_and_pairs() {
        let mut state = state();
        let now = Utc::now();

        state.mark_market_seen("old", "q", Some(now - chrono::Duration::days(60)));
        state.mark_market_seen("fresh", "q", Some(now + chrono::Duration::days(5)));
        state.save_embedding("old", vec![1.0]);
        state.save_embedding("fresh", vec![1.0]);
        state.save_pair_result("old", "fresh", RelationshipType::SameOutcome, 0.9);
        state.save_pair_result("fresh", "other", RelationshipType::Unrelated, 0.2);

        let purged = state.cleanup_ended_markets(30, now);
        assert_eq!(purged, 1);
        assert!(state.is_market_new("old"));
        assert!(state.embedding("old").is_none());
        assert!(!state.is_pair_analyzed("old", "fresh"));
        assert!(state.is_pair_analyzed("fresh", "other"));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut state = OpportunityState::load_or_create(path.clone());
        state.add_opportunity(relation("a", "b", Some("s1")));
        state.mark_threshold_triggered("a-b", 0.93);
        state.save_pair_result("a", "b", RelationshipType::SameOutcome, 0.8);
        state.mark_market_seen("a", "q", None);
        state.save_embedding("a", vec![0.5; 8]);
        state.save().unwrap();

        let reloaded = OpportunityState::load_or_create(path);
        assert_eq!(reloaded.opportunity_count(), 1);
        let opp = reloaded.get("a-b").unwrap();
        assert_eq!(opp.status, OpportunityStatus::ThresholdTriggered);
        assert_eq!(opp.trigger_price, Some(0.93));
        assert!(reloaded.is_pair_analyzed("b", "a"));
        assert!(!reloaded.is_market_new("a"));
        assert_eq!(reloaded.embedding("a").map(|v| v.len()), Some(8));
    }

    #[test]
    fn test_corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();

        let state = OpportunityState::load_or_create(path);
        assert_eq!(state.opportunity_count(), 0);
    }
}
