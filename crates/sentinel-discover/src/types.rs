//! Relation and opportunity types for the discovery pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How two markets' resolutions relate, as judged by the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    SameOutcome,
    DifferentOutcome,
    Unrelated,
    /// Two listings of the same underlying event; never tradeable.
    SameEventReject,
}

impl RelationshipType {
    /// Only directional relations are worth tracking.
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            RelationshipType::SameOutcome | RelationshipType::DifferentOutcome
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::SameOutcome => "SAME_OUTCOME",
            RelationshipType::DifferentOutcome => "DIFFERENT_OUTCOME",
            RelationshipType::Unrelated => "UNRELATED",
            RelationshipType::SameEventReject => "SAME_EVENT_REJECT",
        }
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A directed-by-time link between two markets. Never mutated once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketRelation {
    /// Market that resolves first.
    pub leader_id: String,
    /// Market that resolves later.
    pub follower_id: String,
    pub leader_question: String,
    pub follower_question: String,
    pub leader_end_time: Option<DateTime<Utc>>,
    pub follower_end_time: Option<DateTime<Utc>>,
    pub relationship: RelationshipType,
    /// Evaluator confidence in [0, 1].
    pub confidence: f64,
    pub trading_rationale: String,
    pub expected_edge: String,
    /// Gap between the two resolution times, in days.
    pub time_gap_days: f64,
    /// Optional series tag grouping successive deadlines of one event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_id: Option<String>,
}

/// Lifecycle of a tracked opportunity. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityStatus {
    Active,
    ThresholdTriggered,
    Resolved,
}

impl OpportunityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpportunityStatus::Active => "active",
            OpportunityStatus::ThresholdTriggered => "threshold_triggered",
            OpportunityStatus::Resolved => "resolved",
        }
    }
}

impl std::fmt::Display for OpportunityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An actionable relation under lifecycle tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    /// Pair id: `{leader_id}-{follower_id}`.
    pub id: String,
    pub relation: MarketRelation,
    pub status: OpportunityStatus,
    /// Leader outcome once resolved ("YES"/"NO").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_outcome: Option<String>,
    /// Leader YES price that tripped the near-certainty threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_price: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Opportunity {
    pub fn new(relation: MarketRelation, now: DateTime<Utc>) -> Self {
        Self {
            id: format!("{}-{}", relation.leader_id, relation.follower_id),
            relation,
            status: OpportunityStatus::Active,
            leader_outcome: None,
            trigger_price: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.status == OpportunityStatus::Resolved
    }

    pub fn is_active(&self) -> bool {
        self.status == OpportunityStatus::Active
    }
}

/// The evaluator's JSON verdict for one market pair.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairEvaluation {
    #[serde(default)]
    pub is_same_event: bool,
    #[serde(default)]
    pub are_mutually_exclusive: bool,
    pub relationship_type: RelationshipType,
    pub confidence_score: f64,
    #[serde(default)]
    pub trading_rationale: String,
    #[serde(default)]
    pub expected_edge: String,
}

/// Canonical cache key for an unordered market pair: ids sorted
/// lexicographically and joined.
pub fn canonical_pair_id(id1: &str, id2: &str) -> String {
    if id1 <= id2 {
        format!("{}|{}", id1, id2)
    } else {
        format!("{}|{}", id2, id1)
    }
}
