//! End-to-end discovery and monitor scenarios against stubbed providers.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use sentinel_common::{Notifier, NotifyError};
use sentinel_discover::monitor::StatusSource;
use sentinel_discover::pipeline::MarketSource;
use sentinel_discover::{
    DiscoveryConfig, DiscoveryPipeline, EmbedError, EmbeddingClient, LeaderMonitor, LlmClient,
    LlmError, MarketRelation, MonitorConfig, MonitorEvent, OpportunityState, OpportunityStatus,
    RelationshipType,
};
use sentinel_market::{ApiEvent, LeaderStatus, MarketApiError};

// ---- stubs ----

struct StubMarkets {
    events_json: String,
}

#[async_trait]
impl MarketSource for StubMarkets {
    async fn fetch_active_events(&self) -> Result<Vec<ApiEvent>, MarketApiError> {
        Ok(serde_json::from_str(&self.events_json)?)
    }
}

struct StubEmbedder {
    /// Vector per question substring; matched in order.
    vectors: Vec<(&'static str, Vec<f32>)>,
}

#[async_trait]
impl EmbeddingClient for StubEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts
            .iter()
            .map(|t| {
                self.vectors
                    .iter()
                    .find(|(needle, _)| t.contains(needle))
                    .map(|(_, v)| v.clone())
                    .unwrap_or_else(|| vec![0.0, 0.0])
            })
            .collect())
    }
}

struct StubLlm {
    /// Reply returned for pair-evaluation prompts.
    pair_reply: String,
    calls: Mutex<u32>,
}

#[async_trait]
impl LlmClient for StubLlm {
    async fn complete(&self, _system: &str, user: &str) -> Result<String, LlmError> {
        if user.contains("Categories:") {
            return Ok(r#"{"category": "economy"}"#.to_string());
        }
        *self.calls.lock().unwrap() += 1;
        Ok(self.pair_reply.clone())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

struct StubStatus {
    /// Status per leader market id.
    by_market: HashMap<String, LeaderStatus>,
}

#[async_trait]
impl StatusSource for StubStatus {
    async fn fetch_status(&self, market_id: &str) -> Result<LeaderStatus, MarketApiError> {
        self.by_market
            .get(market_id)
            .cloned()
            .ok_or(MarketApiError::Status(reqwest::StatusCode::NOT_FOUND))
    }
}

// ---- helpers ----

fn fed_events_json(end_a: &str, end_b: &str) -> String {
    format!(
        r#"[{{
            "id": "ev1",
            "title": "Fed decisions",
            "active": true,
            "closed": false,
            "markets": [
                {{
                    "id": "A", "conditionId": "A",
                    "question": "Fed cuts in December?",
                    "clobTokenIds": "[\"a_yes\", \"a_no\"]",
                    "endDate": "{}",
                    "volume24hr": 50000.0,
                    "closed": false
                }},
                {{
                    "id": "B", "conditionId": "B",
                    "question": "Fed cuts in January?",
                    "clobTokenIds": "[\"b_yes\", \"b_no\"]",
                    "endDate": "{}",
                    "volume24hr": 40000.0,
                    "closed": false
                }}
            ],
            "tags": [{{"id": "1", "label": "Economy", "slug": "economy"}}]
        }}]"#,
        end_a, end_b
    )
}

fn far_future(days: i64) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::days(days)
}

fn relation(leader: &str, leader_end: DateTime<Utc>, series: Option<&str>) -> MarketRelation {
    MarketRelation {
        leader_id: leader.to_string(),
        follower_id: format!("{}-follower", leader),
        leader_question: format!("{} by deadline?", leader),
        follower_question: "Follower question".to_string(),
        leader_end_time: Some(leader_end),
        follower_end_time: Some(leader_end + chrono::Duration::days(90)),
        relationship: RelationshipType::SameOutcome,
        confidence: 0.8,
        trading_rationale: String::new(),
        expected_edge: String::new(),
        time_gap_days: 90.0,
        series_id: series.map(|s| s.to_string()),
    }
}

// ---- discovery registers a leader-follower opportunity ----

#[tokio::test]
async fn discovery_registers_fed_leader_follower() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = OpportunityState::load_or_create(dir.path().join("state.json"));

    let end_a = far_future(60);
    let end_b = end_a + chrono::Duration::days(31);
    let markets = StubMarkets {
        events_json: fed_events_json(&end_a.to_rfc3339(), &end_b.to_rfc3339()),
    };
    let embedder = StubEmbedder {
        vectors: vec![("December", vec![1.0, 0.0]), ("January", vec![1.0, 0.0])],
    };
    let llm = StubLlm {
        pair_reply: r#"```json
{"isSameEvent": false, "areMutuallyExclusive": false,
 "relationshipType": "SAME_OUTCOME", "confidenceScore": 0.8,
 "tradingRationale": "a December cut implies continued easing",
 "expectedEdge": "5-10c"}
```"#
            .to_string(),
        calls: Mutex::new(0),
    };
    let notifier = RecordingNotifier::default();

    let pipeline = DiscoveryPipeline::new(DiscoveryConfig::default());
    let report = pipeline
        .run_scan(&markets, &embedder, &llm, &mut state, &notifier)
        .await
        .unwrap();

    assert_eq!(report.markets_considered, 2);
    assert_eq!(report.opportunities_added, 1);
    assert_eq!(*llm.calls.lock().unwrap(), 1);

    let opp = state.get("A-B").expect("opportunity A-B registered");
    assert_eq!(opp.status, OpportunityStatus::Active);
    assert_eq!(opp.relation.leader_id, "A");
    assert_eq!(opp.relation.follower_id, "B");
    assert!((opp.relation.time_gap_days - 31.0).abs() < 1.0);
    assert!(state.is_pair_analyzed("A", "B"));
    assert_eq!(notifier.messages.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn tied_end_times_never_pair() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = OpportunityState::load_or_create(dir.path().join("state.json"));

    // Both markets resolve at the same instant: no leader exists, so the
    // pair must be skipped before the evaluator is ever consulted.
    let end = far_future(60).to_rfc3339();
    let markets = StubMarkets {
        events_json: fed_events_json(&end, &end),
    };
    let embedder = StubEmbedder {
        vectors: vec![("December", vec![1.0, 0.0]), ("January", vec![1.0, 0.0])],
    };
    let llm = StubLlm {
        pair_reply: r#"{"relationshipType": "SAME_OUTCOME", "confidenceScore": 0.9}"#.to_string(),
        calls: Mutex::new(0),
    };
    let notifier = RecordingNotifier::default();

    let pipeline = DiscoveryPipeline::new(DiscoveryConfig::default());
    let report = pipeline
        .run_scan(&markets, &embedder, &llm, &mut state, &notifier)
        .await
        .unwrap();

    assert_eq!(report.markets_considered, 2);
    assert_eq!(report.evaluator_calls, 0);
    assert_eq!(report.opportunities_added, 0);
    assert_eq!(*llm.calls.lock().unwrap(), 0);
    assert_eq!(state.opportunity_count(), 0);
    assert!(!state.is_pair_analyzed("A", "B"));
}

#[tokio::test]
async fn rescan_reuses_cache_and_stays_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = OpportunityState::load_or_create(dir.path().join("state.json"));

    let end_a = far_future(60);
    let end_b = end_a + chrono::Duration::days(31);
    let markets = StubMarkets {
        events_json: fed_events_json(&end_a.to_rfc3339(), &end_b.to_rfc3339()),
    };
    let embedder = StubEmbedder {
        vectors: vec![("December", vec![1.0, 0.0]), ("January", vec![1.0, 0.0])],
    };
    let llm = StubLlm {
        pair_reply: r#"{"relationshipType": "SAME_OUTCOME", "confidenceScore": 0.8}"#.to_string(),
        calls: Mutex::new(0),
    };
    let notifier = RecordingNotifier::default();
    let pipeline = DiscoveryPipeline::new(DiscoveryConfig::default());

    pipeline
        .run_scan(&markets, &embedder, &llm, &mut state, &notifier)
        .await
        .unwrap();
    let second = pipeline
        .run_scan(&markets, &embedder, &llm, &mut state, &notifier)
        .await
        .unwrap();

    // Both endpoints known, pair cached: no second evaluator call, no
    // duplicate opportunity.
    assert_eq!(*llm.calls.lock().unwrap(), 1);
    assert_eq!(second.cache_hits, 1);
    assert_eq!(second.opportunities_added, 0);
    assert_eq!(state.opportunity_count(), 1);
}

#[tokio::test]
async fn unparseable_verdict_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = OpportunityState::load_or_create(dir.path().join("state.json"));

    let end_a = far_future(60);
    let end_b = end_a + chrono::Duration::days(31);
    let markets = StubMarkets {
        events_json: fed_events_json(&end_a.to_rfc3339(), &end_b.to_rfc3339()),
    };
    let embedder = StubEmbedder {
        vectors: vec![("December", vec![1.0, 0.0]), ("January", vec![1.0, 0.0])],
    };
    let llm = StubLlm {
        pair_reply: "I cannot answer in the requested format.".to_string(),
        calls: Mutex::new(0),
    };
    let notifier = RecordingNotifier::default();
    let pipeline = DiscoveryPipeline::new(DiscoveryConfig::default());

    let report = pipeline
        .run_scan(&markets, &embedder, &llm, &mut state, &notifier)
        .await
        .unwrap();

    assert_eq!(report.opportunities_added, 0);
    // The degraded UNRELATED verdict must not be cached.
    assert!(!state.is_pair_analyzed("A", "B"));
    assert_eq!(state.opportunity_count(), 0);
}

// ---- near-certainty cascade across a series ----

#[tokio::test]
async fn near_certainty_cascades_to_later_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = OpportunityState::load_or_create(dir.path().join("state.json"));

    let jan = Utc.with_ymd_and_hms(2027, 1, 31, 0, 0, 0).unwrap();
    let feb = Utc.with_ymd_and_hms(2027, 2, 28, 0, 0, 0).unwrap();
    let mar = Utc.with_ymd_and_hms(2027, 3, 31, 0, 0, 0).unwrap();
    state.add_opportunity(relation("jan", jan, Some("maduro-out")));
    state.add_opportunity(relation("feb", feb, Some("maduro-out")));
    state.add_opportunity(relation("mar", mar, Some("maduro-out")));

    let mut by_market = HashMap::new();
    by_market.insert(
        "jan".to_string(),
        serde_json::from_str::<LeaderStatus>(
            r#"{"id": "jan", "closed": false, "resolved": false,
                "tokens": [{"outcome": "Yes", "price": 0.92}, {"outcome": "No", "price": 0.08}]}"#,
        )
        .unwrap(),
    );
    for id in ["feb", "mar"] {
        by_market.insert(
            id.to_string(),
            serde_json::from_str::<LeaderStatus>(
                r#"{"id": "x", "closed": false, "resolved": false,
                    "tokens": [{"outcome": "Yes", "price": 0.55}]}"#,
            )
            .unwrap(),
        );
    }

    let monitor = LeaderMonitor::new(MonitorConfig {
        fetch_delay_ms: 0,
        ..MonitorConfig::default()
    });
    let notifier = RecordingNotifier::default();
    let events = monitor
        .run_once(&StubStatus { by_market }, &mut state, &notifier)
        .await
        .unwrap();

    let near: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, MonitorEvent::NearCertainty { .. }))
        .collect();
    let cascades: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            MonitorEvent::Cascade { opportunity_id, .. } => Some(opportunity_id.clone()),
            _ => None,
        })
        .collect();

    assert_eq!(near.len(), 1);
    assert_eq!(cascades.len(), 2);
    assert!(cascades.contains(&"feb-feb-follower".to_string()));
    assert!(cascades.contains(&"mar-mar-follower".to_string()));

    for id in ["jan-jan-follower", "feb-feb-follower", "mar-mar-follower"] {
        assert_eq!(
            state.get(id).unwrap().status,
            OpportunityStatus::ThresholdTriggered,
            "{} should be triggered",
            id
        );
    }

    // A second tick with the same prices emits nothing new.
    let mut by_market = HashMap::new();
    for id in ["jan", "feb", "mar"] {
        by_market.insert(
            id.to_string(),
            serde_json::from_str::<LeaderStatus>(
                r#"{"id": "x", "closed": false, "resolved": false,
                    "tokens": [{"outcome": "Yes", "price": 0.95}]}"#,
            )
            .unwrap(),
        );
    }
    let events = monitor
        .run_once(&StubStatus { by_market }, &mut state, &notifier)
        .await
        .unwrap();
    assert!(events.is_empty());
}

#[tokio::test]
async fn leader_resolution_derives_follower_action() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = OpportunityState::load_or_create(dir.path().join("state.json"));
    state.add_opportunity(relation("jan", far_future(10), None));

    let mut by_market = HashMap::new();
    by_market.insert(
        "jan".to_string(),
        serde_json::from_str::<LeaderStatus>(
            r#"{"id": "jan", "closed": true, "resolved": true, "winning_outcome": "Yes"}"#,
        )
        .unwrap(),
    );

    let monitor = LeaderMonitor::new(MonitorConfig {
        fetch_delay_ms: 0,
        ..MonitorConfig::default()
    });
    let notifier = RecordingNotifier::default();
    let events = monitor
        .run_once(&StubStatus { by_market }, &mut state, &notifier)
        .await
        .unwrap();

    assert_eq!(events.len(), 1);
    match &events[0] {
        MonitorEvent::LeaderResolved {
            outcome, action, ..
        } => {
            assert_eq!(outcome, "YES");
            assert_eq!(action, "BUY YES on follower");
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(state.get("jan-jan-follower").unwrap().is_resolved());
}

#[tokio::test]
async fn ambiguous_outcome_leaves_opportunity_unresolved() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = OpportunityState::load_or_create(dir.path().join("state.json"));
    state.add_opportunity(relation("jan", far_future(10), None));

    let mut by_market = HashMap::new();
    by_market.insert(
        "jan".to_string(),
        serde_json::from_str::<LeaderStatus>(
            r#"{"id": "jan", "closed": true, "resolved": true, "outcome": "invalid"}"#,
        )
        .unwrap(),
    );

    let monitor = LeaderMonitor::new(MonitorConfig {
        fetch_delay_ms: 0,
        ..MonitorConfig::default()
    });
    let notifier = RecordingNotifier::default();
    let events = monitor
        .run_once(&StubStatus { by_market }, &mut state, &notifier)
        .await
        .unwrap();

    assert!(events.is_empty());
    assert!(!state.get("jan-jan-follower").unwrap().is_resolved());
}
