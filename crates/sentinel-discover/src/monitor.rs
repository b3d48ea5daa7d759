//! Leader resolution and near-certainty monitor.
//!
//! Periodically polls each unresolved opportunity's leader market. A closed
//! leader with a clean YES/NO outcome resolves the opportunity and derives
//! the follower trade; a leader trading at or above the near-certainty
//! threshold trips the opportunity early and cascades to later-dated
//! siblings in the same series. State is persisted before each
//! notification, so a crash between fetch and mark costs at most one
//! repeated poll, never a duplicate alert.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use sentinel_common::Notifier;
use sentinel_market::{LeaderStatus, MarketApiError, MarketsClient};

use crate::state::{OpportunityState, StateError};
use crate::types::{Opportunity, RelationshipType};

/// Source of leader status snapshots. The HTTP client implements this; the
/// seam exists so ticks can be driven without a network.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, market_id: &str) -> Result<LeaderStatus, MarketApiError>;
}

#[async_trait]
impl StatusSource for MarketsClient {
    async fn fetch_status(&self, market_id: &str) -> Result<LeaderStatus, MarketApiError> {
        self.fetch_market_status(market_id).await
    }
}

/// Errors that abort a monitor tick. Per-market fetch failures never do.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("state persistence failed: {0}")]
    State(#[from] StateError),
}

/// Configuration for the leader monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between polling ticks.
    pub check_interval_ms: i64,
    /// Leader YES price that trips an active opportunity.
    pub near_certainty_threshold: f64,
    /// Delay between per-market status fetches.
    pub fetch_delay_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 1_800_000,
            near_certainty_threshold: 0.90,
            fetch_delay_ms: 200,
        }
    }
}

/// Events produced by one monitor tick.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    LeaderResolved {
        opportunity_id: String,
        outcome: String,
        action: String,
    },
    NearCertainty {
        opportunity_id: String,
        yes_price: f64,
    },
    Cascade {
        opportunity_id: String,
        source_id: String,
        yes_price: f64,
    },
}

/// The leader monitor.
pub struct LeaderMonitor {
    config: MonitorConfig,
}

impl LeaderMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Poll every unresolved opportunity once.
    pub async fn run_once(
        &self,
        client: &dyn StatusSource,
        state: &mut OpportunityState,
        notifier: &dyn Notifier,
    ) -> Result<Vec<MonitorEvent>, MonitorError> {
        let mut events = Vec::new();
        let unresolved = state.unresolved();
        debug!("Leader monitor tick: {} unresolved opportunities", unresolved.len());

        for (i, opp) in unresolved.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.fetch_delay_ms)).await;
            }

            let status = match client.fetch_status(&opp.relation.leader_id).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(
                        "Leader status fetch failed for {}: {}",
                        opp.relation.leader_id, e
                    );
                    continue;
                }
            };

            if status.resolved || status.closed {
                self.handle_resolution(opp, status.outcome_str(), state, notifier, &mut events)
                    .await?;
            } else if let Some(yes_price) = status.yes_price() {
                if yes_price >= self.config.near_certainty_threshold {
                    self.handle_near_certainty(opp, yes_price, state, notifier, &mut events)
                        .await?;
                }
            }
        }

        Ok(events)
    }

    async fn handle_resolution(
        &self,
        opp: &Opportunity,
        outcome_raw: Option<&str>,
        state: &mut OpportunityState,
        notifier: &dyn Notifier,
        events: &mut Vec<MonitorEvent>,
    ) -> Result<(), MonitorError> {
        let Some(outcome) = outcome_raw.and_then(parse_outcome) else {
            warn!(
                "Leader {} closed with ambiguous outcome {:?}; leaving opportunity {} unresolved",
                opp.relation.leader_id, outcome_raw, opp.id
            );
            return Ok(());
        };

        if !state.mark_leader_resolved(&opp.id, outcome) {
            return Ok(());
        }
        state.save()?;

        let action = derive_action(opp.relation.relationship, outcome);
        info!(
            "Leader resolved {} for {}: {}",
            outcome, opp.id, action
        );

        let text = format!(
            "Leader resolved {} | {}\nfollower: {}\naction: {}",
            outcome, opp.relation.leader_question, opp.relation.follower_question, action,
        );
        if let Err(e) = notifier.send(&text).await {
            warn!("Resolution notification failed: {}", e);
        }

        events.push(MonitorEvent::LeaderResolved {
            opportunity_id: opp.id.clone(),
            outcome: outcome.to_string(),
            action,
        });
        Ok(())
    }

    async fn handle_near_certainty(
        &self,
        opp: &Opportunity,
        yes_price: f64,
        state: &mut OpportunityState,
        notifier: &dyn Notifier,
        events: &mut Vec<MonitorEvent>,
    ) -> Result<(), MonitorError> {
        // Only an active opportunity trips; a repeat poll of a triggered one
        // is a no-op, which keeps emission idempotent across restarts.
        if !state.mark_threshold_triggered(&opp.id, yes_price) {
            return Ok(());
        }
        state.save()?;

        info!(
            "Near-certainty: leader of {} at {:.2} YES",
            opp.id, yes_price
        );
        let text = format!(
            "Leader near certainty ({:.2} YES) | {}\nfollower now actionable: {}",
            yes_price, opp.relation.leader_question, opp.relation.follower_question,
        );
        if let Err(e) = notifier.send(&text).await {
            warn!("Near-certainty notification failed: {}", e);
        }
        events.push(MonitorEvent::NearCertainty {
            opportunity_id: opp.id.clone(),
            yes_price,
        });

        self.cascade(opp, yes_price, state, notifier, events).await
    }

    /// Trip later-dated active siblings in the same series.
    async fn cascade(
        &self,
        source: &Opportunity,
        yes_price: f64,
        state: &mut OpportunityState,
        notifier: &dyn Notifier,
        events: &mut Vec<MonitorEvent>,
    ) -> Result<(), MonitorError> {
        let Some(series_id) = source.relation.series_id.as_deref() else {
            return Ok(());
        };
        let Some(source_end) = source.relation.leader_end_time else {
            return Ok(());
        };

        let siblings: Vec<Opportunity> = state
            .in_series(series_id)
            .into_iter()
            .filter(|o| {
                o.id != source.id
                    && o.is_active()
                    && o.relation
                        .leader_end_time
                        .is_some_and(|end| end > source_end)
            })
            .collect();

        for sibling in siblings {
            if !state.mark_threshold_triggered(&sibling.id, yes_price) {
                continue;
            }
            state.save()?;

            info!(
                "Cascade: {} triggered by {} in series {}",
                sibling.id, source.id, series_id
            );
            let text = format!(
                "Series cascade ({}) | earlier leader near certainty at {:.2}\nnow actionable: {}",
                series_id, yes_price, sibling.relation.follower_question,
            );
            if let Err(e) = notifier.send(&text).await {
                warn!("Cascade notification failed: {}", e);
            }
            events.push(MonitorEvent::Cascade {
                opportunity_id: sibling.id,
                source_id: source.id.clone(),
                yes_price,
            });
        }

        Ok(())
    }
}

impl Default for LeaderMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

/// Parse a leader outcome string. Accepts yes/1/true and no/0/false in any
/// case; anything else is ambiguous.
fn parse_outcome(raw: &str) -> Option<&'static str> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "yes" | "1" | "true" => Some("YES"),
        "no" | "0" | "false" => Some("NO"),
        _ => None,
    }
}

/// Derive the follower trade from the relation and the leader's outcome.
fn derive_action(relationship: RelationshipType, outcome: &str) -> String {
    let follower_side = match (relationship, outcome) {
        (RelationshipType::SameOutcome, "YES") => "YES",
        (RelationshipType::SameOutcome, _) => "NO",
        (RelationshipType::DifferentOutcome, "YES") => "NO",
        (RelationshipType::DifferentOutcome, _) => "YES",
        // Non-actionable relations never become opportunities.
        _ => "NONE",
    };
    format!("BUY {} on follower", follower_side)
}
