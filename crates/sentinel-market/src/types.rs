//! Wire types for the exchange HTTPS endpoints.
//!
//! Listing fields arrive string-typed (token ids and outcome prices are JSON
//! arrays encoded *as strings*); parsing into semantic types happens in the
//! client, not here.

use serde::Deserialize;

/// Market entry inside an event from the markets listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiMarket {
    pub id: Option<String>,
    pub condition_id: Option<String>,
    pub question: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    /// Token IDs as JSON string array: `["123", "456"]`
    pub clob_token_ids: Option<String>,
    /// Outcome prices as JSON string array: `["0.62", "0.38"]`
    pub outcome_prices: Option<String>,
    pub end_date: Option<String>,
    pub volume24hr: Option<f64>,
    pub active: Option<bool>,
    pub closed: Option<bool>,
}

/// Event from the markets listing; carries a list of markets.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEvent {
    pub id: Option<String>,
    pub title: Option<String>,
    pub slug: Option<String>,
    pub end_date: Option<String>,
    pub active: Option<bool>,
    pub closed: Option<bool>,
    pub markets: Option<Vec<ApiMarket>>,
    pub tags: Option<Vec<ApiTag>>,
}

/// Tag attached to an event.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiTag {
    pub id: Option<String>,
    pub label: Option<String>,
    pub slug: Option<String>,
}

/// Status snapshot of a single market, used by the leader monitor.
#[derive(Debug, Clone, Deserialize)]
pub struct LeaderStatus {
    pub id: Option<String>,
    pub question: Option<String>,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub winning_outcome: Option<String>,
    #[serde(default)]
    pub tokens: Vec<LeaderToken>,
}

/// Per-outcome token price inside a status snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct LeaderToken {
    pub outcome: Option<String>,
    pub price: Option<f64>,
}

impl LeaderStatus {
    /// Outcome string, whichever field the endpoint populated.
    pub fn outcome_str(&self) -> Option<&str> {
        self.outcome
            .as_deref()
            .or(self.winning_outcome.as_deref())
            .filter(|s| !s.is_empty())
    }

    /// Price of the YES token, when present.
    pub fn yes_price(&self) -> Option<f64> {
        self.tokens
            .iter()
            .find(|t| {
                t.outcome
                    .as_deref()
                    .is_some_and(|o| o.eq_ignore_ascii_case("yes"))
            })
            .and_then(|t| t.price)
    }
}
