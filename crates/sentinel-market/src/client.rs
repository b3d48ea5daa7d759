//! HTTPS client for the exchange markets and status endpoints.
//!
//! The listing endpoint is paginated; `fetch_active_markets` walks pages up
//! to a configured cap and flattens events into [`Market`] values. The status
//! endpoint serves the leader monitor's resolution checks.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, warn};

use sentinel_common::Market;

use crate::types::{ApiEvent, ApiMarket, LeaderStatus};

/// Errors from the markets API.
#[derive(Debug, Error)]
pub enum MarketApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API returned status {0}")]
    Status(reqwest::StatusCode),
}

/// Configuration for the markets client.
#[derive(Debug, Clone)]
pub struct MarketsClientConfig {
    /// Base URL of the markets API.
    pub base_url: String,
    /// HTTP request timeout.
    pub request_timeout: Duration,
    /// Events per page.
    pub page_size: usize,
    /// Maximum pages to walk per listing call.
    pub max_pages: usize,
}

impl Default for MarketsClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://gamma-api.polymarket.com".to_string(),
            request_timeout: Duration::from_secs(30),
            page_size: 100,
            max_pages: 10,
        }
    }
}

/// Client for the exchange HTTPS endpoints.
#[derive(Debug, Clone)]
pub struct MarketsClient {
    http: Client,
    config: MarketsClientConfig,
}

impl MarketsClient {
    pub fn new(config: MarketsClientConfig) -> Result<Self, MarketApiError> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { http, config })
    }

    /// Fetch active, open markets ordered by 24h volume descending.
    ///
    /// Walks pages until an empty page or the page cap; events that fail to
    /// flatten into a usable market are skipped with a debug log.
    pub async fn fetch_active_markets(&self) -> Result<Vec<Market>, MarketApiError> {
        let mut markets = Vec::new();

        for page in 0..self.config.max_pages {
            let offset = page * self.config.page_size;
            let url = format!(
                "{}/events?active=true&closed=false&order=volume24hr&ascending=false&limit={}&offset={}",
                self.config.base_url, self.config.page_size, offset
            );

            let events = self.fetch_events_page(&url).await?;
            if events.is_empty() {
                break;
            }

            let page_len = events.len();
            for event in events {
                for api_market in event.markets.unwrap_or_default() {
                    if let Some(market) = parse_market(&api_market) {
                        markets.push(market);
                    }
                }
            }

            if page_len < self.config.page_size {
                break;
            }
        }

        debug!("Fetched {} markets from listing", markets.len());
        Ok(markets)
    }

    /// Fetch raw events (with tags) for the discovery pipeline, which needs
    /// event-level category tags the flattened view drops.
    pub async fn fetch_active_events(&self) -> Result<Vec<ApiEvent>, MarketApiError> {
        let mut all = Vec::new();

        for page in 0..self.config.max_pages {
            let offset = page * self.config.page_size;
            let url = format!(
                "{}/events?active=true&closed=false&order=volume24hr&ascending=false&limit={}&offset={}",
                self.config.base_url, self.config.page_size, offset
            );

            let events = self.fetch_events_page(&url).await?;
            if events.is_empty() {
                break;
            }
            let page_len = events.len();
            all.extend(events);
            if page_len < self.config.page_size {
                break;
            }
        }

        Ok(all)
    }

    async fn fetch_events_page(&self, url: &str) -> Result<Vec<ApiEvent>, MarketApiError> {
        let response = self.http.get(url).send().await?;

        if !response.status().is_success() {
            return Err(MarketApiError::Status(response.status()));
        }

        Ok(response.json().await?)
    }

    /// Fetch the status snapshot of a single market by id.
    pub async fn fetch_market_status(&self, market_id: &str) -> Result<LeaderStatus, MarketApiError> {
        let url = format!("{}/markets/{}", self.config.base_url, market_id);
        let response = self.http.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(MarketApiError::Status(response.status()));
        }

        Ok(response.json().await?)
    }
}

/// Flatten one listing market into the semantic [`Market`] type.
///
/// Returns `None` when the entry is missing an id, a question, or a parseable
/// token pair; such entries cannot be monitored.
pub fn parse_market(api: &ApiMarket) -> Option<Market> {
    let id = api
        .condition_id
        .clone()
        .or_else(|| api.id.clone())
        .filter(|s| !s.is_empty())?;
    let question = api.question.clone().filter(|q| !q.is_empty())?;

    let (yes_token_id, no_token_id) = parse_token_pair(api.clob_token_ids.as_deref()?)?;
    let (yes_price, no_price) = api
        .outcome_prices
        .as_deref()
        .map(parse_price_pair)
        .unwrap_or((None, None));

    Some(Market {
        id,
        question,
        slug: api.slug.clone(),
        description: api.description.clone().unwrap_or_default(),
        end_time: api.end_date.as_deref().and_then(parse_datetime),
        yes_token_id,
        no_token_id,
        yes_price,
        no_price,
        volume_24h: api
            .volume24hr
            .and_then(Decimal::from_f64_retain)
            .unwrap_or(Decimal::ZERO),
        closed: api.closed.unwrap_or(false),
    })
}

/// Parse the JSON-encoded token id pair. Index 0 is YES, index 1 is NO.
fn parse_token_pair(raw: &str) -> Option<(String, String)> {
    let tokens: Vec<String> = match serde_json::from_str(raw) {
        Ok(t) => t,
        Err(e) => {
            warn!("Failed to parse clobTokenIds '{}': {}", raw, e);
            return None;
        }
    };

    if tokens.len() != 2 || tokens.iter().any(|t| t.is_empty()) {
        return None;
    }

    let mut iter = tokens.into_iter();
    Some((iter.next()?, iter.next()?))
}

/// Parse the JSON-encoded outcome price pair where available.
fn parse_price_pair(raw: &str) -> (Option<Decimal>, Option<Decimal>) {
    let prices: Vec<String> = match serde_json::from_str(raw) {
        Ok(p) => p,
        Err(_) => return (None, None),
    };

    let yes = prices.first().and_then(|p| p.parse().ok());
    let no = prices.get(1).and_then(|p| p.parse().ok());
    (yes, no)
}

/// Parse a datetime string from the API.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ") {
        return Some(dt.and_utc());
    }

    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }

    debug!("Could not parse datetime: {}", s);
    None
}
