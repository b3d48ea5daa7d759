//! Market universe filter.
//!
//! Pure classifier deciding whether a market is worth watching for informed
//! flow. Exclusions run first (sports scores, entertainment metrics, weather,
//! price targets), then a curated inclusion keyword set; anything else is
//! rejected. Accepted markets get a priority multiplier used by the
//! orchestrator's stats logging.

use chrono::{DateTime, Utc};
use regex::RegexSet;
use rust_decimal::Decimal;

use sentinel_common::Market;

/// Patterns that exclude a market outright, whatever else matches.
const EXCLUSION_PATTERNS: &[&str] = &[
    r"(?i)\b(nba|nfl|nhl|mlb|ncaa|premier league|la liga|serie a|bundesliga|uefa|fifa)\b",
    r"(?i)\b(super bowl|world series|stanley cup|grand slam|wimbledon|playoffs?)\b",
    r"(?i)\bwin the (game|match|series|cup|title|championship)\b",
    r"(?i)\b(box office|billboard|grammy|oscar|emmy|streams?|spotify|followers)\b",
    r"(?i)\b(temperature|rainfall|snowfall|hurricane|heat wave|high temp)\b",
    r"(?i)\b(reach|hit|close (above|below)|trade (above|below))\s*\$[\d,]+",
    r"(?i)\ball[- ]time high\b",
];

/// Inclusion keywords: politics, regulatory/legal, macro, geopolitics,
/// elections, crypto-policy.
const INCLUSION_KEYWORDS: &[&str] = &[
    "election", "president", "senate", "congress", "parliament", "minister",
    "government", "cabinet", "impeach", "nominee", "nomination", "veto",
    "supreme court", "ruling", "indictment", "lawsuit", "regulation",
    "regulatory", "sec ", "doj", "antitrust", "sanction", "tariff",
    "fed ", "fomc", "rate cut", "rate hike", "interest rate", "inflation",
    "recession", "gdp", "treasury", "debt ceiling", "shutdown",
    "ceasefire", "war", "invasion", "treaty", "nato", "summit",
    "resign", "etf approval", "bitcoin reserve", "stablecoin bill",
];

/// Keywords that mark a market as high priority.
const HOT_KEYWORDS: &[&str] = &["resign", "indicted", "fomc", "ceasefire", "impeach"];

/// Result of classifying one market.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterVerdict {
    /// Whether the market is in-universe.
    pub accepted: bool,
    /// Priority multiplier: 2.0 hot keyword, 1.5 near resolution, 1.0 base.
    pub priority: f64,
}

impl FilterVerdict {
    fn rejected() -> Self {
        Self {
            accepted: false,
            priority: 0.0,
        }
    }
}

/// Pure, deterministic market classifier.
#[derive(Debug)]
pub struct MarketFilter {
    exclusions: RegexSet,
    /// Minimum 24h volume to consider a market at all.
    min_volume_24h: Decimal,
}

impl MarketFilter {
    pub fn new(min_volume_24h: Decimal) -> Self {
        let exclusions = RegexSet::new(EXCLUSION_PATTERNS)
            .expect("exclusion patterns are static and must compile");
        Self {
            exclusions,
            min_volume_24h,
        }
    }

    /// Classify a market against the universe rules.
    pub fn classify(&self, market: &Market, now: DateTime<Utc>) -> FilterVerdict {
        if market.closed || market.volume_24h < self.min_volume_24h {
            return FilterVerdict::rejected();
        }

        let haystack = format!(
            "{} {} {}",
            market.question,
            market.description,
            market.slug.as_deref().unwrap_or("")
        )
        .to_lowercase();

        if self.exclusions.is_match(&haystack) {
            return FilterVerdict::rejected();
        }

        if !INCLUSION_KEYWORDS.iter().any(|kw| haystack.contains(kw)) {
            return FilterVerdict::rejected();
        }

        let priority = if HOT_KEYWORDS.iter().any(|kw| haystack.contains(kw)) {
            2.0
        } else if market
            .days_to_resolution(now)
            .is_some_and(|days| days >= 0.0 && days <= 7.0)
        {
            1.5
        } else {
            1.0
        };

        FilterVerdict {
            accepted: true,
            priority,
        }
    }

    /// Convenience: is the market in-universe right now?
    pub fn accepts(&self, market: &Market, now: DateTime<Utc>) -> bool {
        self.classify(market, now).accepted
    }
}

impl Default for MarketFilter {
    fn default() -> Self {
        Self::new(Decimal::ZERO)
    }
}
