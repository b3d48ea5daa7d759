//! Core semantic types shared across the surveillance engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Milliseconds in one hour, the base unit for baseline bucketing.
pub const MS_PER_HOUR: i64 = 3_600_000;

/// Trade side as reported by the exchange feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Parse the wire form ("BUY"/"SELL", case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Direction a trade implies for the YES outcome, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImpliedDirection {
    Yes,
    No,
    Unknown,
}

impl std::fmt::Display for ImpliedDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImpliedDirection::Yes => write!(f, "YES"),
            ImpliedDirection::No => write!(f, "NO"),
            ImpliedDirection::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Severity ladder shared by detectors and alerting.
///
/// Ordering matters: the alert gate compares against a configured minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low = 0,
    Medium = 1,
    High = 2,
    Critical = 3,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Some(Severity::Low),
            "MEDIUM" => Some(Severity::Medium),
            "HIGH" => Some(Severity::High),
            "CRITICAL" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::parse(s).ok_or_else(|| format!("Unknown severity: {}", s))
    }
}

/// An executed trade on one token of a binary market.
///
/// Immutable once recorded. `timestamp_ms` is epoch milliseconds as carried
/// on the wire; windowed reads compare against it directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Market (condition) id this trade belongs to.
    pub market_id: String,
    /// Token id that executed.
    pub token_id: String,
    /// Execution price in [0, 1].
    pub price: Decimal,
    /// Share size.
    pub size: Decimal,
    /// Trade side.
    pub side: Side,
    /// Execution time, epoch milliseconds.
    pub timestamp_ms: i64,
}

impl Trade {
    /// USD notional: price x size.
    pub fn usd_size(&self) -> Decimal {
        self.price * self.size
    }
}

/// A binary-outcome market as tracked by the orchestrator.
///
/// Created when first observed via the markets API, mutated on refresh,
/// dropped from memory once closed beyond retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    /// Market (condition) id.
    pub id: String,
    /// Question text.
    pub question: String,
    /// URL slug, when the listing carries one.
    pub slug: Option<String>,
    /// Human description.
    pub description: String,
    /// Resolution deadline.
    pub end_time: Option<DateTime<Utc>>,
    /// YES outcome token id.
    pub yes_token_id: String,
    /// NO outcome token id.
    pub no_token_id: String,
    /// Last observed YES price.
    pub yes_price: Option<Decimal>,
    /// Last observed NO price.
    pub no_price: Option<Decimal>,
    /// 24h traded volume in USD.
    pub volume_24h: Decimal,
    /// Whether the market has closed.
    pub closed: bool,
}

impl Market {
    /// Days until the market resolves, relative to `now`. Negative if past.
    pub fn days_to_resolution(&self, now: DateTime<Utc>) -> Option<f64> {
        self.end_time
            .map(|end| (end - now).num_seconds() as f64 / 86_400.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_parse() {
        assert_eq!(Side::parse("BUY"), Some(Side::Buy));
        assert_eq!(Side::parse("sell"), Some(Side::Sell));
        assert_eq!(Side::parse("hold"), None);
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_severity_parse_roundtrip() {
        for s in [Severity::Low, Severity::Medium, Severity::High, Severity::Critical] {
            assert_eq!(Severity::parse(s.as_str()), Some(s));
        }
        assert_eq!("medium".parse::<Severity>(), Ok(Severity::Medium));
        assert!("extreme".parse::<Severity>().is_err());
    }

    #[test]
    fn test_trade_usd_size() {
        let trade = Trade {
            market_id: "m1".to_string(),
            token_id: "t1".to_string(),
            price: dec!(0.25),
            size: dec!(400),
            side: Side::Buy,
            timestamp_ms: 1_700_000_000_000,
        };
        assert_eq!(trade.usd_size(), dec!(100));
    }

    #[test]
    fn test_trade_serialization() {
        let trade = Trade {
            market_id: "m1".to_string(),
            token_id: "t1".to_string(),
            price: dec!(0.5),
            size: dec!(10),
            side: Side::Sell,
            timestamp_ms: 1_700_000_000_000,
        };
        let json = serde_json::to_string(&trade).unwrap();
        assert!(json.contains("\"SELL\""));
        let decoded: Trade = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, trade);
    }

    #[test]
    fn test_market_days_to_resolution() {
        let now = Utc::now();
        let market = Market {
            id: "m1".to_string(),
            question: "Will it happen?".to_string(),
            slug: None,
            description: String::new(),
            end_time: Some(now + chrono::Duration::days(7)),
            yes_token_id: "yes".to_string(),
            no_token_id: "no".to_string(),
            yes_price: None,
            no_price: None,
            volume_24h: Decimal::ZERO,
            closed: false,
        };
        let days = market.days_to_resolution(now).unwrap();
        assert!(days > 6.9 && days < 7.1);
    }
}
