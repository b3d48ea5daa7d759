//! Exchange HTTPS surface: markets listing, leader status, universe filter.

pub mod client;
pub mod filter;
pub mod types;

pub use client::{MarketApiError, MarketsClient, MarketsClientConfig};
pub use filter::{FilterVerdict, MarketFilter};
pub use types::{ApiEvent, ApiMarket, ApiTag, LeaderStatus, LeaderToken};
