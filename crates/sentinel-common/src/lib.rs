//! Shared types for the market surveillance engine.
//!
//! CRITICAL: All prices and notionals use `rust_decimal::Decimal`.
//! NEVER use f64 for financial math.

pub mod notify;
pub mod types;

pub use notify::{Notifier, NotifyError, StdoutNotifier, WebhookNotifier};
pub use types::{ImpliedDirection, Market, Severity, Side, Trade, MS_PER_HOUR};
