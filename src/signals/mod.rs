//! Earnings signal providers.
//!
//! Defines the `SignalProvider` trait (earnings calendar + trade/no-trade
//! recommendation) and an HTTP JSON implementation.

pub mod http;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::types::{EarningsEvent, RecommendationSignal};

/// Abstraction over the earnings signal source.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignalProvider: Send + Sync {
    /// Earnings reports scheduled on `date`.
    async fn earnings_on(&self, date: NaiveDate) -> Result<Vec<EarningsEvent>>;

    /// Recommendation for one ticker. `Ok(None)` when the provider has none.
    async fn recommendation(&self, ticker: &str) -> Result<Option<RecommendationSignal>>;
}
