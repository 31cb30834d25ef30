//! Broker and market-data integration.
//!
//! Defines the `Broker` trait consumed by the engine and provides the
//! Alpaca REST implementation.

pub mod alpaca;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::types::{IronFlyOrder, OptionContract, OrderState, OrderTicket, Quote};

/// Abstraction over a broker that also serves market data.
///
/// Multi-leg orders are all-or-nothing at the broker: a `Filled` state
/// always covers all four legs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broker: Send + Sync {
    /// Whether the regular session is currently open.
    async fn is_market_open(&self) -> Result<bool>;

    /// Current account equity.
    async fn portfolio_value(&self) -> Result<Decimal>;

    /// Full option chain for one underlying and expiration.
    async fn option_chain(
        &self,
        underlying: &str,
        expiration: NaiveDate,
    ) -> Result<Vec<OptionContract>>;

    /// Latest traded price of the underlying.
    async fn spot_price(&self, ticker: &str) -> Result<Decimal>;

    /// Latest best bid/ask for an option symbol.
    async fn option_quote(&self, symbol: &str) -> Result<Quote>;

    /// Submit a four-leg order opened for a net credit.
    async fn submit_iron_fly(&self, order: &IronFlyOrder) -> Result<OrderTicket>;

    /// Current state of a previously submitted order.
    async fn order_state(&self, order_id: &str) -> Result<OrderState>;

    /// Request cancellation of a working order.
    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    /// Broker name for logging and identification.
    fn name(&self) -> &str;
}
