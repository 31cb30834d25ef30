//! Credit pricing and capital sizing.
//!
//! Converts four live quotes into a net credit per contract and a capital
//! budget into an integer contract count.

use anyhow::{Context, Result};
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use std::fmt;
use tracing::debug;

use crate::broker::Broker;
use crate::types::IronFlyLegs;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SizingConfig {
    /// Raw bid-side credit is divided by this (conservative mid estimate).
    pub credit_divisor: Decimal,
    /// Fraction of the adjusted portfolio value risked per trade.
    pub risk_fraction: Decimal,
    /// Fraction of cumulative realized profit removed from the sizing base.
    pub profit_adjustment_factor: Decimal,
    /// Shares per contract.
    pub contract_multiplier: Decimal,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            credit_divisor: dec!(2),
            risk_fraction: dec!(0.06),
            profit_adjustment_factor: dec!(0.5),
            contract_multiplier: dec!(100),
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Quotes used for pricing: bids on the short legs, asks on the long legs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegQuotes {
    pub short_call_bid: Decimal,
    pub short_put_bid: Decimal,
    pub long_call_ask: Decimal,
    pub long_put_ask: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sizing {
    pub credit: Decimal,
    pub budget: Decimal,
    pub quantity: u32,
}

/// Policy rejections. Not errors: the candidate is simply skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NonPositiveCredit { credit: Decimal },
    BelowOneContract { budget: Decimal, credit: Decimal },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NonPositiveCredit { credit } => {
                write!(f, "non-positive credit {credit:.2}")
            }
            Rejection::BelowOneContract { budget, credit } => {
                write!(f, "budget ${budget:.2} buys no contract at credit {credit:.2}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct PricingEngine {
    config: SizingConfig,
}

impl PricingEngine {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// `raw − factor × realized`: the sizing base shrinks as realized gains grow.
    pub fn adjusted_portfolio_value(&self, raw_value: Decimal, realized_profit: Decimal) -> Decimal {
        raw_value - self.config.profit_adjustment_factor * realized_profit
    }

    /// Fetch the four quotes concurrently. Any failure fails the whole set.
    pub async fn fetch_quotes(&self, broker: &dyn Broker, legs: &IronFlyLegs) -> Result<LegQuotes> {
        let quote = |symbol: &str| {
            let symbol = symbol.to_string();
            async move {
                broker
                    .option_quote(&symbol)
                    .await
                    .with_context(|| format!("Quote unavailable for {symbol}"))
            }
        };
        let (sc, sp, lc, lp) = futures::try_join!(
            quote(&legs.short_call),
            quote(&legs.short_put),
            quote(&legs.long_call),
            quote(&legs.long_put),
        )?;

        Ok(LegQuotes {
            short_call_bid: sc.bid,
            short_put_bid: sp.bid,
            long_call_ask: lc.ask,
            long_put_ask: lp.ask,
        })
    }

    /// Net credit per contract.
    pub fn net_credit(&self, q: &LegQuotes) -> Decimal {
        ((q.short_call_bid + q.short_put_bid) - (q.long_call_ask + q.long_put_ask))
            / self.config.credit_divisor
    }

    /// Integer contract count for a credit against the adjusted value.
    pub fn size(&self, credit: Decimal, adjusted_value: Decimal) -> Result<Sizing, Rejection> {
        if credit <= Decimal::ZERO {
            return Err(Rejection::NonPositiveCredit { credit });
        }

        let budget = adjusted_value * self.config.risk_fraction;
        let contracts = (budget / (self.config.contract_multiplier * credit)).floor();
        let quantity = if contracts >= Decimal::ONE {
            contracts.to_u32().unwrap_or(u32::MAX)
        } else {
            0
        };

        if quantity < 1 {
            return Err(Rejection::BelowOneContract { budget, credit });
        }

        debug!(
            credit = %credit,
            budget = format!("${:.2}", budget),
            quantity,
            "Position sized"
        );

        Ok(Sizing {
            credit,
            budget,
            quantity,
        })
    }

    /// Credit + size in one step.
    pub fn price_and_size(&self, quotes: &LegQuotes, adjusted_value: Decimal) -> Result<Sizing, Rejection> {
        self.size(self.net_credit(quotes), adjusted_value)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
