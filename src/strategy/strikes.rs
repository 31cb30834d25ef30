//! Strike selection.
//!
//! Resolves the four contracts of an iron fly from a chain snapshot:
//! short call/put at the ATM strike, long call/put one wing width away.
//! Strikes are `Decimal`, so matching is exact and scale-insensitive
//! (`100` == `100.0`).

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use tracing::debug;

use crate::broker::Broker;
use crate::types::{IronFlyLegs, OptionContract, OptionType};

pub struct StrikeSelector {
    wing_width: Decimal,
}

impl StrikeSelector {
    pub fn new(wing_width: Decimal) -> Self {
        Self { wing_width }
    }

    pub fn wing_width(&self) -> Decimal {
        self.wing_width
    }

    /// Fetch chain + spot and resolve the legs.
    ///
    /// `Ok(None)` when the chain is empty or any leg is missing; `Err` when
    /// market data could not be fetched.
    pub async fn select_legs(
        &self,
        broker: &dyn Broker,
        ticker: &str,
        expiration: NaiveDate,
    ) -> Result<Option<IronFlyLegs>> {
        let chain = broker
            .option_chain(ticker, expiration)
            .await
            .with_context(|| format!("Option chain unavailable for {ticker} {expiration}"))?;
        if chain.is_empty() {
            debug!(ticker, expiration = %expiration, "Empty option chain");
            return Ok(None);
        }

        let spot = broker
            .spot_price(ticker)
            .await
            .with_context(|| format!("Spot price unavailable for {ticker}"))?;

        Ok(self.resolve(&chain, spot))
    }

    /// Pure leg resolution over a chain snapshot.
    pub fn resolve(&self, chain: &[OptionContract], spot: Decimal) -> Option<IronFlyLegs> {
        let strikes: BTreeSet<Decimal> = chain.iter().map(|c| c.strike_price.normalize()).collect();
        let atm = atm_strike(&strikes, spot)?;
        let (wing_up, wing_down) = wing_strikes(atm, self.wing_width);

        let legs = IronFlyLegs {
            short_call: find_symbol(chain, atm, OptionType::Call)?,
            short_put: find_symbol(chain, atm, OptionType::Put)?,
            long_call: find_symbol(chain, wing_up, OptionType::Call)?,
            long_put: find_symbol(chain, wing_down, OptionType::Put)?,
        };

        debug!(
            spot = %spot,
            atm = %atm,
            wing_up = %wing_up,
            wing_down = %wing_down,
            legs = %legs,
            "Iron fly legs resolved"
        );
        Some(legs)
    }
}

/// Strike closest to spot. Ties go to the lowest strike.
pub fn atm_strike(strikes: &BTreeSet<Decimal>, spot: Decimal) -> Option<Decimal> {
    let mut best: Option<(Decimal, Decimal)> = None;
    // Ascending iteration + strict comparison keeps the lowest strike on ties.
    for &strike in strikes {
        let distance = (strike - spot).abs();
        match best {
            Some((_, d)) if distance >= d => {}
            _ => best = Some((strike, distance)),
        }
    }
    best.map(|(strike, _)| strike)
}

/// `(call wing, put wing)` around the ATM strike.
pub fn wing_strikes(atm: Decimal, width: Decimal) -> (Decimal, Decimal) {
    (atm + width, atm - width)
}

fn find_symbol(chain: &[OptionContract], strike: Decimal, option_type: OptionType) -> Option<String> {
    chain
        .iter()
        .find(|c| c.option_type == option_type && c.strike_price == strike)
        .map(|c| c.symbol.clone())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
