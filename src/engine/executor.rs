//! Order executor.
//!
//! Turns a sized candidate into one atomic four-leg credit order, submits it
//! and attaches a fill monitor. In dry-run mode the order is only logged.

use anyhow::{Context, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use tracing::info;

use super::fills::{CycleContext, FillMonitor, PendingTrade};
use crate::broker::Broker;
use crate::types::{IronFlyCandidate, IronFlyOrder, OrderTicket};

/// What the executor did with a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    Submitted(OrderTicket),
    DryRun(IronFlyOrder),
}

pub struct OrderExecutor {
    broker: Arc<dyn Broker>,
    monitor: FillMonitor,
    dry_run: bool,
}

impl OrderExecutor {
    pub fn new(broker: Arc<dyn Broker>, monitor: FillMonitor, dry_run: bool) -> Self {
        Self {
            broker,
            monitor,
            dry_run,
        }
    }

    /// Net credit limit rounded to cents, half away from zero.
    pub fn limit_credit(credit: Decimal) -> Decimal {
        credit.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }

    pub fn build_order(candidate: &IronFlyCandidate) -> IronFlyOrder {
        IronFlyOrder {
            client_order_id: format!("ironfly-{}", uuid::Uuid::new_v4()),
            legs: candidate.legs.clone(),
            quantity: candidate.quantity,
            limit_credit: Self::limit_credit(candidate.credit),
        }
    }

    /// Submit the candidate and register a fill monitor in `ctx` whose
    /// handler will enqueue the ledger write for `pending`.
    pub async fn submit(
        &self,
        candidate: &IronFlyCandidate,
        mut pending: PendingTrade,
        ctx: &mut CycleContext,
    ) -> Result<Execution> {
        let order = Self::build_order(candidate);
        if order.limit_credit <= Decimal::ZERO {
            anyhow::bail!(
                "Credit {} rounds to a non-positive limit for {}",
                candidate.credit,
                candidate.ticker
            );
        }

        if self.dry_run {
            info!(
                ticker = %candidate.ticker,
                legs = %order.legs,
                quantity = order.quantity,
                limit = %order.limit_credit,
                "[DRY RUN] Would submit iron fly"
            );
            return Ok(Execution::DryRun(order));
        }

        let ticket = self
            .broker
            .submit_iron_fly(&order)
            .await
            .with_context(|| format!("{} rejected iron fly for {}", self.broker.name(), candidate.ticker))?;

        info!(
            ticker = %candidate.ticker,
            order_id = %ticket.order_id,
            quantity = order.quantity,
            limit = %order.limit_credit,
            "Iron fly submitted"
        );

        pending.limit_credit = order.limit_credit;
        let handler = ctx.open_trade_handler(pending);
        let monitor = self.monitor.clone();
        let watched = ticket.clone();
        ctx.spawn_monitor(async move { monitor.watch(watched, handler).await });

        Ok(Execution::Submitted(ticket))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
