//! Fill delivery.
//!
//! Each submitted order gets a monitoring task that polls the broker until
//! the order fills, closes, or times out, then hands an immutable
//! `FillEvent` to the order's `FillHandler`. Handlers never write to the
//! ledger: they enqueue a `LedgerAction` on the cycle's channel, and the
//! cycle drains that channel itself once every monitor has finished.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::storage::LedgerWriter;
use crate::types::{
    FillEvent, OrderStatus, OrderTicket, ReportTiming, TradeRecord, SIDE_CREDIT,
    STRUCTURE_IRON_FLY,
};

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Receives the fill outcome of exactly one order.
pub trait FillHandler: Send + Sync + 'static {
    fn on_fill(&self, fill: FillEvent);
}

/// Everything about a trade known at submission time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTrade {
    pub ticker: String,
    pub implied_move: String,
    pub timing: ReportTiming,
    pub short_symbols: String,
    pub long_symbols: String,
    pub open_date: NaiveDate,
    pub limit_credit: Decimal,
}

impl PendingTrade {
    /// Ledger row for this trade as filled. Falls back to the limit credit
    /// when the broker reports no fill price.
    pub fn to_record(&self, fill: &FillEvent) -> TradeRecord {
        let open_price = if fill.filled_price > Decimal::ZERO {
            fill.filled_price
        } else {
            self.limit_credit
        };

        TradeRecord {
            ticker: self.ticker.clone(),
            implied_move: self.implied_move.clone(),
            structure: STRUCTURE_IRON_FLY.to_string(),
            side: SIDE_CREDIT.to_string(),
            timing: self.timing,
            size: fill.filled_quantity,
            short_symbols: self.short_symbols.clone(),
            long_symbols: self.long_symbols.clone(),
            open_date: self.open_date,
            open_price,
            open_commission: fill.commission,
            close_date: None,
            close_price: None,
            close_commission: None,
        }
    }
}

/// Deferred ledger work produced by fill handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerAction {
    RecordOpen(TradeRecord),
}

/// Turns a fill into a `RecordOpen` action.
pub struct OpenTradeHandler {
    pending: PendingTrade,
    tx: UnboundedSender<LedgerAction>,
}

impl FillHandler for OpenTradeHandler {
    fn on_fill(&self, fill: FillEvent) {
        if fill.filled_quantity == 0 {
            debug!(ticker = %self.pending.ticker, "Order ended unfilled, nothing to record");
            return;
        }

        let record = self.pending.to_record(&fill);
        if self.tx.send(LedgerAction::RecordOpen(record)).is_err() {
            warn!(
                ticker = %self.pending.ticker,
                quantity = fill.filled_quantity,
                "Fill arrived after the cycle closed its channel"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Cycle context
// ---------------------------------------------------------------------------

/// Outcome of draining the ledger channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub recorded: usize,
    /// `ticker: error` for each action whose local write failed.
    pub failed: Vec<String>,
}

/// Owns the fill channel and the monitoring tasks for one cycle.
pub struct CycleContext {
    tx: UnboundedSender<LedgerAction>,
    rx: UnboundedReceiver<LedgerAction>,
    monitors: JoinSet<()>,
}

impl Default for CycleContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleContext {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            monitors: JoinSet::new(),
        }
    }

    pub fn open_trade_handler(&self, pending: PendingTrade) -> OpenTradeHandler {
        OpenTradeHandler {
            pending,
            tx: self.tx.clone(),
        }
    }

    pub fn spawn_monitor<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.monitors.spawn(task);
    }

    /// Monitors still running or not yet joined.
    pub fn outstanding(&self) -> usize {
        self.monitors.len()
    }

    /// Join every monitor, then execute queued actions in enqueue order.
    pub async fn finish(mut self, writer: &LedgerWriter) -> DrainReport {
        while let Some(joined) = self.monitors.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Fill monitor task failed");
            }
        }
        drop(self.tx);

        let mut report = DrainReport::default();
        while let Ok(action) = self.rx.try_recv() {
            match action {
                LedgerAction::RecordOpen(record) => match writer.persist(&record).await {
                    Ok(_) => report.recorded += 1,
                    Err(e) => report.failed.push(format!("{}: {e:#}", record.ticker)),
                },
            }
        }
        report
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

/// Polls one order until it reaches a terminal state or the timeout passes.
#[derive(Clone)]
pub struct FillMonitor {
    broker: Arc<dyn Broker>,
    poll_interval: Duration,
    timeout: Duration,
}

impl FillMonitor {
    pub fn new(broker: Arc<dyn Broker>, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            broker,
            poll_interval,
            timeout,
        }
    }

    /// Deliver exactly one `FillEvent` for `ticket` to `handler`, unless the
    /// broker cannot be reached at all after timeout.
    pub async fn watch<H: FillHandler>(&self, ticket: OrderTicket, handler: H) {
        let order_id = ticket.order_id.as_str();
        let deadline = Instant::now() + self.timeout;

        loop {
            match self.broker.order_state(order_id).await {
                Ok(state) if state.status.is_terminal() => {
                    if state.status == OrderStatus::Filled {
                        info!(order_id, quantity = state.filled_quantity, "Order filled");
                    } else {
                        info!(order_id, quantity = state.filled_quantity, "Order closed by broker");
                    }
                    handler.on_fill(FillEvent::from(state));
                    return;
                }
                Ok(_) => {}
                Err(e) => warn!(order_id, error = %e, "Order status poll failed"),
            }

            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        warn!(
            order_id,
            timeout_secs = self.timeout.as_secs(),
            "Order not filled in time, cancelling"
        );
        if let Err(e) = self.broker.cancel_order(order_id).await {
            warn!(order_id, error = %e, "Cancel request failed");
        }

        match self.broker.order_state(order_id).await {
            Ok(state) => handler.on_fill(FillEvent::from(state)),
            Err(e) => warn!(order_id, error = %e, "Final order status unavailable, no fill reported"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
