//! Cycle orchestrator.
//!
//! One run = fatal pre-checks (session open, account value), realized profit
//! and the earnings calendar, then a sequential pass over candidates:
//! gate → recommendation → duplicate guard → legs → quotes → sizing →
//! submit. After the pass every fill monitor is joined and the queued ledger
//! writes are executed in order.

use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::executor::{Execution, OrderExecutor};
use super::fills::{CycleContext, FillMonitor, PendingTrade};
use crate::broker::Broker;
use crate::config::AppConfig;
use crate::signals::SignalProvider;
use crate::storage::LedgerWriter;
use crate::strategy::gate::{EntryGate, GateConfig};
use crate::strategy::pricing::{PricingEngine, SizingConfig};
use crate::strategy::strikes::StrikeSelector;
use crate::strategy::CandidateDecision;
use crate::types::{EarningsEvent, FlyError, IronFlyCandidate, PortfolioSnapshot};

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Summary of one completed cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub portfolio: PortfolioSnapshot,
    pub realized_profit: Decimal,
    pub adjusted_value: Decimal,
    pub decisions: Vec<(EarningsEvent, CandidateDecision)>,
    /// Ledger rows written after the fill drain.
    pub recorded: usize,
    pub write_failures: Vec<String>,
}

impl CycleReport {
    pub fn submitted(&self) -> usize {
        self.decisions.iter().filter(|(_, d)| d.is_submitted()).count()
    }
}

/// Traded expiration: `offset` days after the report, rolled past weekends.
pub fn expiration_for(report_date: NaiveDate, offset_days: i64) -> NaiveDate {
    let mut date = report_date + Duration::days(offset_days);
    while matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
        date += Duration::days(1);
    }
    date
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

pub struct CycleRunner {
    broker: Arc<dyn Broker>,
    signals: Arc<dyn SignalProvider>,
    gate: EntryGate,
    selector: StrikeSelector,
    pricing: PricingEngine,
    executor: OrderExecutor,
    writer: LedgerWriter,
    expiration_offset_days: i64,
}

impl CycleRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        broker: Arc<dyn Broker>,
        signals: Arc<dyn SignalProvider>,
        gate: EntryGate,
        selector: StrikeSelector,
        pricing: PricingEngine,
        executor: OrderExecutor,
        writer: LedgerWriter,
        expiration_offset_days: i64,
    ) -> Self {
        Self {
            broker,
            signals,
            gate,
            selector,
            pricing,
            executor,
            writer,
            expiration_offset_days,
        }
    }

    /// Wire every component from configuration.
    pub fn from_config(
        cfg: &AppConfig,
        broker: Arc<dyn Broker>,
        signals: Arc<dyn SignalProvider>,
        writer: LedgerWriter,
    ) -> Result<Self> {
        let strategy = &cfg.strategy;
        let gate = EntryGate::new(GateConfig {
            timezone: cfg.exchange_tz()?,
            window_start: strategy.window_start_time()?,
            window_length: Duration::minutes(strategy.window_minutes),
        });
        let pricing = PricingEngine::new(SizingConfig {
            credit_divisor: strategy.credit_divisor,
            risk_fraction: strategy.risk_fraction,
            profit_adjustment_factor: strategy.profit_adjustment_factor,
            contract_multiplier: strategy.contract_multiplier,
        });
        let monitor = FillMonitor::new(
            broker.clone(),
            std::time::Duration::from_secs(cfg.broker.fill_poll_interval_secs),
            std::time::Duration::from_secs(cfg.broker.fill_timeout_secs),
        );
        let executor = OrderExecutor::new(broker.clone(), monitor, cfg.agent.dry_run);

        Ok(Self::new(
            broker,
            signals,
            gate,
            StrikeSelector::new(strategy.wing_width),
            pricing,
            executor,
            writer,
            strategy.expiration_offset_days,
        ))
    }

    /// Run one full cycle at `now`.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<CycleReport, FlyError> {
        let broker_name = self.broker.name().to_string();

        // -- Fatal pre-checks ------------------------------------------------

        let open = self
            .broker
            .is_market_open()
            .await
            .map_err(|e| FlyError::BrokerUnavailable {
                broker: broker_name.clone(),
                message: format!("{e:#}"),
            })?;
        if !open {
            return Err(FlyError::MarketClosed);
        }

        let portfolio_value = self
            .broker
            .portfolio_value()
            .await
            .map_err(|e| FlyError::PortfolioUnavailable(format!("{e:#}")))?;
        if portfolio_value <= Decimal::ZERO {
            return Err(FlyError::PortfolioUnavailable(format!(
                "non-positive account value {portfolio_value}"
            )));
        }

        let multiplier = self.pricing.config().contract_multiplier;
        // An unreadable ledger sizes against the raw account value.
        let realized_profit = match self.writer.ledger().total_realized_profit(multiplier).await {
            Ok(profit) => profit,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Realized profit unavailable, assuming zero");
                Decimal::ZERO
            }
        };
        let adjusted_value = self
            .pricing
            .adjusted_portfolio_value(portfolio_value, realized_profit);

        let today = now.with_timezone(&self.gate.timezone()).date_naive();
        let mut events = Vec::new();
        for date in [today, today + Duration::days(1)] {
            match self.signals.earnings_on(date).await {
                Ok(batch) => events.extend(batch),
                Err(e) => {
                    warn!(%date, error = %format!("{e:#}"), "Earnings calendar unavailable, skipping date");
                }
            }
        }

        info!(
            broker = %broker_name,
            portfolio = format!("${:.2}", portfolio_value),
            realized = format!("${:.2}", realized_profit),
            adjusted = format!("${:.2}", adjusted_value),
            events = events.len(),
            "Starting cycle"
        );

        // -- Candidates -----------------------------------------------------

        let mut ctx = CycleContext::new();
        let mut taken: HashSet<String> = HashSet::new();
        let mut decisions = Vec::with_capacity(events.len());

        for event in events {
            let decision = self
                .evaluate(&event, now, today, adjusted_value, &mut ctx, &mut taken)
                .await;
            match &decision {
                CandidateDecision::Submitted { .. } | CandidateDecision::DryRun { .. } => {
                    info!(ticker = %event.ticker, decision = %decision, "Candidate decided")
                }
                CandidateDecision::OutsideWindow => {
                    debug!(ticker = %event.ticker, decision = %decision, "Candidate skipped")
                }
                CandidateDecision::NoLegs { .. }
                | CandidateDecision::QuoteFailure { .. }
                | CandidateDecision::SubmitFailed { .. } => {
                    warn!(ticker = %event.ticker, decision = %decision, "Candidate skipped")
                }
                _ => info!(ticker = %event.ticker, decision = %decision, "Candidate skipped"),
            }
            decisions.push((event, decision));
        }

        // -- Fills → ledger --------------------------------------------------

        if ctx.outstanding() > 0 {
            info!(monitors = ctx.outstanding(), "Waiting for fill monitors");
        }
        let drained = ctx.finish(&self.writer).await;

        Ok(CycleReport {
            portfolio: PortfolioSnapshot {
                total_value: portfolio_value,
            },
            realized_profit,
            adjusted_value,
            decisions,
            recorded: drained.recorded,
            write_failures: drained.failed,
        })
    }

    async fn evaluate(
        &self,
        event: &EarningsEvent,
        now: DateTime<Utc>,
        open_date: NaiveDate,
        adjusted_value: Decimal,
        ctx: &mut CycleContext,
        taken: &mut HashSet<String>,
    ) -> CandidateDecision {
        let ticker = event.ticker.as_str();

        if !self.gate.should_evaluate(event, &now) {
            return CandidateDecision::OutsideWindow;
        }

        let signal = match self.signals.recommendation(ticker).await {
            Ok(signal) => signal,
            Err(e) => {
                warn!(ticker, error = %e, "Recommendation unavailable");
                None
            }
        };
        if !EntryGate::is_recommended(signal.as_ref()) {
            return CandidateDecision::NotRecommended;
        }
        let implied_move = signal.map(|s| s.expected_move).unwrap_or_default();

        if taken.contains(ticker) {
            return CandidateDecision::AlreadyOpen;
        }
        match self.writer.ledger().has_trade_opened_on(ticker, open_date).await {
            Ok(true) => return CandidateDecision::AlreadyOpen,
            Ok(false) => {}
            Err(e) => {
                return CandidateDecision::SubmitFailed {
                    reason: format!("duplicate check failed: {e:#}"),
                }
            }
        }

        let expiration = expiration_for(event.report_date, self.expiration_offset_days);
        let legs = match self
            .selector
            .select_legs(self.broker.as_ref(), ticker, expiration)
            .await
        {
            Ok(Some(legs)) => legs,
            Ok(None) => {
                return CandidateDecision::NoLegs {
                    reason: format!(
                        "no complete {}-wide fly for {expiration}",
                        self.selector.wing_width()
                    ),
                }
            }
            Err(e) => return CandidateDecision::NoLegs { reason: format!("{e:#}") },
        };

        let quotes = match self.pricing.fetch_quotes(self.broker.as_ref(), &legs).await {
            Ok(q) => q,
            Err(e) => return CandidateDecision::QuoteFailure { reason: format!("{e:#}") },
        };

        let sizing = match self.pricing.price_and_size(&quotes, adjusted_value) {
            Ok(s) => s,
            Err(rejection) => return CandidateDecision::Rejected(rejection),
        };

        let pending = PendingTrade {
            ticker: ticker.to_string(),
            implied_move,
            timing: event.timing,
            short_symbols: legs.short_symbols(),
            long_symbols: legs.long_symbols(),
            open_date,
            limit_credit: sizing.credit,
        };
        let candidate = IronFlyCandidate {
            ticker: ticker.to_string(),
            legs,
            credit: sizing.credit,
            quantity: sizing.quantity,
        };

        match self.executor.submit(&candidate, pending, ctx).await {
            Ok(Execution::Submitted(ticket)) => {
                taken.insert(ticker.to_string());
                CandidateDecision::Submitted {
                    order_id: ticket.order_id,
                    credit: sizing.credit,
                    quantity: sizing.quantity,
                }
            }
            Ok(Execution::DryRun(_)) => {
                taken.insert(ticker.to_string());
                CandidateDecision::DryRun {
                    credit: sizing.credit,
                    quantity: sizing.quantity,
                }
            }
            Err(e) => CandidateDecision::SubmitFailed { reason: format!("{e:#}") },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
