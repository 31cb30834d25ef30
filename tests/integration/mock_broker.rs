//! In-memory broker and signal provider for integration testing.
//!
//! Provides deterministic `Broker` and `SignalProvider` implementations: a
//! fixed option chain, scripted quotes and fills, and a record of every
//! order submitted or cancelled. No network access.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ironfly::broker::Broker;
use ironfly::signals::SignalProvider;
use ironfly::types::*;

/// How a submitted order behaves when polled.
#[derive(Debug, Clone, Copy)]
pub enum FillScript {
    /// Fills the full quantity on the first poll.
    Full,
    /// Stays working until cancelled, then closes with nothing filled.
    Never,
}

pub struct MockBroker {
    market_open: bool,
    portfolio: Result<Decimal, String>,
    spot: Decimal,
    strikes: Vec<Decimal>,
    /// Symbol → (bid, ask). Missing symbols fail.
    quotes: Mutex<HashMap<String, Quote>>,
    fill_script: FillScript,
    submitted: Arc<Mutex<Vec<IronFlyOrder>>>,
    cancelled: Arc<Mutex<Vec<String>>>,
    chain_requests: Arc<Mutex<Vec<(String, NaiveDate)>>>,
}

impl MockBroker {
    /// Open market, $100k account, spot 101.2, strikes 90..=110 by 5, and
    /// quotes that price a 100/±5 fly at a 0.55 credit.
    pub fn new() -> Self {
        let broker = Self {
            market_open: true,
            portfolio: Ok(dec!(100000)),
            spot: dec!(101.2),
            strikes: vec![dec!(90), dec!(95), dec!(100), dec!(105), dec!(110)],
            quotes: Mutex::new(HashMap::new()),
            fill_script: FillScript::Full,
            submitted: Arc::new(Mutex::new(Vec::new())),
            cancelled: Arc::new(Mutex::new(Vec::new())),
            chain_requests: Arc::new(Mutex::new(Vec::new())),
        };
        broker.set_fly_quotes("ACME", dec!(1.00), dec!(1.20), dec!(0.50), dec!(0.60));
        broker
    }

    pub fn closed() -> Self {
        Self {
            market_open: false,
            ..Self::new()
        }
    }

    pub fn with_portfolio(mut self, value: Result<Decimal, String>) -> Self {
        self.portfolio = value;
        self
    }

    pub fn with_fill_script(mut self, script: FillScript) -> Self {
        self.fill_script = script;
        self
    }

    /// OCC-style symbol for a strike on the fixed expiration.
    pub fn symbol(ticker: &str, option_type: OptionType, strike: Decimal) -> String {
        let tag = match option_type {
            OptionType::Call => 'C',
            OptionType::Put => 'P',
        };
        let millis = (strike * dec!(1000)).to_u64().unwrap_or_default();
        format!("{ticker}261019{tag}{millis:08}")
    }

    /// Quotes for the 100 ATM / 105 / 95 fly on `ticker`.
    pub fn set_fly_quotes(&self, ticker: &str, sc_bid: Decimal, sp_bid: Decimal, lc_ask: Decimal, lp_ask: Decimal) {
        let mut quotes = self.quotes.lock().unwrap();
        let spread = dec!(0.05);
        quotes.insert(Self::symbol(ticker, OptionType::Call, dec!(100)), Quote { bid: sc_bid, ask: sc_bid + spread });
        quotes.insert(Self::symbol(ticker, OptionType::Put, dec!(100)), Quote { bid: sp_bid, ask: sp_bid + spread });
        quotes.insert(Self::symbol(ticker, OptionType::Call, dec!(105)), Quote { bid: lc_ask - spread, ask: lc_ask });
        quotes.insert(Self::symbol(ticker, OptionType::Put, dec!(95)), Quote { bid: lp_ask - spread, ask: lp_ask });
    }

    pub fn submitted(&self) -> Vec<IronFlyOrder> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn chain_requests(&self) -> Vec<(String, NaiveDate)> {
        self.chain_requests.lock().unwrap().clone()
    }

    fn find_order(&self, order_id: &str) -> Result<IronFlyOrder> {
        let index: usize = order_id
            .strip_prefix("mock-")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| anyhow!("Unknown order {order_id}"))?;
        self.submitted
            .lock()
            .unwrap()
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown order {order_id}"))
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn is_market_open(&self) -> Result<bool> {
        Ok(self.market_open)
    }

    async fn portfolio_value(&self) -> Result<Decimal> {
        self.portfolio.clone().map_err(|e| anyhow!(e))
    }

    async fn option_chain(&self, underlying: &str, expiration: NaiveDate) -> Result<Vec<OptionContract>> {
        self.chain_requests
            .lock()
            .unwrap()
            .push((underlying.to_string(), expiration));

        Ok(self
            .strikes
            .iter()
            .flat_map(|&strike| {
                [OptionType::Call, OptionType::Put].map(|option_type| OptionContract {
                    symbol: Self::symbol(underlying, option_type, strike),
                    strike_price: strike,
                    option_type,
                    expiration,
                })
            })
            .collect())
    }

    async fn spot_price(&self, _ticker: &str) -> Result<Decimal> {
        Ok(self.spot)
    }

    async fn option_quote(&self, symbol: &str) -> Result<Quote> {
        self.quotes
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| anyhow!("No quote for {symbol}"))
    }

    async fn submit_iron_fly(&self, order: &IronFlyOrder) -> Result<OrderTicket> {
        let mut submitted = self.submitted.lock().unwrap();
        let order_id = format!("mock-{}", submitted.len());
        submitted.push(order.clone());
        Ok(OrderTicket {
            order_id,
            client_order_id: order.client_order_id.clone(),
        })
    }

    async fn order_state(&self, order_id: &str) -> Result<OrderState> {
        let order = self.find_order(order_id)?;
        let cancelled = self.cancelled.lock().unwrap().iter().any(|id| id == order_id);

        let state = match self.fill_script {
            FillScript::Full => OrderState {
                status: OrderStatus::Filled,
                filled_quantity: order.quantity,
                filled_avg_price: -order.limit_credit,
                commission: dec!(0.65),
            },
            FillScript::Never => OrderState {
                status: if cancelled { OrderStatus::Closed } else { OrderStatus::Working },
                filled_quantity: 0,
                filled_avg_price: Decimal::ZERO,
                commission: Decimal::ZERO,
            },
        };
        Ok(state)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        self.cancelled.lock().unwrap().push(order_id.to_string());
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Fixed calendar and recommendations.
#[derive(Default)]
pub struct StaticSignals {
    pub calendar: HashMap<NaiveDate, Vec<EarningsEvent>>,
    pub recommendations: HashMap<String, RecommendationSignal>,
    pub calendar_error: Option<String>,
}

impl StaticSignals {
    /// One recommended after-close report per ticker on `date`.
    pub fn recommended(date: NaiveDate, tickers: &[&str]) -> Self {
        let mut signals = Self::default();
        for ticker in tickers {
            signals.add_event(date, ticker, ReportTiming::AfterClose, "recommend");
        }
        signals
    }

    pub fn add_event(&mut self, date: NaiveDate, ticker: &str, timing: ReportTiming, label: &str) {
        self.calendar.entry(date).or_default().push(EarningsEvent {
            ticker: ticker.to_string(),
            report_date: date,
            timing,
        });
        self.recommendations.insert(
            ticker.to_string(),
            RecommendationSignal {
                ticker: ticker.to_string(),
                label: label.to_string(),
                expected_move: "6.12%".to_string(),
            },
        );
    }
}

#[async_trait]
impl SignalProvider for StaticSignals {
    async fn earnings_on(&self, date: NaiveDate) -> Result<Vec<EarningsEvent>> {
        if let Some(e) = &self.calendar_error {
            return Err(anyhow!(e.clone()));
        }
        Ok(self.calendar.get(&date).cloned().unwrap_or_default())
    }

    async fn recommendation(&self, ticker: &str) -> Result<Option<RecommendationSignal>> {
        Ok(self.recommendations.get(ticker).cloned())
    }
}
