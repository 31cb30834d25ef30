//! Shared types for the IRONFLY engine.
//!
//! These types form the data model used across all modules. Everything
//! except `TradeRecord` is scoped to a single evaluation cycle.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Structure label written to the ledger.
pub const STRUCTURE_IRON_FLY: &str = "Iron Fly";

/// Side label written to the ledger (opened for a net credit).
pub const SIDE_CREDIT: &str = "credit";

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// When the company reports relative to the trading session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportTiming {
    #[serde(rename = "BMO")]
    BeforeOpen,
    #[serde(rename = "AMC")]
    AfterClose,
}

impl ReportTiming {
    /// Parse a free-text calendar value ("Before market open", "bmo", ...).
    /// Anything that does not mention "before"/"BMO" is treated as after close.
    pub fn from_calendar(text: &str) -> Self {
        let upper = text.to_uppercase();
        if upper.contains("BEFORE") || upper.trim() == "BMO" {
            ReportTiming::BeforeOpen
        } else {
            ReportTiming::AfterClose
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ReportTiming::BeforeOpen => "BMO",
            ReportTiming::AfterClose => "AMC",
        }
    }
}

impl fmt::Display for ReportTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// An upcoming earnings report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EarningsEvent {
    pub ticker: String,
    pub report_date: NaiveDate,
    pub timing: ReportTiming,
}

impl fmt::Display for EarningsEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.ticker, self.report_date, self.timing)
    }
}

/// Trade/no-trade recommendation for one ticker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecommendationSignal {
    pub ticker: String,
    /// "recommend", "consider", "avoid", ... Only "recommend" is tradable.
    pub label: String,
    /// Expected move as reported by the provider, e.g. "6.12%".
    pub expected_move: String,
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionType::Call => write!(f, "call"),
            OptionType::Put => write!(f, "put"),
        }
    }
}

/// One entry of an option chain snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionContract {
    pub symbol: String,
    pub strike_price: Decimal,
    pub option_type: OptionType,
    pub expiration: NaiveDate,
}

/// The four resolved legs of an iron fly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IronFlyLegs {
    pub short_call: String,
    pub short_put: String,
    pub long_call: String,
    pub long_put: String,
}

impl IronFlyLegs {
    /// "SC,SP" as stored in the ledger's short-symbol column.
    pub fn short_symbols(&self) -> String {
        format!("{},{}", self.short_call, self.short_put)
    }

    /// "LC,LP" as stored in the ledger's long-symbol column.
    pub fn long_symbols(&self) -> String {
        format!("{},{}", self.long_call, self.long_put)
    }
}

impl fmt::Display for IronFlyLegs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "-{} -{} +{} +{}",
            self.short_call, self.short_put, self.long_call, self.long_put
        )
    }
}

/// Best bid/ask for a single option symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub bid: Decimal,
    pub ask: Decimal,
}

/// Legs plus the derived credit and quantity; lives for one candidate only.
#[derive(Debug, Clone)]
pub struct IronFlyCandidate {
    pub ticker: String,
    pub legs: IronFlyLegs,
    /// Net credit per contract (per share, before the contract multiplier).
    pub credit: Decimal,
    pub quantity: u32,
}

/// Point-in-time account value read from the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortfolioSnapshot {
    pub total_value: Decimal,
}

// ---------------------------------------------------------------------------
// Orders & fills
// ---------------------------------------------------------------------------

/// Atomic four-leg order opened for a net credit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IronFlyOrder {
    pub client_order_id: String,
    pub legs: IronFlyLegs,
    pub quantity: u32,
    /// Net credit limit per contract, rounded to cents.
    pub limit_credit: Decimal,
}

/// Broker acknowledgement of a submitted order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTicket {
    pub order_id: String,
    pub client_order_id: String,
}

/// Lifecycle state of a submitted order as last seen at the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    /// Accepted and still working.
    Working,
    Filled,
    /// Cancelled, expired or rejected. No further fills will arrive.
    Closed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Working)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderState {
    pub status: OrderStatus,
    pub filled_quantity: u32,
    /// Net price per contract; sign conventions vary by broker.
    pub filled_avg_price: Decimal,
    pub commission: Decimal,
}

/// Immutable fill notification delivered to a `FillHandler`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillEvent {
    pub filled_price: Decimal,
    pub filled_quantity: u32,
    pub commission: Decimal,
}

impl From<OrderState> for FillEvent {
    fn from(state: OrderState) -> Self {
        Self {
            filled_price: state.filled_avg_price.abs(),
            filled_quantity: state.filled_quantity,
            commission: state.commission,
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// One opened position, as persisted in the ledger and mirrored to the
/// spreadsheet webhook. Serde names match the ledger column names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    #[serde(rename = "Ticker")]
    pub ticker: String,
    #[serde(rename = "Implied Move")]
    pub implied_move: String,
    #[serde(rename = "Structure")]
    pub structure: String,
    #[serde(rename = "Side")]
    pub side: String,
    #[serde(rename = "When")]
    pub timing: ReportTiming,
    #[serde(rename = "Size")]
    pub size: u32,
    #[serde(rename = "Short Symbol")]
    pub short_symbols: String,
    #[serde(rename = "Long Symbol")]
    pub long_symbols: String,
    #[serde(rename = "Open Date")]
    pub open_date: NaiveDate,
    #[serde(rename = "Open Price")]
    pub open_price: Decimal,
    #[serde(rename = "Open Comm.")]
    pub open_commission: Decimal,
    #[serde(rename = "Close Date")]
    pub close_date: Option<NaiveDate>,
    #[serde(rename = "Close Price")]
    pub close_price: Option<Decimal>,
    #[serde(rename = "Close Comm.")]
    pub close_commission: Option<Decimal>,
}

impl TradeRecord {
    pub fn is_closed(&self) -> bool {
        self.close_date.is_some()
    }
}

impl fmt::Display for TradeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} x{} @ {:.2} ({}) opened {}",
            self.ticker,
            self.structure,
            self.timing,
            self.size,
            self.open_price,
            self.short_symbols,
            self.open_date,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain errors. The first three abort the cycle with a non-zero exit.
#[derive(Debug, thiserror::Error)]
pub enum FlyError {
    #[error("Broker unavailable ({broker}): {message}")]
    BrokerUnavailable { broker: String, message: String },

    #[error("Market is closed")]
    MarketClosed,

    #[error("Portfolio value unavailable: {0}")]
    PortfolioUnavailable(String),

    #[error("Signal provider unavailable: {0}")]
    SignalsUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FlyError {
    /// Whether the condition must end the process with a non-zero exit code.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FlyError::BrokerUnavailable { .. }
                | FlyError::MarketClosed
                | FlyError::PortfolioUnavailable(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
