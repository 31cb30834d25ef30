//! Strategy: entry gate, strike selection, credit pricing and sizing.

pub mod gate;
pub mod pricing;
pub mod strikes;

use rust_decimal::Decimal;
use std::fmt;

use pricing::Rejection;

// ---------------------------------------------------------------------------
// Decision log
// ---------------------------------------------------------------------------

/// What happened to one earnings candidate during a cycle, including the
/// ones that were passed on and why.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateDecision {
    /// Order accepted by the broker and handed to a fill monitor.
    Submitted {
        order_id: String,
        credit: Decimal,
        quantity: u32,
    },
    /// Sized and logged only.
    DryRun { credit: Decimal, quantity: u32 },
    OutsideWindow,
    NotRecommended,
    /// Already opened on this date, or submitted earlier this cycle.
    AlreadyOpen,
    /// Chain, spot or leg resolution failed.
    NoLegs { reason: String },
    QuoteFailure { reason: String },
    Rejected(Rejection),
    SubmitFailed { reason: String },
}

impl CandidateDecision {
    pub fn is_submitted(&self) -> bool {
        matches!(self, CandidateDecision::Submitted { .. })
    }
}

impl fmt::Display for CandidateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateDecision::Submitted { order_id, credit, quantity } => {
                write!(f, "submitted {order_id} x{quantity} @ {credit:.2}")
            }
            CandidateDecision::DryRun { credit, quantity } => {
                write!(f, "dry-run x{quantity} @ {credit:.2}")
            }
            CandidateDecision::OutsideWindow => write!(f, "outside entry window"),
            CandidateDecision::NotRecommended => write!(f, "not recommended"),
            CandidateDecision::AlreadyOpen => write!(f, "already opened"),
            CandidateDecision::NoLegs { reason } => write!(f, "no legs: {reason}"),
            CandidateDecision::QuoteFailure { reason } => write!(f, "quote failure: {reason}"),
            CandidateDecision::Rejected(r) => write!(f, "rejected: {r}"),
            CandidateDecision::SubmitFailed { reason } => write!(f, "submit failed: {reason}"),
        }
    }
}
