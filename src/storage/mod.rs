//! Persistence layer.
//!
//! The SQLite ledger is the system of record for opened trades; the webhook
//! mirror is a best-effort copy. `LedgerWriter` fans each new record out to
//! both and keeps their failures independent.

pub mod ledger;
pub mod mirror;

use anyhow::Result;
use tracing::{info, warn};

use crate::types::TradeRecord;
use ledger::TradeLedger;
use mirror::LedgerMirror;

pub struct LedgerWriter {
    ledger: TradeLedger,
    mirror: Option<LedgerMirror>,
}

impl LedgerWriter {
    pub fn new(ledger: TradeLedger, mirror: Option<LedgerMirror>) -> Self {
        Self { ledger, mirror }
    }

    pub fn ledger(&self) -> &TradeLedger {
        &self.ledger
    }

    /// Write one opened trade locally and to the mirror. A mirror failure is
    /// logged and never affects the local write; the local result is returned.
    pub async fn persist(&self, record: &TradeRecord) -> Result<i64> {
        let mirror = async {
            match &self.mirror {
                Some(m) => m.create(record).await,
                None => Ok(()),
            }
        };
        let (mirrored, local) = tokio::join!(mirror, self.ledger.persist(record));

        if let Err(e) = mirrored {
            warn!(ticker = %record.ticker, error = %e, "Ledger mirror failed");
        }
        match &local {
            Ok(id) => info!(id, trade = %record, "Trade recorded"),
            Err(e) => warn!(ticker = %record.ticker, error = %e, "Local ledger write failed"),
        }
        local
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
