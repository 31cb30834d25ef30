//! Spreadsheet webhook mirror.
//!
//! Best-effort copy of each new ledger row to a remote sheet. The payload is
//! the record keyed by column name plus `"action": "create"`.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::types::TradeRecord;

#[derive(Serialize)]
struct MirrorPayload<'a> {
    action: &'static str,
    #[serde(flatten)]
    record: &'a TradeRecord,
}

pub struct LedgerMirror {
    http: Client,
    url: String,
}

impl LedgerMirror {
    pub fn new(url: &str) -> Result<Self> {
        if url.trim().is_empty() {
            anyhow::bail!("Mirror URL is empty");
        }
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .user_agent("IRONFLY/0.1.0 (earnings-iron-fly)")
            .build()
            .context("Failed to build HTTP client for ledger mirror")?;

        Ok(Self {
            http,
            url: url.to_string(),
        })
    }

    pub async fn create(&self, record: &TradeRecord) -> Result<()> {
        let payload = MirrorPayload {
            action: "create",
            record,
        };

        let resp = self
            .http
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .context("Mirror request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Mirror returned {status}: {body}");
        }

        debug!(ticker = %record.ticker, "Trade mirrored");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
