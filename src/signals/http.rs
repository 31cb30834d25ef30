//! HTTP JSON signal provider.
//!
//! Endpoints (relative to the configured base URL):
//! - `GET /earnings?date=YYYY-MM-DD` → `[{"act_symbol", "date", "when"}]`
//! - `GET /recommendation/{ticker}` → `{"label", "expected_move"}`, 404 if none
//!
//! Auth: optional `Authorization: Bearer {key}`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::SignalProvider;
use crate::types::{EarningsEvent, RecommendationSignal, ReportTiming};

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CalendarRow {
    act_symbol: String,
    /// Report date; falls back to the requested date when absent.
    #[serde(default)]
    date: Option<NaiveDate>,
    /// Free text such as "Before market open". Absent means after close.
    #[serde(default)]
    when: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecommendationBody {
    label: String,
    #[serde(default)]
    expected_move: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct HttpSignalProvider {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpSignalProvider {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .user_agent("IRONFLY/0.1.0 (earnings-iron-fly)")
            .build()
            .context("Failed to build HTTP client for signal provider")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.http.get(url);
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    /// Expected move arrives either as text ("6.12%") or a bare number.
    fn expected_move_text(value: Option<serde_json::Value>) -> String {
        match value {
            Some(serde_json::Value::String(s)) => s,
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

#[async_trait]
impl SignalProvider for HttpSignalProvider {
    async fn earnings_on(&self, date: NaiveDate) -> Result<Vec<EarningsEvent>> {
        let url = format!("{}/earnings", self.base_url);
        let resp = self
            .get(&url)
            .query(&[("date", date.format("%Y-%m-%d").to_string())])
            .send()
            .await
            .context("Earnings calendar request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Earnings calendar error {status}: {body}");
        }

        let rows: Vec<CalendarRow> = resp
            .json()
            .await
            .context("Failed to parse earnings calendar response")?;

        let events: Vec<EarningsEvent> = rows
            .into_iter()
            .filter(|r| !r.act_symbol.trim().is_empty())
            .map(|r| EarningsEvent {
                ticker: r.act_symbol.trim().to_uppercase(),
                report_date: r.date.unwrap_or(date),
                timing: ReportTiming::from_calendar(r.when.as_deref().unwrap_or("AMC")),
            })
            .collect();

        debug!(date = %date, count = events.len(), "Earnings calendar fetched");
        Ok(events)
    }

    async fn recommendation(&self, ticker: &str) -> Result<Option<RecommendationSignal>> {
        let url = format!(
            "{}/recommendation/{}",
            self.base_url,
            urlencoding::encode(ticker)
        );
        let resp = self
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Recommendation request failed for {ticker}"))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Recommendation error {status} for {ticker}: {body}");
        }

        let body: RecommendationBody = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse recommendation for {ticker}"))?;

        Ok(Some(RecommendationSignal {
            ticker: ticker.to_string(),
            label: body.label,
            expected_move: Self::expected_move_text(body.expected_move),
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
