//! Alpaca REST integration (trading + market data).
//!
//! API docs: https://docs.alpaca.markets/reference
//! Trading base URL: https://paper-api.alpaca.markets (paper) or
//!                   https://api.alpaca.markets (live)
//! Market data base URL: https://data.alpaca.markets
//! Auth: `APCA-API-KEY-ID` / `APCA-API-SECRET-KEY` headers on every call.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, RequestBuilder, Response};
use rust_decimal::prelude::*;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::Broker;
use crate::config::{AppConfig, BrokerConfig};
use crate::types::{
    IronFlyOrder, OptionContract, OptionType, OrderState, OrderStatus, OrderTicket, Quote,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const PAPER_TRADING_URL: &str = "https://paper-api.alpaca.markets";
const LIVE_TRADING_URL: &str = "https://api.alpaca.markets";
const DATA_URL: &str = "https://data.alpaca.markets";
const BROKER_NAME: &str = "alpaca";

/// Contracts per page when walking the option chain (API max is 10000).
const CHAIN_PAGE_LIMIT: u32 = 1000;

// ---------------------------------------------------------------------------
// API response types (Alpaca JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ClockResponse {
    is_open: bool,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    /// Decimal string, e.g. "100000.52".
    equity: String,
}

#[derive(Debug, Deserialize)]
struct ContractsPage {
    #[serde(default)]
    option_contracts: Vec<AlpacaContract>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlpacaContract {
    symbol: String,
    /// "call" | "put"
    #[serde(rename = "type")]
    kind: String,
    /// Decimal string, e.g. "105".
    strike_price: String,
    expiration_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
struct LatestTradeResponse {
    trade: LatestTrade,
}

#[derive(Debug, Deserialize)]
struct LatestTrade {
    #[serde(rename = "p")]
    price: f64,
}

#[derive(Debug, Deserialize)]
struct LatestQuotesResponse {
    quotes: std::collections::HashMap<String, LatestQuote>,
}

#[derive(Debug, Deserialize)]
struct LatestQuote {
    #[serde(rename = "bp")]
    bid: f64,
    #[serde(rename = "ap")]
    ask: f64,
}

#[derive(Debug, Serialize)]
struct MlegOrderRequest<'a> {
    order_class: &'static str,
    #[serde(rename = "type")]
    order_type: &'static str,
    time_in_force: &'static str,
    qty: String,
    /// Negative limit = net credit for multi-leg orders.
    limit_price: String,
    client_order_id: &'a str,
    legs: Vec<MlegLeg<'a>>,
}

#[derive(Debug, Serialize)]
struct MlegLeg<'a> {
    symbol: &'a str,
    side: &'static str,
    position_intent: &'static str,
    ratio_qty: &'static str,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    #[serde(default)]
    client_order_id: String,
    status: String,
    #[serde(default)]
    filled_qty: Option<String>,
    #[serde(default)]
    filled_avg_price: Option<String>,
    #[serde(default)]
    commission: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Alpaca trading + market-data client.
pub struct AlpacaClient {
    http: Client,
    api_key: String,
    api_secret: SecretString,
    trading_url: String,
    data_url: String,
}

impl AlpacaClient {
    /// Create a client against the paper or live trading endpoint.
    pub fn new(api_key: String, api_secret: SecretString, paper: bool) -> Result<Self> {
        let trading_url = if paper { PAPER_TRADING_URL } else { LIVE_TRADING_URL };
        Self::with_base_urls(api_key, api_secret, trading_url, DATA_URL)
    }

    /// Resolve credentials from the environment and apply URL overrides.
    pub fn from_config(cfg: &BrokerConfig) -> Result<Self> {
        let api_key = AppConfig::resolve_env(&cfg.api_key_env)?;
        let api_secret = SecretString::new(AppConfig::resolve_env(&cfg.api_secret_env)?);
        let default_trading = if cfg.paper { PAPER_TRADING_URL } else { LIVE_TRADING_URL };
        Self::with_base_urls(
            api_key,
            api_secret,
            cfg.trading_url.as_deref().unwrap_or(default_trading),
            cfg.data_url.as_deref().unwrap_or(DATA_URL),
        )
    }

    /// Create a client with explicit base URLs (overrides and tests).
    pub fn with_base_urls(
        api_key: String,
        api_secret: SecretString,
        trading_url: &str,
        data_url: &str,
    ) -> Result<Self> {
        if api_key.is_empty() {
            anyhow::bail!("Alpaca API key is empty");
        }

        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("IRONFLY/0.1.0 (earnings-iron-fly)")
            .build()
            .context("Failed to build HTTP client for Alpaca")?;

        info!(trading_url, "Alpaca client initialised");

        Ok(Self {
            http,
            api_key,
            api_secret,
            trading_url: trading_url.trim_end_matches('/').to_string(),
            data_url: data_url.trim_end_matches('/').to_string(),
        })
    }

    // -- Internal helpers ------------------------------------------------

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", self.api_secret.expose_secret())
    }

    async fn send(&self, req: RequestBuilder, what: &str) -> Result<Response> {
        let resp = self
            .authed(req)
            .send()
            .await
            .with_context(|| format!("Alpaca {what} request failed"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Alpaca {what} error {status}: {body}");
        }
        Ok(resp)
    }

    fn parse_decimal(raw: &str, field: &str) -> Result<Decimal> {
        Decimal::from_str(raw.trim()).with_context(|| format!("Invalid {field}: {raw:?}"))
    }

    fn float_to_decimal(value: f64, field: &str) -> Result<Decimal> {
        Decimal::from_f64(value).with_context(|| format!("Invalid {field}: {value}"))
    }

    fn convert_contract(raw: AlpacaContract) -> Result<OptionContract> {
        let option_type = match raw.kind.to_lowercase().as_str() {
            "call" => OptionType::Call,
            "put" => OptionType::Put,
            other => anyhow::bail!("Unknown option type {other:?} for {}", raw.symbol),
        };
        Ok(OptionContract {
            strike_price: Self::parse_decimal(&raw.strike_price, "strike_price")?,
            symbol: raw.symbol,
            option_type,
            expiration: raw.expiration_date,
        })
    }

    fn convert_order(raw: OrderResponse) -> Result<OrderState> {
        let status = match raw.status.as_str() {
            "filled" => OrderStatus::Filled,
            "canceled" | "cancelled" | "expired" | "rejected" | "done_for_day" | "replaced" => {
                OrderStatus::Closed
            }
            _ => OrderStatus::Working,
        };
        let filled_quantity = match raw.filled_qty.as_deref() {
            Some(q) if !q.trim().is_empty() => Self::parse_decimal(q, "filled_qty")?
                .trunc()
                .to_u32()
                .unwrap_or(0),
            _ => 0,
        };
        let filled_avg_price = match raw.filled_avg_price.as_deref() {
            Some(p) if !p.trim().is_empty() => Self::parse_decimal(p, "filled_avg_price")?,
            _ => Decimal::ZERO,
        };
        let commission = match raw.commission.as_deref() {
            Some(c) if !c.trim().is_empty() => Self::parse_decimal(c, "commission")?,
            _ => Decimal::ZERO,
        };
        Ok(OrderState {
            status,
            filled_quantity,
            filled_avg_price,
            commission,
        })
    }

    fn open_leg(symbol: &str, sell: bool) -> MlegLeg<'_> {
        MlegLeg {
            symbol,
            side: if sell { "sell" } else { "buy" },
            position_intent: if sell { "sell_to_open" } else { "buy_to_open" },
            ratio_qty: "1",
        }
    }

    fn order_request(order: &IronFlyOrder) -> MlegOrderRequest<'_> {
        MlegOrderRequest {
            order_class: "mleg",
            order_type: "limit",
            time_in_force: "day",
            qty: order.quantity.to_string(),
            limit_price: (-order.limit_credit).round_dp(2).to_string(),
            client_order_id: &order.client_order_id,
            legs: vec![
                Self::open_leg(&order.legs.short_call, true),
                Self::open_leg(&order.legs.short_put, true),
                Self::open_leg(&order.legs.long_call, false),
                Self::open_leg(&order.legs.long_put, false),
            ],
        }
    }
}

#[async_trait]
impl Broker for AlpacaClient {
    async fn is_market_open(&self) -> Result<bool> {
        let url = format!("{}/v2/clock", self.trading_url);
        let clock: ClockResponse = self
            .send(self.http.get(&url), "clock")
            .await?
            .json()
            .await
            .context("Failed to parse Alpaca clock response")?;
        Ok(clock.is_open)
    }

    async fn portfolio_value(&self) -> Result<Decimal> {
        let url = format!("{}/v2/account", self.trading_url);
        let account: AccountResponse = self
            .send(self.http.get(&url), "account")
            .await?
            .json()
            .await
            .context("Failed to parse Alpaca account response")?;
        let equity = Self::parse_decimal(&account.equity, "equity")?;
        debug!(equity = %equity, "Portfolio value fetched");
        Ok(equity)
    }

    async fn option_chain(
        &self,
        underlying: &str,
        expiration: NaiveDate,
    ) -> Result<Vec<OptionContract>> {
        let url = format!("{}/v2/options/contracts", self.trading_url);
        let expiration_str = expiration.format("%Y-%m-%d").to_string();
        let limit_str = CHAIN_PAGE_LIMIT.to_string();
        let mut contracts = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query: Vec<(&str, &str)> = vec![
                ("underlying_symbols", underlying),
                ("expiration_date", expiration_str.as_str()),
                ("limit", limit_str.as_str()),
            ];
            if let Some(token) = page_token.as_deref() {
                query.push(("page_token", token));
            }

            let page: ContractsPage = self
                .send(self.http.get(&url).query(&query), "option contracts")
                .await?
                .json()
                .await
                .context("Failed to parse Alpaca option contracts response")?;

            for raw in page.option_contracts {
                contracts.push(Self::convert_contract(raw)?);
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!(
            underlying,
            expiration = %expiration,
            count = contracts.len(),
            "Option chain fetched"
        );
        Ok(contracts)
    }

    async fn spot_price(&self, ticker: &str) -> Result<Decimal> {
        let url = format!(
            "{}/v2/stocks/{}/trades/latest",
            self.data_url,
            urlencoding::encode(ticker)
        );
        let latest: LatestTradeResponse = self
            .send(self.http.get(&url), "latest trade")
            .await?
            .json()
            .await
            .context("Failed to parse Alpaca latest trade response")?;
        Self::float_to_decimal(latest.trade.price, "trade price")
    }

    async fn option_quote(&self, symbol: &str) -> Result<Quote> {
        let url = format!("{}/v1beta1/options/quotes/latest", self.data_url);
        let mut latest: LatestQuotesResponse = self
            .send(
                self.http.get(&url).query(&[("symbols", symbol)]),
                "option quote",
            )
            .await?
            .json()
            .await
            .context("Failed to parse Alpaca option quote response")?;

        let quote = latest
            .quotes
            .remove(symbol)
            .with_context(|| format!("No quote returned for {symbol}"))?;

        Ok(Quote {
            bid: Self::float_to_decimal(quote.bid, "bid")?,
            ask: Self::float_to_decimal(quote.ask, "ask")?,
        })
    }

    async fn submit_iron_fly(&self, order: &IronFlyOrder) -> Result<OrderTicket> {
        let url = format!("{}/v2/orders", self.trading_url);
        let body = Self::order_request(order);
        let resp: OrderResponse = self
            .send(self.http.post(&url).json(&body), "submit order")
            .await?
            .json()
            .await
            .context("Failed to parse Alpaca order response")?;

        info!(
            order_id = %resp.id,
            status = %resp.status,
            qty = order.quantity,
            limit = %order.limit_credit,
            "Iron fly order accepted"
        );

        Ok(OrderTicket {
            client_order_id: if resp.client_order_id.is_empty() {
                order.client_order_id.clone()
            } else {
                resp.client_order_id
            },
            order_id: resp.id,
        })
    }

    async fn order_state(&self, order_id: &str) -> Result<OrderState> {
        let url = format!("{}/v2/orders/{}", self.trading_url, urlencoding::encode(order_id));
        let resp: OrderResponse = self
            .send(self.http.get(&url), "order status")
            .await?
            .json()
            .await
            .context("Failed to parse Alpaca order status response")?;
        Self::convert_order(resp)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let url = format!("{}/v2/orders/{}", self.trading_url, urlencoding::encode(order_id));
        self.send(self.http.delete(&url), "cancel order").await?;
        info!(order_id, "Cancel requested");
        Ok(())
    }

    fn name(&self) -> &str {
        BROKER_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
