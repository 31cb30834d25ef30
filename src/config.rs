//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (broker keys, webhook URL) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use chrono::NaiveTime;
use chrono_tz::Tz;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub broker: BrokerConfig,
    pub signals: SignalsConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub mirror: MirrorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    /// IANA name of the exchange timezone.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Log sized orders instead of submitting them.
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrokerConfig {
    #[serde(default = "default_true")]
    pub paper: bool,
    pub api_key_env: String,
    pub api_secret_env: String,
    /// Overrides for the trading / market-data base URLs.
    #[serde(default)]
    pub trading_url: Option<String>,
    #[serde(default)]
    pub data_url: Option<String>,
    #[serde(default = "default_fill_poll_interval_secs")]
    pub fill_poll_interval_secs: u64,
    /// How long a submitted order may stay unfilled before it is cancelled.
    #[serde(default = "default_fill_timeout_secs")]
    pub fill_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SignalsConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

/// Reference-policy constants. Every field has a default.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StrategyConfig {
    /// Exchange-local "HH:MM" at which the entry window opens.
    pub window_start: String,
    pub window_minutes: i64,
    pub wing_width: Decimal,
    pub credit_divisor: Decimal,
    pub risk_fraction: Decimal,
    pub profit_adjustment_factor: Decimal,
    pub contract_multiplier: Decimal,
    /// Days after the report date for the traded expiration.
    pub expiration_offset_days: i64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            window_start: "15:35".to_string(),
            window_minutes: 40,
            wing_width: dec!(5),
            credit_divisor: dec!(2),
            risk_fraction: dec!(0.06),
            profit_adjustment_factor: dec!(0.5),
            contract_multiplier: dec!(100),
            expiration_offset_days: 1,
        }
    }
}

impl StrategyConfig {
    pub fn window_start_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.window_start, "%H:%M")
            .with_context(|| format!("Invalid strategy.window_start: {}", self.window_start))
    }

    /// Sizing constants must all be positive.
    fn check_divisors(&self) -> Result<()> {
        for (name, value) in [
            ("credit_divisor", self.credit_divisor),
            ("risk_fraction", self.risk_fraction),
            ("contract_multiplier", self.contract_multiplier),
        ] {
            if value <= Decimal::ZERO {
                anyhow::bail!("strategy.{name} must be positive, got {value}");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    pub database_url: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://trades.db".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MirrorConfig {
    /// Env var holding the spreadsheet webhook URL. Unset disables mirroring.
    #[serde(default)]
    pub url_env: Option<String>,
}

fn default_timezone() -> String {
    "America/New_York".to_string()
}

fn default_true() -> bool {
    true
}

fn default_fill_poll_interval_secs() -> u64 {
    2
}

fn default_fill_timeout_secs() -> u64 {
    120
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.strategy.window_start_time()?;
        config.strategy.check_divisors()?;
        config.exchange_tz()?;
        Ok(config)
    }

    /// The exchange timezone.
    pub fn exchange_tz(&self) -> Result<Tz> {
        self.agent
            .timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("Unknown timezone {}: {e}", self.agent.timezone))
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
