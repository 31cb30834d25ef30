//! IRONFLY: earnings iron-fly entry engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! connects the broker, signal provider and trade ledger, then runs exactly
//! one evaluation cycle. Exit code 0 on a completed cycle, 1 on any fatal
//! condition.

use anyhow::Result;
use chrono::Utc;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use ironfly::broker::alpaca::AlpacaClient;
use ironfly::broker::Broker;
use ironfly::config::{self, AppConfig};
use ironfly::engine::cycle::{CycleReport, CycleRunner};
use ironfly::signals::http::HttpSignalProvider;
use ironfly::signals::SignalProvider;
use ironfly::storage::ledger::TradeLedger;
use ironfly::storage::mirror::LedgerMirror;
use ironfly::storage::LedgerWriter;
use ironfly::types::FlyError;

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = match config::AppConfig::load("config.toml") {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e:#}");
            return ExitCode::from(1);
        }
    };

    init_logging(&cfg);

    info!(
        agent_name = %cfg.agent.name,
        timezone = %cfg.agent.timezone,
        paper = cfg.broker.paper,
        dry_run = cfg.agent.dry_run,
        "IRONFLY starting up"
    );

    match run(&cfg).await {
        Ok(report) => {
            log_cycle_report(&report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            match e.downcast_ref::<FlyError>() {
                Some(fly) if fly.is_fatal() => error!(error = %fly, "Cycle aborted"),
                _ => error!(error = %format!("{e:#}"), "Startup failed"),
            }
            ExitCode::from(1)
        }
    }
}

/// Wire the components and run one cycle.
async fn run(cfg: &AppConfig) -> Result<CycleReport> {
    // -- Broker ------------------------------------------------------------

    let broker: Arc<dyn Broker> = match AlpacaClient::from_config(&cfg.broker) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            return Err(FlyError::BrokerUnavailable {
                broker: "alpaca".into(),
                message: format!("{e:#}"),
            }
            .into())
        }
    };

    // -- Signals -----------------------------------------------------------

    let signals_key = match cfg.signals.api_key_env.as_deref() {
        Some(env) => Some(AppConfig::resolve_env(env)?),
        None => None,
    };
    let signals: Arc<dyn SignalProvider> = Arc::new(
        HttpSignalProvider::new(&cfg.signals.base_url, signals_key)
            .map_err(|e| FlyError::SignalsUnavailable(format!("{e:#}")))?,
    );

    // -- Ledger ------------------------------------------------------------

    let ledger = TradeLedger::connect(&cfg.ledger.database_url)
        .await
        .map_err(|e| FlyError::Storage(format!("{e:#}")))?;

    let mirror = match cfg.mirror.url_env.as_deref() {
        Some(env) => match std::env::var(env) {
            Ok(url) if !url.trim().is_empty() => Some(LedgerMirror::new(&url)?),
            _ => {
                warn!(env, "Mirror URL not set, mirroring disabled");
                None
            }
        },
        None => None,
    };

    // -- Cycle -------------------------------------------------------------

    let runner = CycleRunner::from_config(cfg, broker, signals, LedgerWriter::new(ledger, mirror))?;
    let report = runner.run(Utc::now()).await?;
    Ok(report)
}

/// Log a human-readable cycle summary.
fn log_cycle_report(report: &CycleReport) {
    for (event, decision) in &report.decisions {
        info!(event = %event, decision = %decision, "Decision");
    }
    for failure in &report.write_failures {
        warn!(failure = %failure, "Trade not recorded locally");
    }
    info!(
        candidates = report.decisions.len(),
        submitted = report.submitted(),
        recorded = report.recorded,
        write_failures = report.write_failures.len(),
        portfolio = format!("${:.2}", report.portfolio.total_value),
        adjusted = format!("${:.2}", report.adjusted_value),
        "Cycle complete"
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging(cfg: &AppConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ironfly=info"));

    let json_logging = std::env::var("IRONFLY_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }

    let _ = cfg;
}
