use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ironfly::broker::Broker;
use ironfly::config::AppConfig;
use ironfly::engine::cycle::{CycleReport, CycleRunner};
use ironfly::signals::SignalProvider;
use ironfly::storage::ledger::TradeLedger;
use ironfly::storage::mirror::LedgerMirror;
use ironfly::storage::LedgerWriter;
use ironfly::strategy::pricing::Rejection;
use ironfly::strategy::CandidateDecision;
use ironfly::types::*;

use crate::mock_broker::{FillScript, MockBroker, StaticSignals};

const CONFIG: &str = r#"
    [agent]
    name = "IRONFLY-TEST"

    [broker]
    api_key_env = "UNUSED_KEY"
    api_secret_env = "UNUSED_SECRET"
    fill_poll_interval_secs = 0
    fill_timeout_secs = 1

    [signals]
    base_url = "http://localhost"
"#;

/// Friday 2026-10-16 15:40 New York (EDT).
fn in_window() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 19, 40, 0).unwrap()
}

fn report_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
}

struct Harness {
    broker: Arc<MockBroker>,
    ledger: TradeLedger,
    runner: CycleRunner,
}

async fn harness(broker: MockBroker, signals: StaticSignals, mirror: Option<LedgerMirror>) -> Harness {
    harness_with_config(CONFIG, broker, signals, mirror).await
}

async fn harness_with_config(
    config: &str,
    broker: MockBroker,
    signals: StaticSignals,
    mirror: Option<LedgerMirror>,
) -> Harness {
    let cfg = AppConfig::parse(config).unwrap();
    let broker = Arc::new(broker);
    let ledger = TradeLedger::in_memory().await.unwrap();
    let dyn_broker: Arc<dyn Broker> = broker.clone();
    let signals: Arc<dyn SignalProvider> = Arc::new(signals);
    let runner = CycleRunner::from_config(
        &cfg,
        dyn_broker,
        signals,
        LedgerWriter::new(ledger.clone(), mirror),
    )
    .unwrap();

    Harness {
        broker,
        ledger,
        runner,
    }
}

fn decision_for<'a>(report: &'a CycleReport, ticker: &str) -> Vec<&'a CandidateDecision> {
    report
        .decisions
        .iter()
        .filter(|(e, _)| e.ticker == ticker)
        .map(|(_, d)| d)
        .collect()
}

fn past_trade(ticker: &str, open: Decimal, size: u32) -> TradeRecord {
    TradeRecord {
        ticker: ticker.into(),
        implied_move: "5%".into(),
        structure: STRUCTURE_IRON_FLY.into(),
        side: SIDE_CREDIT.into(),
        timing: ReportTiming::AfterClose,
        size,
        short_symbols: "SC,SP".into(),
        long_symbols: "LC,LP".into(),
        open_date: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
        open_price: open,
        open_commission: Decimal::ZERO,
        close_date: None,
        close_price: None,
        close_commission: None,
    }
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_recommended_candidate_is_recorded_and_mirrored() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(serde_json::json!({
            "action": "create",
            "Ticker": "ACME",
            "Size": 109,
            "When": "AMC",
            "Structure": "Iron Fly",
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(
        MockBroker::new(),
        StaticSignals::recommended(report_day(), &["ACME"]),
        Some(LedgerMirror::new(&server.uri()).unwrap()),
    )
    .await;

    let report = h.runner.run(in_window()).await.unwrap();

    assert_eq!(report.submitted(), 1);
    assert_eq!(report.recorded, 1);
    assert!(report.write_failures.is_empty());

    let orders = h.broker.submitted();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].quantity, 109);
    assert_eq!(orders[0].limit_credit, dec!(0.55));
    assert_eq!(orders[0].legs.short_call, MockBroker::symbol("ACME", OptionType::Call, dec!(100)));
    assert_eq!(orders[0].legs.long_call, MockBroker::symbol("ACME", OptionType::Call, dec!(105)));
    assert_eq!(orders[0].legs.long_put, MockBroker::symbol("ACME", OptionType::Put, dec!(95)));

    // Friday report: expiration rolls to Monday.
    assert_eq!(
        h.broker.chain_requests(),
        vec![("ACME".to_string(), NaiveDate::from_ymd_opt(2026, 10, 19).unwrap())]
    );

    let trades = h.ledger.all_trades().await.unwrap();
    assert_eq!(trades.len(), 1);
    let t = &trades[0];
    assert_eq!(t.ticker, "ACME");
    assert_eq!(t.size, 109);
    assert_eq!(t.open_price, dec!(0.55));
    assert_eq!(t.open_commission, dec!(0.65));
    assert_eq!(t.implied_move, "6.12%");
    assert_eq!(t.open_date, report_day());
    assert!(t.close_date.is_none() && t.close_price.is_none() && t.close_commission.is_none());
}

#[tokio::test]
async fn test_realized_profit_shrinks_sizing_base() {
    let h = harness(
        MockBroker::new(),
        StaticSignals::recommended(report_day(), &["ACME"]),
        None,
    )
    .await;

    // (0.70 - 0.50) * 200 * 100 = 4000 realized.
    let id = h
        .ledger
        .persist(&past_trade("OLD", dec!(0.50), 200))
        .await
        .unwrap();
    h.ledger
        .record_close(id, NaiveDate::from_ymd_opt(2026, 9, 2).unwrap(), dec!(0.70), Decimal::ZERO)
        .await
        .unwrap();

    let report = h.runner.run(in_window()).await.unwrap();
    assert_eq!(report.realized_profit, dec!(4000));
    assert_eq!(report.adjusted_value, dec!(98000));
    // floor(98000 * 0.06 / 55) = 106
    assert_eq!(h.broker.submitted()[0].quantity, 106);
}

#[tokio::test]
async fn test_dry_run_sizes_but_never_submits() {
    let config = CONFIG.replace("name = \"IRONFLY-TEST\"", "name = \"IRONFLY-TEST\"\n    dry_run = true");
    let h = harness_with_config(
        &config,
        MockBroker::new(),
        StaticSignals::recommended(report_day(), &["ACME"]),
        None,
    )
    .await;

    let report = h.runner.run(in_window()).await.unwrap();
    assert_eq!(
        decision_for(&report, "ACME"),
        [&CandidateDecision::DryRun { credit: dec!(0.55), quantity: 109 }]
    );
    assert!(h.broker.submitted().is_empty());
    assert!(h.ledger.all_trades().await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Fatal conditions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_market_closed_aborts_cycle() {
    let h = harness(
        MockBroker::closed(),
        StaticSignals::recommended(report_day(), &["ACME"]),
        None,
    )
    .await;

    let err = h.runner.run(in_window()).await.unwrap_err();
    assert!(matches!(err, FlyError::MarketClosed));
    assert!(err.is_fatal());
    assert!(h.broker.submitted().is_empty());
}

#[tokio::test]
async fn test_portfolio_unavailable_aborts_cycle() {
    let h = harness(
        MockBroker::new().with_portfolio(Err("account locked".into())),
        StaticSignals::recommended(report_day(), &["ACME"]),
        None,
    )
    .await;

    let err = h.runner.run(in_window()).await.unwrap_err();
    assert!(matches!(err, FlyError::PortfolioUnavailable(_)));
}

#[tokio::test]
async fn test_calendar_outage_completes_with_no_candidates() {
    let signals = StaticSignals {
        calendar_error: Some("calendar down".into()),
        ..StaticSignals::default()
    };
    let h = harness(MockBroker::new(), signals, None).await;

    let report = h.runner.run(in_window()).await.unwrap();
    assert!(report.decisions.is_empty());
    assert!(h.broker.chain_requests().is_empty());
    assert!(h.broker.submitted().is_empty());
}

#[tokio::test]
async fn test_unreadable_profit_sizes_against_raw_value() {
    let h = harness(
        MockBroker::new(),
        StaticSignals::recommended(report_day(), &["ACME"]),
        None,
    )
    .await;

    // A store missing "Close Price" cannot be aggregated or written.
    sqlx::query("DROP TABLE trades")
        .execute(h.ledger.pool())
        .await
        .unwrap();
    sqlx::query(r#"CREATE TABLE trades ("Ticker" TEXT, "Open Date" TEXT, "Close Date" TEXT)"#)
        .execute(h.ledger.pool())
        .await
        .unwrap();
    assert!(h.ledger.total_realized_profit(dec!(100)).await.is_err());

    let report = h.runner.run(in_window()).await.unwrap();
    assert_eq!(report.realized_profit, Decimal::ZERO);
    assert_eq!(report.adjusted_value, dec!(100000));
    assert_eq!(report.submitted(), 1);
    assert_eq!(h.broker.submitted()[0].quantity, 109);
    assert_eq!(report.recorded, 0);
    assert_eq!(report.write_failures.len(), 1);
}

// ---------------------------------------------------------------------------
// Per-candidate skips
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_non_positive_credit_places_no_order() {
    let broker = MockBroker::new();
    broker.set_fly_quotes("ACME", dec!(0.10), dec!(0.10), dec!(0.50), dec!(0.60));
    let h = harness(broker, StaticSignals::recommended(report_day(), &["ACME"]), None).await;

    let report = h.runner.run(in_window()).await.unwrap();
    assert!(matches!(
        decision_for(&report, "ACME").as_slice(),
        [CandidateDecision::Rejected(Rejection::NonPositiveCredit { .. })]
    ));
    assert!(h.broker.submitted().is_empty());
    assert!(h.ledger.all_trades().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_budget_below_one_contract_places_no_order() {
    // 500 * 0.06 = 30 buys nothing at 0.55 * 100.
    let h = harness(
        MockBroker::new().with_portfolio(Ok(dec!(500))),
        StaticSignals::recommended(report_day(), &["ACME"]),
        None,
    )
    .await;

    let report = h.runner.run(in_window()).await.unwrap();
    assert!(matches!(
        decision_for(&report, "ACME").as_slice(),
        [CandidateDecision::Rejected(Rejection::BelowOneContract { .. })]
    ));
    assert!(h.broker.submitted().is_empty());
    assert!(h.ledger.all_trades().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_outside_window_places_no_order() {
    let h = harness(
        MockBroker::new(),
        StaticSignals::recommended(report_day(), &["ACME"]),
        None,
    )
    .await;

    // 14:00 New York.
    let early = Utc.with_ymd_and_hms(2026, 10, 16, 18, 0, 0).unwrap();
    let report = h.runner.run(early).await.unwrap();
    assert_eq!(decision_for(&report, "ACME"), [&CandidateDecision::OutsideWindow]);
    assert!(h.broker.chain_requests().is_empty());
    assert!(h.broker.submitted().is_empty());
}

#[tokio::test]
async fn test_before_open_report_trades_previous_afternoon() {
    let mut signals = StaticSignals::default();
    // Reports Saturday morning, so trades Friday afternoon.
    let saturday = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
    signals.add_event(saturday, "ACME", ReportTiming::BeforeOpen, "recommend");
    let h = harness(MockBroker::new(), signals, None).await;

    let report = h.runner.run(in_window()).await.unwrap();
    assert_eq!(report.submitted(), 1);
    assert_eq!(h.ledger.all_trades().await.unwrap()[0].timing, ReportTiming::BeforeOpen);
}

#[tokio::test]
async fn test_quote_failure_skips_only_that_candidate() {
    let broker = MockBroker::new();
    // WIDG has a chain but no quotes.
    let mut signals = StaticSignals::recommended(report_day(), &["WIDG", "ACME"]);
    signals.add_event(report_day(), "SKIP", ReportTiming::AfterClose, "avoid");
    let h = harness(broker, signals, None).await;

    let report = h.runner.run(in_window()).await.unwrap();
    assert!(matches!(
        decision_for(&report, "WIDG").as_slice(),
        [CandidateDecision::QuoteFailure { .. }]
    ));
    assert_eq!(decision_for(&report, "SKIP"), [&CandidateDecision::NotRecommended]);
    assert!(decision_for(&report, "ACME")[0].is_submitted());
    assert_eq!(h.ledger.all_trades().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_ticker_already_opened_today_is_skipped() {
    let h = harness(
        MockBroker::new(),
        StaticSignals::recommended(report_day(), &["ACME"]),
        None,
    )
    .await;

    let first = h.runner.run(in_window()).await.unwrap();
    assert_eq!(first.submitted(), 1);

    let second = h.runner.run(in_window()).await.unwrap();
    assert_eq!(decision_for(&second, "ACME"), [&CandidateDecision::AlreadyOpen]);
    assert_eq!(h.broker.submitted().len(), 1);
    assert_eq!(h.ledger.all_trades().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_duplicate_calendar_rows_submit_once() {
    let mut signals = StaticSignals::recommended(report_day(), &["ACME"]);
    signals.add_event(report_day(), "ACME", ReportTiming::AfterClose, "recommend");
    let h = harness(MockBroker::new(), signals, None).await;

    let report = h.runner.run(in_window()).await.unwrap();
    let decisions = decision_for(&report, "ACME");
    assert_eq!(decisions.len(), 2);
    assert!(decisions[0].is_submitted());
    assert_eq!(decisions[1], &CandidateDecision::AlreadyOpen);
    assert_eq!(h.broker.submitted().len(), 1);
}

// ---------------------------------------------------------------------------
// Fills
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_unfilled_order_is_cancelled_and_not_recorded() {
    let h = harness(
        MockBroker::new().with_fill_script(FillScript::Never),
        StaticSignals::recommended(report_day(), &["ACME"]),
        None,
    )
    .await;

    let report = h.runner.run(in_window()).await.unwrap();
    assert_eq!(report.submitted(), 1);
    assert_eq!(report.recorded, 0);
    assert_eq!(h.broker.cancelled(), vec!["mock-0".to_string()]);
    assert!(h.ledger.all_trades().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_mirror_outage_still_records_locally() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(
        MockBroker::new(),
        StaticSignals::recommended(report_day(), &["ACME"]),
        Some(LedgerMirror::new(&server.uri()).unwrap()),
    )
    .await;

    let report = h.runner.run(in_window()).await.unwrap();
    assert_eq!(report.recorded, 1);
    assert_eq!(h.ledger.all_trades().await.unwrap().len(), 1);
}
