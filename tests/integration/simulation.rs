//! End-to-end simulation harness.
//!
//! Drives the scanner and the backtester against the mock collaborators
//! with a real JSON-lines ledger on disk, checking the lifecycle rules
//! that only show across cycles and restarts.

use chrono::Duration;
use rust_decimal_macros::dec;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

use sharpline::backtest::cache::SnapshotCache;
use sharpline::backtest::runner::Backtester;
use sharpline::config::AppConfig;
use sharpline::engine::scanner::{ScanSettings, Scanner};
use sharpline::engine::tracker::{BetLifecycleTracker, TrackerConfig};
use sharpline::storage::{JsonlLedger, LedgerStore};
use sharpline::strategy::StrategyPipeline;
use sharpline::types::{BankrollState, BetMode, BetStatus, MarketType};

use crate::mock_platform::{base_time, default_slate, MockExecutor, MockHistory, MockOdds, MockResults};

const CONFIG: &str = r#"
    [agent]
    name = "SHARPLINE-SIM"
    scan_interval_secs = 60
    mode = "paper"

    [bankroll]
    amount = 1000.0
    kelly_fraction = 0.25

    [strategy]
    devig_method = "proportional"
    min_ev_threshold = 0.03
    max_bets_per_cycle = 0

    [odds_api]
    api_key_env = "ODDS_API_KEY"
    sports = ["basketball_nba"]
    sharp_books = ["pinnacle"]
    betting_bookmakers = ["bet365"]
"#;

fn make_config(mode: &str) -> AppConfig {
    let toml = CONFIG
        .replace("mode = \"paper\"", &format!("mode = \"{mode}\""))
        + if mode == "live" { "\n[executor]\nendpoint = \"http://localhost:9/place\"\n" } else { "" };
    AppConfig::from_toml(&toml).unwrap()
}

fn temp_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("sharpline-{tag}-{}", uuid::Uuid::new_v4()))
}

fn open_tracker(dir: &PathBuf) -> BetLifecycleTracker<JsonlLedger> {
    BetLifecycleTracker::open(JsonlLedger::open(dir).unwrap(), TrackerConfig::default()).unwrap()
}

struct Harness {
    scanner: Scanner<JsonlLedger>,
    odds: MockOdds,
    exec: MockExecutor,
    results: MockResults,
    _shutdown: watch::Sender<bool>,
}

fn make_harness(cfg: &AppConfig, dir: &PathBuf) -> Harness {
    let odds = MockOdds::new(default_slate());
    let exec = MockExecutor::default();
    let results = MockResults::default();
    let (tx, rx) = watch::channel(false);

    let scanner = Scanner::new(
        Box::new(odds.clone()),
        Box::new(exec.clone()),
        StrategyPipeline::from_config(cfg),
        open_tracker(dir),
        ScanSettings::from_config(cfg),
        rx,
    )
    .with_settlement(Box::new(results.clone()));

    Harness { scanner, odds, exec, results, _shutdown: tx }
}

#[tokio::test]
async fn test_paper_scan_settle_and_restart() {
    let dir = temp_dir("paper");
    let cfg = make_config("paper");
    let mut h = make_harness(&cfg, &dir);

    // cycle 1: two of three events carry an edge
    let first = h.scanner.run_cycle_at(base_time()).await.unwrap();
    assert_eq!(first.opportunities, 2);
    assert_eq!(first.placed, 2);
    assert_eq!(first.staked, dec!(25) + h.exec.requests()[1].stake);
    assert_eq!(h.exec.requests()[0].event_id, "nba-1");

    // cycle 2: same slate, nothing new
    let second = h.scanner.run_cycle_at(base_time() + Duration::minutes(10)).await.unwrap();
    assert_eq!(second.placed, 0);
    assert_eq!(h.exec.requests().len(), 2);

    // cycle 3: nba-1 is final, home side won; every event has started
    let slate = default_slate();
    h.results.finish(&slate[0], 112, 104);
    let third = h.scanner.run_cycle_at(base_time() + Duration::days(1)).await.unwrap();
    assert_eq!(third.settled, 1);
    assert_eq!(third.opportunities, 0);
    assert_eq!(h.odds.calls(), 3);

    // restart from disk
    drop(h);
    let tracker = open_tracker(&dir);
    let summary = tracker.summary(BetMode::Paper);
    assert_eq!(summary.won, 1);
    assert_eq!(summary.pending, 1);
    assert_eq!(summary.profit_loss, dec!(31.25));
    assert_eq!(tracker.summary(BetMode::Live), Default::default());

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_repeated_failures_ignored_across_restart() {
    let dir = temp_dir("failures");
    let mut cfg = make_config("live");
    cfg.strategy.max_bets_per_cycle = 1;
    let mut h = make_harness(&cfg, &dir);
    h.exec.set_error("price moved");

    for i in 0..3 {
        let report = h.scanner.run_cycle_at(base_time() + Duration::minutes(i)).await.unwrap();
        assert_eq!(report.failed, 1);
    }
    // the top opportunity is now ignored; the next one gets its turn
    h.scanner.run_cycle_at(base_time() + Duration::minutes(5)).await.unwrap();
    let requests = h.exec.requests();
    assert_eq!(requests.len(), 4);
    assert!(requests[..3].iter().all(|r| r.event_id == "nba-1"));
    assert_eq!(requests[3].event_id, "nba-2");

    drop(h);
    let tracker = open_tracker(&dir);
    let ignored = tracker.ignored_report(BetMode::Live);
    assert_eq!(ignored.len(), 1);
    assert_eq!(ignored[0].key.event_id, "nba-1");
    assert_eq!(ignored[0].failure_count, 3);
    assert_eq!(ignored[0].last_reason.as_deref(), Some("price moved"));
    assert!(tracker.ignored_report(BetMode::Paper).is_empty());
    assert_eq!(tracker.summary(BetMode::Live).not_placed, 4);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_fetch_failure_skips_sport_without_aborting() {
    let dir = temp_dir("fetch");
    let cfg = make_config("paper");
    let mut h = make_harness(&cfg, &dir);
    h.odds.set_error("HTTP 429 quota exhausted");

    let report = h.scanner.run_cycle_at(base_time()).await.unwrap();
    assert_eq!(report.sports_failed, 1);
    assert_eq!(report.placed, 0);

    h.odds.clear_error();
    let report = h.scanner.run_cycle_at(base_time()).await.unwrap();
    assert_eq!(report.placed, 2);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_dry_run_leaves_ledger_empty() {
    let dir = temp_dir("dry");
    let cfg = make_config("dry_run");
    let mut h = make_harness(&cfg, &dir);

    let report = h.scanner.run_cycle_at(base_time()).await.unwrap();
    assert_eq!(report.placed, 2);
    assert!(h.scanner.tracker().store().scan().unwrap().is_empty());

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_backtest_reuses_disk_cache_across_runs() {
    let cache_dir = temp_dir("bt-cache");
    let cfg = make_config("paper");
    let history = MockHistory::default();
    let results = MockResults::default();
    let slate = default_slate();
    results.finish(&slate[0], 120, 99);
    results.finish(&slate[1], 101, 108);
    results.finish(&slate[2], 95, 95);

    let make_backtester = || {
        Backtester::new(
            StrategyPipeline::from_config(&cfg),
            Arc::new(history.clone()),
            Arc::new(results.clone()),
            SnapshotCache::with_dir(&cache_dir).unwrap(),
            vec![MarketType::H2h],
            cfg.odds_api.sharp_books.clone(),
            BankrollState { amount: dec!(1000), risk_fraction: 0.25 },
        )
    };
    let sports = cfg.odds_api.sports.clone();
    let start = base_time() - Duration::hours(12);

    let first = make_backtester()
        .run(&sports, start, base_time(), Duration::hours(6))
        .await
        .unwrap();
    assert_eq!(history.calls(), 3);
    assert_eq!(first.bets, 2);
    assert_eq!(first.wins, 1);
    assert_eq!(first.losses, 1);
    assert_eq!(first.trade_log[0].status, BetStatus::Won);

    let second = make_backtester()
        .run(&sports, start, base_time(), Duration::hours(6))
        .await
        .unwrap();
    assert_eq!(history.calls(), 3, "second run must be served from the cache");
    assert_eq!(first, second);

    let _ = std::fs::remove_dir_all(&cache_dir);
}
