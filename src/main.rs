//! SHARPLINE: sports-betting edge detection and stake sizing.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the bet ledger and either runs the scan loop with graceful
//! shutdown or one of the offline commands (backtest, reports, manual
//! resolution).

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use sharpline::backtest::cache::SnapshotCache;
use sharpline::backtest::runner::{log_backtest_report, Backtester};
use sharpline::config::{AppConfig, RunMode};
use sharpline::engine::executor::{HttpExecutor, PaperExecutor};
use sharpline::engine::scanner::{ScanSettings, Scanner};
use sharpline::engine::tracker::{BetLifecycleTracker, TrackerConfig};
use sharpline::platforms::odds_api::OddsApiClient;
use sharpline::platforms::PlacementExecutor;
use sharpline::storage::JsonlLedger;
use sharpline::strategy::StrategyPipeline;
use sharpline::types::{BankrollState, BetMode, BetStatus};

const BANNER: &str = r#"
 ____  _   _    _    ____  ____  _     ___ _   _ _____
/ ___|| | | |  / \  |  _ \|  _ \| |   |_ _| \ | | ____|
\___ \| |_| | / _ \ | |_) | |_) | |    | ||  \| |  _|
 ___) |  _  |/ ___ \|  _ <|  __/| |___ | || |\  | |___
|____/|_| |_/_/   \_\_| \_\_|   |_____|___|_| \_|_____|

  Edge detection · Kelly sizing · Bet lifecycle
"#;

#[derive(Parser, Debug)]
#[command(name = "sharpline")]
#[command(about = "Sports-betting edge detection, Kelly sizing and bet lifecycle tracking")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum Command {
    /// Run the scan loop until Ctrl+C (default)
    Scan,
    /// Run a single scan cycle and exit
    Once,
    /// Replay historical odds over the configured date range
    Backtest,
    /// Print the ledger summary and pending bets
    Report,
    /// Print keys ignored after repeated placement failures
    Ignored,
    /// Manually set the result of a bet
    Resolve {
        bet_id: String,
        /// won, lost or void
        status: BetStatus,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Scan);

    let cfg = AppConfig::load(&cli.config)?;

    init_logging();

    match command {
        Command::Scan | Command::Once => {
            println!("{BANNER}");
            run_scanner(&cfg, command == Command::Once).await
        }
        Command::Backtest => run_backtest(&cfg).await,
        Command::Report => print_report(&cfg),
        Command::Ignored => print_ignored(&cfg),
        Command::Resolve { bet_id, status } => resolve(&cfg, &bet_id, status),
    }
}

fn open_tracker(cfg: &AppConfig) -> Result<BetLifecycleTracker<JsonlLedger>> {
    let store = JsonlLedger::open(&cfg.lifecycle.ledger_dir)?;
    BetLifecycleTracker::open(
        store,
        TrackerConfig {
            failure_threshold: cfg.lifecycle.failure_threshold,
            skip_already_bet_events: cfg.strategy.skip_already_bet_events,
        },
    )
}

fn odds_client(cfg: &AppConfig) -> Result<OddsApiClient> {
    let key = AppConfig::resolve_env(&cfg.odds_api.api_key_env)?;
    OddsApiClient::new(&cfg.odds_api, SecretString::new(key))
}

fn build_executor(cfg: &AppConfig) -> Result<Box<dyn PlacementExecutor>> {
    Ok(match cfg.agent.mode {
        RunMode::Live => {
            let endpoint = cfg
                .executor
                .endpoint
                .as_deref()
                .context("live mode requires executor.endpoint")?;
            let key = match &cfg.executor.api_key_env {
                Some(env) => Some(SecretString::new(AppConfig::resolve_env(env)?)),
                None => None,
            };
            Box::new(HttpExecutor::new(endpoint, key, cfg.odds_api.timeout_secs)?)
        }
        RunMode::Paper => Box::new(PaperExecutor::paper()),
        RunMode::DryRun => Box::new(PaperExecutor::dry_run()),
    })
}

// -- Scan loop ---------------------------------------------------------------

async fn run_scanner(cfg: &AppConfig, once: bool) -> Result<()> {
    info!(
        agent_name = %cfg.agent.name,
        mode = ?cfg.agent.mode,
        devig = %cfg.strategy.devig_method,
        bankroll = format!("{:.2}", cfg.bankroll.amount),
        kelly_fraction = cfg.bankroll.kelly_fraction,
        sports = ?cfg.odds_api.sports,
        "SHARPLINE starting up"
    );

    let tracker = open_tracker(cfg)?;
    let pending = tracker.pending().count();
    if pending > 0 {
        info!(pending, "Resumed with pending bets");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    let mut scanner = Scanner::new(
        Box::new(odds_client(cfg)?),
        build_executor(cfg)?,
        StrategyPipeline::from_config(cfg),
        tracker,
        ScanSettings::from_config(cfg),
        shutdown_rx.clone(),
    )
    .with_settlement(Box::new(odds_client(cfg)?));

    if once {
        scanner.run_cycle().await?;
        return Ok(());
    }

    // -- Main loop -------------------------------------------------------

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.agent.scan_interval_secs));
    let mut shutdown = shutdown_rx;

    info!(
        interval_secs = cfg.agent.scan_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = scanner.run_cycle().await {
                    error!(error = %e, "Cycle failed, continuing to next");
                }
                if *shutdown.borrow() {
                    info!("Shutdown signal received.");
                    break;
                }
            }
            _ = shutdown.changed() => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    let mode = cfg.agent.mode.ledger_mode().unwrap_or(BetMode::Paper);
    let summary = scanner.tracker().summary(mode);
    info!(
        pending = summary.pending,
        won = summary.won,
        lost = summary.lost,
        pnl = format!("{:+.2}", summary.profit_loss),
        "SHARPLINE shut down cleanly."
    );

    Ok(())
}

// -- Backtest ----------------------------------------------------------------

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

async fn run_backtest(cfg: &AppConfig) -> Result<()> {
    let bt = &cfg.backtest;
    let (Some(start), Some(end)) = (bt.start, bt.end) else {
        bail!("backtest.start and backtest.end must be set");
    };

    let client = Arc::new(odds_client(cfg)?);
    let cache = match &bt.cache_dir {
        Some(dir) => SnapshotCache::with_dir(dir)?,
        None => SnapshotCache::in_memory(),
    };

    let mut backtester = Backtester::new(
        StrategyPipeline::from_config(cfg),
        client.clone(),
        client,
        cache,
        cfg.odds_api.markets.clone(),
        cfg.odds_api.sharp_books.clone(),
        BankrollState {
            amount: cfg.backtest_bankroll(),
            risk_fraction: cfg.bankroll.kelly_fraction,
        },
    );

    let report = backtester
        .run(
            &cfg.odds_api.sports,
            day_start(start),
            // end date is inclusive
            day_start(end) + chrono::Duration::days(1) - chrono::Duration::seconds(1),
            chrono::Duration::hours(bt.snapshot_interval_hours),
        )
        .await?;

    log_backtest_report(&report);
    let stats = backtester.cache().stats();
    info!(
        fetches = stats.fetches,
        memory_hits = stats.memory_hits,
        disk_hits = stats.disk_hits,
        "Snapshot cache"
    );
    Ok(())
}

// -- Reports -----------------------------------------------------------------

fn print_report(cfg: &AppConfig) -> Result<()> {
    let tracker = open_tracker(cfg)?;
    for mode in [BetMode::Live, BetMode::Paper] {
        let s = tracker.summary(mode);
        println!("== {mode} ==");
        println!(
            "  pending {} ({:.2} at stake) | won {} | lost {} | void {} | not placed {}",
            s.pending, s.pending_stake, s.won, s.lost, s.void, s.not_placed
        );
        println!(
            "  staked {:.2} | P&L {:+.2} | ROI {:+.2}% | hit rate {:.1}%",
            s.total_staked,
            s.profit_loss,
            s.roi() * 100.0,
            s.hit_rate() * 100.0
        );
        for rec in tracker.records(mode).filter(|r| r.is_pending()) {
            println!("  {} {rec}", rec.bet_id);
        }
    }
    Ok(())
}

fn print_ignored(cfg: &AppConfig) -> Result<()> {
    let tracker = open_tracker(cfg)?;
    for mode in [BetMode::Live, BetMode::Paper] {
        let ignored = tracker.ignored_report(mode);
        println!("== {mode}: {} ignored ==", ignored.len());
        for entry in ignored {
            println!(
                "  {} | failures {} | last {} | {}",
                entry.key,
                entry.failure_count,
                entry.last_failure_at.format("%Y-%m-%d %H:%M"),
                entry.last_reason.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}

fn resolve(cfg: &AppConfig, bet_id: &str, status: BetStatus) -> Result<()> {
    let mut tracker = open_tracker(cfg)?;
    match tracker.resolve_bet(bet_id, status, Utc::now())? {
        Some(rec) => println!("Resolved: {rec}"),
        None => warn!(bet_id, status = %status, "Bet already has that status"),
    }
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sharpline=info"));

    let json_logging = std::env::var("SHARPLINE_LOG_JSON").is_ok();

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
}
