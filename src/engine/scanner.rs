//! Scan cycle.
//!
//! One cycle: settle what can be settled, fetch odds for every configured
//! sport concurrently and normalize them, run the strategy pipeline, then
//! walk the ranked opportunities through admission and placement. An
//! ignored outcome is dropped before the one-bet-per-event pick, so the
//! next-best outcome of that event can still be bet. A sport whose fetch
//! fails is skipped for the cycle; a snapshot whose maths fails is skipped
//! by the pipeline.
//!
//! Shutdown is checked before every placement. A placement that has
//! started always runs to a definite outcome and is recorded.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::executor::execute;
use super::settler::{settle_pending, OutcomeRule, ScoreRules};
use super::tracker::{AttemptResult, BetLifecycleTracker};
use crate::config::{AppConfig, RunMode};
use crate::data::normalizer::normalize_events;
use crate::platforms::{OddsProvider, PlacementExecutor, SettlementSource};
use crate::storage::LedgerStore;
use crate::strategy::{one_per_event, StrategyPipeline};
use crate::types::{BankrollState, BetStatus, MarketType, PlacementOutcome, PlacementRequest};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub sports: Vec<String>,
    pub markets: Vec<MarketType>,
    pub sharp_books: Vec<String>,
    pub mode: RunMode,
    pub bankroll: BankrollState,
    pub one_bet_per_event: bool,
    /// Placements per cycle. 0 = unlimited.
    pub max_bets_per_cycle: usize,
}

impl ScanSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            sports: cfg.odds_api.sports.clone(),
            markets: cfg.odds_api.markets.clone(),
            sharp_books: cfg.odds_api.sharp_books.clone(),
            mode: cfg.agent.mode,
            bankroll: BankrollState {
                amount: cfg.bankroll.amount,
                risk_fraction: cfg.bankroll.kelly_fraction,
            },
            one_bet_per_event: cfg.strategy.one_bet_per_event,
            max_bets_per_cycle: cfg.strategy.max_bets_per_cycle,
        }
    }
}

// ---------------------------------------------------------------------------
// Cycle report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    pub sports_scanned: usize,
    pub sports_failed: usize,
    pub snapshots: usize,
    pub math_failures: usize,
    pub opportunities: usize,
    pub admitted: usize,
    pub placed: usize,
    pub failed: usize,
    pub duplicates: usize,
    pub settled: usize,
    pub staked: Decimal,
    /// Stopped early on a shutdown request.
    pub interrupted: bool,
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

pub struct Scanner<S: LedgerStore> {
    provider: Box<dyn OddsProvider>,
    settlement: Option<Box<dyn SettlementSource>>,
    executor: Box<dyn PlacementExecutor>,
    rule: Box<dyn OutcomeRule>,
    pipeline: StrategyPipeline,
    tracker: BetLifecycleTracker<S>,
    settings: ScanSettings,
    shutdown: watch::Receiver<bool>,
    cycle: u64,
}

impl<S: LedgerStore> Scanner<S> {
    pub fn new(
        provider: Box<dyn OddsProvider>,
        executor: Box<dyn PlacementExecutor>,
        pipeline: StrategyPipeline,
        tracker: BetLifecycleTracker<S>,
        settings: ScanSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            provider,
            settlement: None,
            executor,
            rule: Box::new(ScoreRules),
            pipeline,
            tracker,
            settings,
            shutdown,
            cycle: 0,
        }
    }

    /// Settle pending bets at the start of every cycle.
    pub fn with_settlement(mut self, source: Box<dyn SettlementSource>) -> Self {
        self.settlement = Some(source);
        self
    }

    pub fn with_rule(mut self, rule: Box<dyn OutcomeRule>) -> Self {
        self.rule = rule;
        self
    }

    pub fn tracker(&self) -> &BetLifecycleTracker<S> {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut BetLifecycleTracker<S> {
        &mut self.tracker
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Run one cycle as of `now`.
    pub async fn run_cycle_at(&mut self, now: DateTime<Utc>) -> Result<CycleReport> {
        if self.settings.mode == RunMode::Live && !self.executor.is_live() {
            bail!("live mode requires a live placement executor");
        }
        self.cycle += 1;
        let mut report = CycleReport {
            cycle: self.cycle,
            ..CycleReport::default()
        };
        info!(cycle = self.cycle, mode = ?self.settings.mode, "Starting cycle");

        // 1. Settle
        if let Some(source) = &self.settlement {
            let summary = settle_pending(&mut self.tracker, source.as_ref(), self.rule.as_ref(), now).await?;
            report.settled = summary.bets_settled;
        }

        // 2. Fetch + normalize
        if self.shutdown_requested() {
            report.interrupted = true;
            return Ok(report);
        }
        let fetches = join_all(
            self.settings
                .sports
                .iter()
                .map(|sport| self.provider.fetch_odds(sport, &self.settings.markets)),
        )
        .await;

        let mut snapshots = Vec::new();
        for (sport, fetched) in self.settings.sports.iter().zip(fetches) {
            match fetched {
                Ok(events) => {
                    report.sports_scanned += 1;
                    let snaps = normalize_events(&events, &self.settings.markets, &self.settings.sharp_books, now);
                    debug!(sport = %sport, events = events.len(), snapshots = snaps.len(), "Sport normalized");
                    snapshots.extend(snaps);
                }
                Err(e) => {
                    warn!(sport = %sport, provider = self.provider.name(), error = %e, "Odds fetch failed, skipping sport");
                    report.sports_failed += 1;
                }
            }
        }

        // 3. Strategy
        let eval = self.pipeline.evaluate_all(&snapshots, &self.settings.bankroll, now);
        report.snapshots = eval.snapshots;
        report.math_failures = eval.failures.len();
        report.opportunities = eval.opportunities.len();

        // 4. Admission, on the full ranked list so an ignored outcome
        // leaves the rest of its event eligible
        let mut candidates = eval.opportunities;
        let ledger_mode = self.settings.mode.ledger_mode();
        if let Some(mode) = ledger_mode {
            candidates = self.tracker.filter_admissible(candidates, mode);
        }
        if self.settings.one_bet_per_event {
            candidates = one_per_event(candidates);
        }
        if self.settings.max_bets_per_cycle > 0 {
            candidates.truncate(self.settings.max_bets_per_cycle);
        }
        report.admitted = candidates.len();

        // 5. Placement
        for opp in &candidates {
            if self.shutdown_requested() {
                info!("Shutdown requested, stopping before next placement");
                report.interrupted = true;
                break;
            }

            let request = PlacementRequest::for_opportunity(opp);
            let outcome = execute(self.executor.as_ref(), &request).await;

            let Some(mode) = ledger_mode else {
                if matches!(outcome, PlacementOutcome::Placed(_)) {
                    report.placed += 1;
                    report.staked += request.stake;
                }
                continue;
            };

            match self.tracker.record_attempt(opp, mode, outcome, now)? {
                AttemptResult::Recorded(rec) if rec.status == BetStatus::Pending => {
                    report.placed += 1;
                    report.staked += rec.stake;
                }
                AttemptResult::Recorded(_) => report.failed += 1,
                AttemptResult::Duplicate { .. } => report.duplicates += 1,
            }
        }

        log_cycle_report(&report);
        Ok(report)
    }
}

/// Log a human-readable cycle summary.
pub fn log_cycle_report(report: &CycleReport) {
    info!(
        cycle = report.cycle,
        sports = report.sports_scanned,
        sports_failed = report.sports_failed,
        snapshots = report.snapshots,
        math_failures = report.math_failures,
        opportunities = report.opportunities,
        admitted = report.admitted,
        placed = report.placed,
        failed = report.failed,
        settled = report.settled,
        staked = format!("{:.2}", report.staked),
        "Cycle complete"
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
