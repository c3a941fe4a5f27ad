//! Historical backtesting engine.
//!
//! Steps `as_of` over a date range, pulls the odds as they stood at each
//! step through the snapshot cache, and runs them through the same
//! strategy pipeline the live scanner uses. Each event is bet at most once
//! over the run (its best-ranked opportunity at the first step it shows an
//! edge). Simulated bets are settled from final scores and never touch the
//! live ledger.
//!
//! Stakes are sized against the configured bankroll, which is never
//! debited; the balance history is the cumulative P&L of settled bets in
//! event start order.

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::cache::SnapshotCache;
use crate::engine::settler::{OutcomeRule, ScoreRules};
use crate::platforms::{HistoricalOddsProvider, SettlementSource};
use crate::strategy::{one_per_event, StrategyPipeline};
use crate::types::{
    BankrollState, BetMode, BetRecord, BetStatus, EventResult, EvOpportunity, MarketType,
};

// ---------------------------------------------------------------------------
// Backtest results
// ---------------------------------------------------------------------------

/// Complete backtest performance report.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestReport {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub steps: usize,
    pub snapshots_processed: usize,
    pub opportunities_seen: usize,
    /// Sport requests that failed and were skipped.
    pub fetch_failures: usize,
    pub bets: usize,
    pub wins: usize,
    pub losses: usize,
    pub voids: usize,
    /// Bets with no final result or an undecidable outcome.
    pub unresolved: usize,
    /// wins / (wins + losses)
    pub hit_rate: f64,
    /// Stake of settled bets.
    pub total_staked: Decimal,
    pub profit: Decimal,
    /// profit / total_staked
    pub roi: f64,
    pub avg_ev: f64,
    pub initial_bankroll: Decimal,
    pub final_bankroll: Decimal,
    pub peak_bankroll: Decimal,
    pub max_drawdown: Decimal,
    pub max_drawdown_pct: f64,
    /// Balance after each settled bet, by event start.
    pub balance_history: Vec<(DateTime<Utc>, Decimal)>,
    /// Per-bet log, in placement order.
    pub trade_log: Vec<BacktestTrade>,
}

/// Individual simulated bet.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestTrade {
    pub as_of: DateTime<Utc>,
    pub event_id: String,
    pub sport: String,
    pub market_type: MarketType,
    pub outcome_id: String,
    pub bookmaker_id: String,
    pub decimal_price: f64,
    pub fair_probability: f64,
    pub ev_fraction: f64,
    pub stake: Decimal,
    pub commence_time: DateTime<Utc>,
    /// `Pending` when the bet could not be settled.
    pub status: BetStatus,
    pub pnl: Decimal,
}

// ---------------------------------------------------------------------------
// Backtester
// ---------------------------------------------------------------------------

pub struct Backtester {
    pipeline: StrategyPipeline,
    odds: Arc<dyn HistoricalOddsProvider>,
    results: Arc<dyn SettlementSource>,
    rule: Box<dyn OutcomeRule>,
    cache: SnapshotCache,
    markets: Vec<MarketType>,
    sharp_books: Vec<String>,
    bankroll: BankrollState,
    /// Final results by event id. Only final results are kept.
    result_cache: HashMap<String, EventResult>,
}

impl Backtester {
    pub fn new(
        pipeline: StrategyPipeline,
        odds: Arc<dyn HistoricalOddsProvider>,
        results: Arc<dyn SettlementSource>,
        cache: SnapshotCache,
        markets: Vec<MarketType>,
        sharp_books: Vec<String>,
        bankroll: BankrollState,
    ) -> Self {
        Self {
            pipeline,
            odds,
            results,
            rule: Box::new(ScoreRules),
            cache,
            markets,
            sharp_books,
            bankroll,
            result_cache: HashMap::new(),
        }
    }

    pub fn with_rule(mut self, rule: Box<dyn OutcomeRule>) -> Self {
        self.rule = rule;
        self
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    /// Run a backtest from `start` to `end` inclusive, one step per
    /// `interval`.
    pub async fn run(
        &mut self,
        sports: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Duration,
    ) -> Result<BacktestReport> {
        if interval <= Duration::zero() {
            bail!("Backtest interval must be positive");
        }
        if end < start {
            bail!("Backtest end {end} is before start {start}");
        }

        info!(
            start = %start,
            end = %end,
            interval_hours = interval.num_hours(),
            sports = sports.len(),
            "Starting backtest"
        );

        let mut steps = 0usize;
        let mut snapshots_processed = 0usize;
        let mut opportunities_seen = 0usize;
        let mut fetch_failures = 0usize;
        let mut bet_events: HashSet<String> = HashSet::new();
        let mut placed: Vec<(DateTime<Utc>, EvOpportunity)> = Vec::new();

        let mut as_of = start;
        while as_of <= end {
            steps += 1;
            for sport in sports {
                let snapshots = match self
                    .cache
                    .snapshots_for(self.odds.as_ref(), sport, &self.markets, &self.sharp_books, as_of)
                    .await
                {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(sport = %sport, as_of = %as_of, error = %e, "Historical fetch failed, skipping");
                        fetch_failures += 1;
                        continue;
                    }
                };

                let eval = self.pipeline.evaluate_all(&snapshots, &self.bankroll, as_of);
                snapshots_processed += eval.snapshots;
                opportunities_seen += eval.opportunities.len();

                for opp in one_per_event(eval.opportunities) {
                    if bet_events.insert(opp.event_id.clone()) {
                        debug!(as_of = %as_of, opportunity = %opp, "Simulated bet");
                        placed.push((as_of, opp));
                    }
                }
            }
            as_of += interval;
        }

        let mut trade_log = Vec::with_capacity(placed.len());
        for (at, opp) in placed {
            let record = BetRecord::from_opportunity(&opp, BetMode::Paper, BetStatus::Pending, at);
            let status = self.settle_simulated(&record).await;
            let pnl = record.profit_for(status);
            trade_log.push(BacktestTrade {
                as_of: at,
                event_id: opp.event_id,
                sport: opp.sport,
                market_type: opp.market_type,
                outcome_id: opp.outcome_id,
                bookmaker_id: opp.bookmaker_id,
                decimal_price: opp.decimal_price,
                fair_probability: opp.fair_probability,
                ev_fraction: opp.ev_fraction,
                stake: opp.recommended_stake,
                commence_time: opp.commence_time,
                status,
                pnl,
            });
        }

        let report = summarize(start, end, self.bankroll.amount, trade_log, Counters {
            steps,
            snapshots_processed,
            opportunities_seen,
            fetch_failures,
        });

        info!(
            bets = report.bets,
            wins = report.wins,
            losses = report.losses,
            unresolved = report.unresolved,
            profit = format!("{:.2}", report.profit),
            roi = format!("{:.2}%", report.roi * 100.0),
            cache_fetches = self.cache.stats().fetches,
            "Backtest complete"
        );

        Ok(report)
    }

    /// Settle one simulated bet. Unknown results stay `Pending`.
    async fn settle_simulated(&mut self, bet: &BetRecord) -> BetStatus {
        let result = match self.result_cache.get(&bet.event_id) {
            Some(r) => Some(r.clone()),
            None => match self.results.fetch_result(&bet.sport, &bet.event_id).await {
                Ok(Some(r)) => {
                    self.result_cache.insert(bet.event_id.clone(), r.clone());
                    Some(r)
                }
                Ok(None) => None,
                Err(e) => {
                    warn!(event_id = %bet.event_id, error = %e, "Result unavailable for simulated bet");
                    None
                }
            },
        };

        match result {
            Some(result) => self.rule.settle(bet, &result).unwrap_or(BetStatus::Pending),
            None => BetStatus::Pending,
        }
    }
}

struct Counters {
    steps: usize,
    snapshots_processed: usize,
    opportunities_seen: usize,
    fetch_failures: usize,
}

fn summarize(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    initial_bankroll: Decimal,
    trade_log: Vec<BacktestTrade>,
    counters: Counters,
) -> BacktestReport {
    let count = |s: BetStatus| trade_log.iter().filter(|t| t.status == s).count();
    let wins = count(BetStatus::Won);
    let losses = count(BetStatus::Lost);
    let voids = count(BetStatus::Void);
    let unresolved = count(BetStatus::Pending);

    let settled: Vec<&BacktestTrade> = trade_log.iter().filter(|t| t.status.is_settled()).collect();
    let total_staked: Decimal = settled.iter().map(|t| t.stake).sum();
    let profit: Decimal = settled.iter().map(|t| t.pnl).sum();

    let roi = if total_staked > Decimal::ZERO {
        (profit / total_staked).to_f64().unwrap_or(0.0)
    } else {
        0.0
    };
    let hit_rate = if wins + losses > 0 {
        wins as f64 / (wins + losses) as f64
    } else {
        0.0
    };
    let avg_ev = if trade_log.is_empty() {
        0.0
    } else {
        trade_log.iter().map(|t| t.ev_fraction).sum::<f64>() / trade_log.len() as f64
    };

    // Peak and drawdown over settled bets in event start order
    let mut ordered = settled.clone();
    ordered.sort_by(|a, b| {
        a.commence_time
            .cmp(&b.commence_time)
            .then_with(|| a.event_id.cmp(&b.event_id))
    });

    let mut balance = initial_bankroll;
    let mut peak = initial_bankroll;
    let mut max_dd = Decimal::ZERO;
    let mut max_dd_pct = Decimal::ZERO;
    let mut balance_history = vec![(start, initial_bankroll)];
    for t in ordered {
        balance += t.pnl;
        balance_history.push((t.commence_time, balance));
        if balance > peak {
            peak = balance;
        }
        let dd = peak - balance;
        if dd > max_dd {
            max_dd = dd;
            if peak > Decimal::ZERO {
                max_dd_pct = dd / peak * dec!(100);
            }
        }
    }

    BacktestReport {
        start,
        end,
        steps: counters.steps,
        snapshots_processed: counters.snapshots_processed,
        opportunities_seen: counters.opportunities_seen,
        fetch_failures: counters.fetch_failures,
        bets: trade_log.len(),
        wins,
        losses,
        voids,
        unresolved,
        hit_rate,
        total_staked,
        profit,
        roi,
        avg_ev,
        initial_bankroll,
        final_bankroll: balance,
        peak_bankroll: peak,
        max_drawdown: max_dd,
        max_drawdown_pct: max_dd_pct.to_f64().unwrap_or(0.0),
        balance_history,
        trade_log,
    }
}

/// Print a human-readable report.
pub fn log_backtest_report(report: &BacktestReport) {
    info!(
        range = format!("{} → {}", report.start.format("%Y-%m-%d"), report.end.format("%Y-%m-%d")),
        steps = report.steps,
        snapshots = report.snapshots_processed,
        opportunities = report.opportunities_seen,
        bets = report.bets,
        "Backtest summary"
    );
    info!(
        wins = report.wins,
        losses = report.losses,
        voids = report.voids,
        unresolved = report.unresolved,
        hit_rate = format!("{:.1}%", report.hit_rate * 100.0),
        avg_ev = format!("{:+.2}%", report.avg_ev * 100.0),
        "Backtest outcomes"
    );
    info!(
        staked = format!("{:.2}", report.total_staked),
        profit = format!("{:+.2}", report.profit),
        roi = format!("{:+.2}%", report.roi * 100.0),
        final_bankroll = format!("{:.2}", report.final_bankroll),
        max_drawdown = format!("{:.2} ({:.1}%)", report.max_drawdown, report.max_drawdown_pct),
        "Backtest P&L"
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{HistoricalOddsResponse, RawBookmaker, RawEvent, RawMarket, RawOutcome};
    use crate::strategy::devig::Devigger;
    use crate::strategy::edge::{EdgeConfig, EdgeDetector};
    use crate::strategy::kelly::{KellyConfig, KellySizer};
    use crate::strategy::risk::{FilterConfig, OpportunityFilter};
    use crate::types::{DevigMethod, EngineError};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 1, 0, 0, 0).unwrap()
    }

    fn make_event(id: &str, commence: DateTime<Utc>, soft_home: f64) -> RawEvent {
        let book = |key: &str, home: f64, away: f64| RawBookmaker {
            key: key.to_string(),
            title: key.to_string(),
            last_update: None,
            markets: vec![RawMarket {
                key: "h2h".to_string(),
                last_update: None,
                outcomes: vec![
                    RawOutcome { name: "Home FC".to_string(), price: home, point: None },
                    RawOutcome { name: "Away FC".to_string(), price: away, point: None },
                ],
            }],
        };
        RawEvent {
            id: id.to_string(),
            sport_key: "soccer_test".to_string(),
            commence_time: commence,
            home_team: "Home FC".to_string(),
            away_team: "Away FC".to_string(),
            bookmakers: vec![book("pinnacle", 1.95, 1.95), book("bet365", soft_home, 1.80)],
        }
    }

    /// Two events starting a day apart, both offered at every step.
    struct FixedHistory {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HistoricalOddsProvider for FixedHistory {
        async fn fetch_historical(
            &self,
            _sport: &str,
            _markets: &[MarketType],
            as_of: DateTime<Utc>,
        ) -> Result<HistoricalOddsResponse, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HistoricalOddsResponse {
                timestamp: as_of,
                previous_timestamp: None,
                next_timestamp: None,
                data: vec![
                    make_event("evt-a", t0() + Duration::days(1), 2.20),
                    make_event("evt-b", t0() + Duration::days(2), 2.10),
                ],
            })
        }
    }

    /// evt-a: home wins. evt-b: away wins. Anything else: not final.
    struct FixedResults {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SettlementSource for FixedResults {
        async fn fetch_result(&self, _sport: &str, event_id: &str) -> Result<Option<EventResult>, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (home, away) = match event_id {
                "evt-a" => (2, 0),
                "evt-b" => (0, 1),
                _ => return Ok(None),
            };
            Ok(Some(EventResult {
                event_id: event_id.to_string(),
                home_team: "Home FC".to_string(),
                away_team: "Away FC".to_string(),
                home_score: home,
                away_score: away,
            }))
        }
    }

    fn make_backtester(odds: Arc<FixedHistory>, results: Arc<FixedResults>) -> Backtester {
        let pipeline = StrategyPipeline::new(
            DevigMethod::Proportional,
            Devigger::default(),
            EdgeDetector::new(EdgeConfig {
                sharp_books: vec!["pinnacle".to_string()],
                betting_books: vec!["bet365".to_string()],
            }),
            OpportunityFilter::new(FilterConfig::default()),
            KellySizer::new(KellyConfig::default()),
        );
        Backtester::new(
            pipeline,
            odds,
            results,
            SnapshotCache::in_memory(),
            vec![MarketType::H2h],
            vec!["pinnacle".to_string()],
            BankrollState { amount: dec!(1000), risk_fraction: 0.25 },
        )
    }

    fn sports() -> Vec<String> {
        vec!["soccer_test".to_string()]
    }

    #[tokio::test]
    async fn test_each_event_bet_once_and_settled() {
        let odds = Arc::new(FixedHistory { calls: AtomicUsize::new(0) });
        let results = Arc::new(FixedResults { calls: AtomicUsize::new(0) });
        let mut bt = make_backtester(odds.clone(), results.clone());

        // three steps; events are offered at each one
        let report = bt
            .run(&sports(), t0(), t0() + Duration::hours(24), Duration::hours(12))
            .await
            .unwrap();

        assert_eq!(report.steps, 3);
        assert_eq!(report.bets, 2);
        assert_eq!(report.wins, 1);
        assert_eq!(report.losses, 1);
        assert_eq!(report.unresolved, 0);
        assert!((report.hit_rate - 0.5).abs() < 1e-12);
        assert_eq!(odds.calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.trade_log[0].event_id, "evt-a");
        assert_eq!(report.trade_log[0].outcome_id, "Home FC");
        assert!(report.avg_ev > 0.0);
    }

    #[tokio::test]
    async fn test_started_events_not_bet() {
        let odds = Arc::new(FixedHistory { calls: AtomicUsize::new(0) });
        let results = Arc::new(FixedResults { calls: AtomicUsize::new(0) });
        let mut bt = make_backtester(odds, results);

        // evt-a has started by the single step
        let at = t0() + Duration::hours(30);
        let report = bt.run(&sports(), at, at, Duration::hours(12)).await.unwrap();
        assert_eq!(report.bets, 1);
        assert_eq!(report.trade_log[0].event_id, "evt-b");
    }

    #[tokio::test]
    async fn test_second_run_uses_cache_and_matches() {
        let odds = Arc::new(FixedHistory { calls: AtomicUsize::new(0) });
        let results = Arc::new(FixedResults { calls: AtomicUsize::new(0) });
        let mut bt = make_backtester(odds.clone(), results.clone());
        let end = t0() + Duration::hours(12);

        let first = bt.run(&sports(), t0(), end, Duration::hours(12)).await.unwrap();
        let odds_calls = odds.calls.load(Ordering::SeqCst);
        let result_calls = results.calls.load(Ordering::SeqCst);

        let second = bt.run(&sports(), t0(), end, Duration::hours(12)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(odds.calls.load(Ordering::SeqCst), odds_calls);
        assert_eq!(results.calls.load(Ordering::SeqCst), result_calls);
    }

    #[tokio::test]
    async fn test_invalid_range_rejected() {
        let odds = Arc::new(FixedHistory { calls: AtomicUsize::new(0) });
        let results = Arc::new(FixedResults { calls: AtomicUsize::new(0) });
        let mut bt = make_backtester(odds, results);
        assert!(bt.run(&sports(), t0(), t0(), Duration::zero()).await.is_err());
        assert!(bt
            .run(&sports(), t0(), t0() - Duration::days(1), Duration::hours(1))
            .await
            .is_err());
    }

    fn make_trade(event: &str, day: i64, status: BetStatus, pnl: Decimal) -> BacktestTrade {
        BacktestTrade {
            as_of: t0(),
            event_id: event.to_string(),
            sport: "soccer_test".to_string(),
            market_type: MarketType::H2h,
            outcome_id: "Home FC".to_string(),
            bookmaker_id: "bet365".to_string(),
            decimal_price: 2.0,
            fair_probability: 0.55,
            ev_fraction: 0.10,
            stake: dec!(10),
            commence_time: t0() + Duration::days(day),
            status,
            pnl,
        }
    }

    #[test]
    fn test_drawdown_follows_event_order() {
        let counters = Counters { steps: 1, snapshots_processed: 0, opportunities_seen: 0, fetch_failures: 0 };
        // placement order differs from start order
        let trades = vec![
            make_trade("e3", 3, BetStatus::Won, dec!(10)),
            make_trade("e1", 1, BetStatus::Won, dec!(10)),
            make_trade("e2", 2, BetStatus::Lost, dec!(-10)),
            make_trade("e4", 4, BetStatus::Pending, Decimal::ZERO),
        ];
        let report = summarize(t0(), t0(), dec!(100), trades, counters);

        assert_eq!(report.final_bankroll, dec!(110));
        assert_eq!(report.peak_bankroll, dec!(110));
        assert_eq!(report.max_drawdown, dec!(10));
        assert!((report.max_drawdown_pct - 100.0 / 11.0).abs() < 1e-9);
        assert_eq!(report.balance_history.len(), 4);
        assert_eq!(report.total_staked, dec!(30));
        assert_eq!(report.unresolved, 1);
        assert!((report.roi - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_report() {
        let counters = Counters { steps: 0, snapshots_processed: 0, opportunities_seen: 0, fetch_failures: 0 };
        let report = summarize(t0(), t0(), dec!(100), Vec::new(), counters);
        assert_eq!(report.bets, 0);
        assert_eq!(report.final_bankroll, dec!(100));
        assert_eq!(report.roi, 0.0);
        assert_eq!(report.hit_rate, 0.0);
    }
}
