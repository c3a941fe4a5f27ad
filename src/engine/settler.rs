//! Settlement rules.
//!
//! Maps a final score onto a bet's status. Rules never guess: any outcome
//! that cannot be matched or parsed yields `None` and the bet stays pending
//! for an operator to resolve.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::tracker::BetLifecycleTracker;
use crate::platforms::SettlementSource;
use crate::storage::LedgerStore;
use crate::types::{BetRecord, BetStatus, EventResult, MarketType};

/// Decides a bet from an event result. `None` means undecidable.
pub trait OutcomeRule: Send + Sync {
    fn settle(&self, bet: &BetRecord, result: &EventResult) -> Option<BetStatus>;
}

/// Score-based rules for the four market types.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreRules;

impl OutcomeRule for ScoreRules {
    fn settle(&self, bet: &BetRecord, result: &EventResult) -> Option<BetStatus> {
        let (name, line) = split_line(&bet.outcome_id);
        match bet.market_type {
            MarketType::H2h | MarketType::H2h3Way => moneyline(bet.market_type, name, result),
            MarketType::Spreads => spread(name, line?, result),
            MarketType::Totals => total(name, line?, result),
        }
    }
}

/// Which side of the fixture an outcome name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Home,
    Away,
}

/// `"Chiefs (-3.5)"` → `("Chiefs", Some(-3.5))`.
fn split_line(outcome_id: &str) -> (&str, Option<f64>) {
    let trimmed = outcome_id.trim();
    if let Some(open) = trimmed.rfind(" (") {
        if let Some(inner) = trimmed[open + 2..].strip_suffix(')') {
            if let Ok(line) = inner.trim().parse::<f64>() {
                return (trimmed[..open].trim(), Some(line));
            }
        }
    }
    (trimmed, None)
}

/// Case-insensitive match; exact names win over containment, and an
/// ambiguous containment match is no match.
fn side_of(name: &str, result: &EventResult) -> Option<Side> {
    let name = name.to_lowercase();
    let home = result.home_team.to_lowercase();
    let away = result.away_team.to_lowercase();

    if name == home {
        return Some(Side::Home);
    }
    if name == away {
        return Some(Side::Away);
    }

    let contains = |team: &str| !name.is_empty() && (team.contains(&name) || name.contains(team));
    match (contains(&home), contains(&away)) {
        (true, false) => Some(Side::Home),
        (false, true) => Some(Side::Away),
        _ => None,
    }
}

fn scores(side: Side, result: &EventResult) -> (i64, i64) {
    match side {
        Side::Home => (result.home_score, result.away_score),
        Side::Away => (result.away_score, result.home_score),
    }
}

fn moneyline(market: MarketType, name: &str, result: &EventResult) -> Option<BetStatus> {
    if name.eq_ignore_ascii_case("draw") {
        return Some(if result.is_draw() { BetStatus::Won } else { BetStatus::Lost });
    }

    let (own, other) = scores(side_of(name, result)?, result);
    Some(if own > other {
        BetStatus::Won
    } else if own < other {
        BetStatus::Lost
    } else if market == MarketType::H2h3Way {
        BetStatus::Lost
    } else {
        // two-way markets refund a draw
        BetStatus::Void
    })
}

fn spread(name: &str, line: f64, result: &EventResult) -> Option<BetStatus> {
    let (own, other) = scores(side_of(name, result)?, result);
    Some(compare(own as f64 + line, other as f64))
}

fn total(name: &str, line: f64, result: &EventResult) -> Option<BetStatus> {
    let total = result.total() as f64;
    match name.to_lowercase().as_str() {
        "over" => Some(compare(total, line)),
        "under" => Some(compare(line, total)),
        _ => None,
    }
}

fn compare(ours: f64, theirs: f64) -> BetStatus {
    if (ours - theirs).abs() < 1e-9 {
        BetStatus::Void
    } else if ours > theirs {
        BetStatus::Won
    } else {
        BetStatus::Lost
    }
}

// ---------------------------------------------------------------------------
// Settlement pass
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettlementSummary {
    pub events_checked: usize,
    pub bets_settled: usize,
    pub not_final: usize,
    pub unavailable: usize,
}

/// Settle every event that still has pending bets. An event whose result
/// is not final or cannot be fetched is skipped until the next pass.
pub async fn settle_pending<S: LedgerStore>(
    tracker: &mut BetLifecycleTracker<S>,
    source: &dyn SettlementSource,
    rule: &dyn OutcomeRule,
    now: DateTime<Utc>,
) -> Result<SettlementSummary> {
    let mut summary = SettlementSummary::default();

    for (sport, event_id) in tracker.pending_events() {
        summary.events_checked += 1;
        match source.fetch_result(&sport, &event_id).await {
            Ok(Some(result)) => {
                let report = tracker.settle(&result, rule, now)?;
                summary.bets_settled += report.settled.len();
            }
            Ok(None) => {
                debug!(sport = %sport, event_id = %event_id, "Event not final yet");
                summary.not_final += 1;
            }
            Err(e) => {
                warn!(sport = %sport, event_id = %event_id, error = %e, "Result unavailable, skipping");
                summary.unavailable += 1;
            }
        }
    }

    if summary.events_checked > 0 {
        info!(
            events = summary.events_checked,
            settled = summary.bets_settled,
            not_final = summary.not_final,
            unavailable = summary.unavailable,
            "Settlement pass complete"
        );
    }

    Ok(summary)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
