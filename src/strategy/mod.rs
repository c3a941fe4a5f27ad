//! Strategy engine: de-vig, edge scoring, filtering and Kelly sizing.
//!
//! `StrategyPipeline` is the one path from a normalized snapshot to a
//! ranked, sized opportunity list. The live scanner and the backtester
//! both run it, so a replay sees exactly the decisions a live scan would.

pub mod devig;
pub mod edge;
pub mod kelly;
pub mod risk;

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::types::{BankrollState, DevigMethod, EngineError, EvOpportunity, MarketSnapshot};
use devig::Devigger;
use edge::{EdgeConfig, EdgeDetector};
use kelly::{KellyConfig, KellySizer, StakeSizing};
use risk::{FilterConfig, FilterRejection, OpportunityFilter};

// ---------------------------------------------------------------------------
// Decision log
// ---------------------------------------------------------------------------

/// Record of every decision made (or skipped) during a strategy pass,
/// including opportunities that were passed on and the reason why.
#[derive(Debug, Clone)]
pub enum DecisionRecord {
    /// Sized and ranked; ready for the lifecycle tracker.
    Selected { opportunity: EvOpportunity },
    /// Blocked by the opportunity filter.
    FilterRejected {
        opportunity: EvOpportunity,
        reason: FilterRejection,
    },
    /// Passed the filter but Kelly sizing produced no stake.
    KellyRejected {
        opportunity: EvOpportunity,
        sizing: StakeSizing,
    },
}

/// Output of one pipeline pass.
#[derive(Debug, Default)]
pub struct Evaluation {
    /// Sized opportunities, ranked best first.
    pub opportunities: Vec<EvOpportunity>,
    pub decisions: Vec<DecisionRecord>,
    /// Math failures, one per snapshot that could not be evaluated.
    pub failures: Vec<EngineError>,
    pub snapshots: usize,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Pipelines de-vig → EV → filter → Kelly → rank.
pub struct StrategyPipeline {
    method: DevigMethod,
    devigger: Devigger,
    detector: EdgeDetector,
    filter: OpportunityFilter,
    kelly: KellySizer,
}

impl StrategyPipeline {
    pub fn new(
        method: DevigMethod,
        devigger: Devigger,
        detector: EdgeDetector,
        filter: OpportunityFilter,
        kelly: KellySizer,
    ) -> Self {
        Self {
            method,
            devigger,
            detector,
            filter,
            kelly,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.strategy.devig_method,
            Devigger::default(),
            EdgeDetector::new(EdgeConfig {
                sharp_books: config.odds_api.sharp_books.clone(),
                betting_books: config.odds_api.betting_bookmakers.clone(),
            }),
            OpportunityFilter::new(FilterConfig::from(&config.strategy)),
            KellySizer::new(KellyConfig::from(&config.strategy)),
        )
    }

    pub fn method(&self) -> DevigMethod {
        self.method
    }

    /// Evaluate one snapshot as seen at `now`.
    ///
    /// Fair probabilities come from the sharp books only; candidates are
    /// the betting books' quotes.
    pub fn evaluate(
        &self,
        snapshot: &MarketSnapshot,
        bankroll: &BankrollState,
        now: DateTime<Utc>,
    ) -> Result<Evaluation, EngineError> {
        let mut out = Evaluation {
            snapshots: 1,
            ..Evaluation::default()
        };

        let reference = snapshot.restricted_to(&self.detector.config().sharp_books);
        if reference.outcome_count() == 0 {
            debug!(snapshot = %snapshot.id(), "No sharp quotes, skipping");
            return Ok(out);
        }

        let fair = self.devigger.devig(&reference, self.method)?;
        debug!(
            snapshot = %snapshot.id(),
            method = %fair.method,
            vig = format!("{:.2}%", fair.vig() * 100.0),
            "Fair probabilities derived"
        );

        for edge in self.detector.find_edges(snapshot, &fair)? {
            if let Err(reason) = self.filter.check(&edge, now) {
                if edge.ev_fraction > 0.0 {
                    debug!(
                        event_id = %edge.event_id,
                        outcome = %edge.outcome_id,
                        bookmaker = %edge.bookmaker_id,
                        reason = %reason,
                        "Opportunity filtered"
                    );
                }
                out.decisions.push(DecisionRecord::FilterRejected {
                    opportunity: edge,
                    reason,
                });
                continue;
            }

            match self.kelly.size_opportunity(&edge, bankroll) {
                (_, Some(sized)) => {
                    out.decisions.push(DecisionRecord::Selected {
                        opportunity: sized.clone(),
                    });
                    out.opportunities.push(sized);
                }
                (sizing, None) => out.decisions.push(DecisionRecord::KellyRejected {
                    opportunity: edge,
                    sizing,
                }),
            }
        }

        edge::rank(&mut out.opportunities);
        Ok(out)
    }

    /// Evaluate a batch of snapshots. A math failure on one snapshot is
    /// logged and collected; the rest are still evaluated.
    pub fn evaluate_all(
        &self,
        snapshots: &[MarketSnapshot],
        bankroll: &BankrollState,
        now: DateTime<Utc>,
    ) -> Evaluation {
        let mut out = Evaluation::default();

        for snapshot in snapshots {
            out.snapshots += 1;
            match self.evaluate(snapshot, bankroll, now) {
                Ok(eval) => {
                    out.opportunities.extend(eval.opportunities);
                    out.decisions.extend(eval.decisions);
                }
                Err(e) => {
                    warn!(
                        event_id = %snapshot.event.event_id,
                        market = %snapshot.market_type,
                        error = %e,
                        "Snapshot evaluation failed"
                    );
                    out.failures.push(e);
                }
            }
        }

        edge::rank(&mut out.opportunities);

        info!(
            snapshots = out.snapshots,
            opportunities = out.opportunities.len(),
            failures = out.failures.len(),
            best_ev = out
                .opportunities
                .first()
                .map(|o| format!("{:+.2}%", o.ev_fraction * 100.0)),
            "Strategy pass complete"
        );

        out
    }
}

/// Keep only the best-ranked opportunity of each event, preserving order.
/// Input must already be ranked.
pub fn one_per_event(opportunities: Vec<EvOpportunity>) -> Vec<EvOpportunity> {
    let mut seen = HashSet::new();
    opportunities
        .into_iter()
        .filter(|o| seen.insert(o.event_id.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
