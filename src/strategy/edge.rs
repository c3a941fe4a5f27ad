//! Expected-value edges.
//!
//! Scores every candidate bookmaker price against the fair probability of
//! its outcome and ranks the results. Filtering is not done here; see
//! `strategy::risk::OpportunityFilter`.

use rust_decimal::Decimal;
use std::cmp::Ordering;
use tracing::debug;

use crate::types::{EngineError, EventInfo, EvOpportunity, FairProbabilityVector, MarketSnapshot, OddsQuote};

/// Expected return per unit staked: `p(price-1) - (1-p)`.
pub fn ev_fraction(fair_probability: f64, decimal_price: f64) -> f64 {
    fair_probability * (decimal_price - 1.0) - (1.0 - fair_probability)
}

/// Score one candidate quote against a fair vector.
///
/// The returned opportunity is unsized: stake fields are zero until the
/// Kelly sizer fills them.
pub fn compute(
    fair: &FairProbabilityVector,
    candidate: &OddsQuote,
    event: &EventInfo,
) -> Result<EvOpportunity, EngineError> {
    let p = fair
        .get(&candidate.outcome_id)
        .ok_or_else(|| EngineError::InvalidProbability {
            snapshot: fair.snapshot.clone(),
            detail: format!("no fair probability for outcome {}", candidate.outcome_id),
        })?;

    Ok(EvOpportunity {
        event_id: candidate.event_id.clone(),
        sport: event.sport.clone(),
        market_type: candidate.market_type,
        outcome_id: candidate.outcome_id.clone(),
        bookmaker_id: candidate.bookmaker_id.clone(),
        decimal_price: candidate.decimal_price,
        fair_probability: p,
        ev_fraction: ev_fraction(p, candidate.decimal_price),
        recommended_stake: Decimal::ZERO,
        kelly_fraction: 0.0,
        expected_profit: Decimal::ZERO,
        commence_time: event.commence_time,
        observed_at: candidate.observed_at,
    })
}

/// Sort by `ev_fraction` descending; ties go to the earlier start, then
/// to `(event, outcome, bookmaker)` so the order is fully deterministic.
pub fn rank(opportunities: &mut [EvOpportunity]) {
    opportunities.sort_by(compare);
}

fn compare(a: &EvOpportunity, b: &EvOpportunity) -> Ordering {
    b.ev_fraction
        .partial_cmp(&a.ev_fraction)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.commence_time.cmp(&b.commence_time))
        .then_with(|| a.event_id.cmp(&b.event_id))
        .then_with(|| a.outcome_id.cmp(&b.outcome_id))
        .then_with(|| a.bookmaker_id.cmp(&b.bookmaker_id))
}

// ---------------------------------------------------------------------------
// Edge detection
// ---------------------------------------------------------------------------

/// Which bookmakers count as reference and which may be bet into.
#[derive(Debug, Clone, Default)]
pub struct EdgeConfig {
    pub sharp_books: Vec<String>,
    /// Empty means every non-sharp book is a candidate.
    pub betting_books: Vec<String>,
}

/// Builds the candidate list for one snapshot.
pub struct EdgeDetector {
    config: EdgeConfig,
}

impl EdgeDetector {
    pub fn new(config: EdgeConfig) -> Self {
        Self { config }
    }

    /// Access the edge configuration.
    pub fn config(&self) -> &EdgeConfig {
        &self.config
    }

    fn is_candidate(&self, bookmaker: &str) -> bool {
        if self.config.sharp_books.iter().any(|b| b == bookmaker) {
            return false;
        }
        self.config.betting_books.is_empty()
            || self.config.betting_books.iter().any(|b| b == bookmaker)
    }

    /// Score every candidate quote in `snapshot`, ranked.
    pub fn find_edges(
        &self,
        snapshot: &MarketSnapshot,
        fair: &FairProbabilityVector,
    ) -> Result<Vec<EvOpportunity>, EngineError> {
        let mut edges = Vec::new();
        for quote in snapshot.quotes().filter(|q| self.is_candidate(&q.bookmaker_id)) {
            edges.push(compute(fair, quote, &snapshot.event)?);
        }
        rank(&mut edges);

        debug!(
            snapshot = %snapshot.id(),
            candidates = edges.len(),
            best_ev = edges.first().map(|e| format!("{:+.2}%", e.ev_fraction * 100.0)),
            "Edges scored"
        );

        Ok(edges)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
