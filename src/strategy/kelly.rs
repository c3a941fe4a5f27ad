//! Kelly criterion stake sizing.
//!
//! Fractional Kelly over decimal odds, with a minimum-fraction floor and
//! optional rounding of the stake down to a betting unit.

use rust_decimal::prelude::*;
use tracing::debug;

use crate::config::StrategyConfig;
use crate::types::{BankrollState, EvOpportunity};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Kelly sizing configuration.
#[derive(Debug, Clone)]
pub struct KellyConfig {
    /// Discard bets whose applied bankroll fraction is below this.
    pub min_kelly_pct: f64,
    /// Stakes are floored to a multiple of this. Zero disables rounding.
    pub rounding_unit: Decimal,
}

impl Default for KellyConfig {
    fn default() -> Self {
        Self {
            min_kelly_pct: 0.0,
            rounding_unit: Decimal::ZERO,
        }
    }
}

impl From<&StrategyConfig> for KellyConfig {
    fn from(cfg: &StrategyConfig) -> Self {
        Self {
            min_kelly_pct: cfg.min_kelly_pct,
            rounding_unit: cfg.stake_rounding,
        }
    }
}

// ---------------------------------------------------------------------------
// Sizing result
// ---------------------------------------------------------------------------

/// Stake recommendation for a sized bet.
#[derive(Debug, Clone, PartialEq)]
pub struct SizedStake {
    /// Raw Kelly fraction before the multiplier.
    pub full_kelly: f64,
    /// Bankroll fraction after the multiplier and clamp.
    pub applied_fraction: f64,
    pub stake: Decimal,
    pub expected_profit: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StakeSizing {
    /// Full Kelly is zero or negative: the price carries no edge.
    NoEdge { full_kelly: f64 },
    /// Positive edge but too small to bet (or rounded away to nothing).
    BelowMinimum { applied_fraction: f64 },
    Sized(SizedStake),
}

impl StakeSizing {
    /// Recommended stake; zero unless sized.
    pub fn stake(&self) -> Decimal {
        match self {
            StakeSizing::Sized(s) => s.stake,
            _ => Decimal::ZERO,
        }
    }

    pub fn is_sized(&self) -> bool {
        matches!(self, StakeSizing::Sized(_))
    }
}

// ---------------------------------------------------------------------------
// Kelly sizer
// ---------------------------------------------------------------------------

pub struct KellySizer {
    config: KellyConfig,
}

impl KellySizer {
    pub fn new(config: KellyConfig) -> Self {
        Self { config }
    }

    /// Access the Kelly configuration.
    pub fn config(&self) -> &KellyConfig {
        &self.config
    }

    /// Size a bet.
    ///
    /// Kelly formula over decimal odds: f* = (bp - q) / b
    /// where:
    ///   b = decimal_price - 1
    ///   p = fair win probability
    ///   q = 1 - p
    pub fn size(
        &self,
        fair_probability: f64,
        decimal_price: f64,
        bankroll: Decimal,
        kelly_fraction: f64,
    ) -> StakeSizing {
        let b = decimal_price - 1.0;
        let p = fair_probability;
        let q = 1.0 - p;

        let full_kelly = if b > 0.0 { (b * p - q) / b } else { 0.0 };
        if !full_kelly.is_finite() || full_kelly <= 0.0 {
            return StakeSizing::NoEdge { full_kelly };
        }

        let applied_fraction = (full_kelly * kelly_fraction).clamp(0.0, 1.0);
        if applied_fraction <= 0.0 || applied_fraction < self.config.min_kelly_pct {
            return StakeSizing::BelowMinimum { applied_fraction };
        }

        let fraction = Decimal::from_f64(applied_fraction).unwrap_or(Decimal::ZERO);
        let mut stake = (bankroll.max(Decimal::ZERO) * fraction).round_dp(2);
        let unit = self.config.rounding_unit;
        if unit > Decimal::ZERO {
            stake = (stake / unit).floor() * unit;
        }
        if stake <= Decimal::ZERO {
            return StakeSizing::BelowMinimum { applied_fraction };
        }

        let ev = p * b - q;
        let expected_profit =
            (stake * Decimal::from_f64(ev).unwrap_or(Decimal::ZERO)).round_dp(2);

        StakeSizing::Sized(SizedStake {
            full_kelly,
            applied_fraction,
            stake,
            expected_profit,
        })
    }

    /// Size an opportunity against the bankroll, filling its stake fields.
    /// Returns the sized copy alongside the raw sizing decision.
    pub fn size_opportunity(
        &self,
        opp: &EvOpportunity,
        bankroll: &BankrollState,
    ) -> (StakeSizing, Option<EvOpportunity>) {
        let sizing = self.size(
            opp.fair_probability,
            opp.decimal_price,
            bankroll.amount,
            bankroll.risk_fraction,
        );

        let sized = match &sizing {
            StakeSizing::Sized(s) => {
                debug!(
                    event_id = %opp.event_id,
                    outcome = %opp.outcome_id,
                    raw_kelly = format!("{:.2}%", s.full_kelly * 100.0),
                    applied = format!("{:.2}%", s.applied_fraction * 100.0),
                    stake = format!("{:.2}", s.stake),
                    expected_profit = format!("{:.2}", s.expected_profit),
                    "Bet sized"
                );
                let mut sized = opp.clone();
                sized.recommended_stake = s.stake;
                sized.kelly_fraction = s.applied_fraction;
                sized.expected_profit = s.expected_profit;
                Some(sized)
            }
            StakeSizing::NoEdge { full_kelly } => {
                debug!(event_id = %opp.event_id, full_kelly, "Negative Kelly, no bet");
                None
            }
            StakeSizing::BelowMinimum { applied_fraction } => {
                debug!(
                    event_id = %opp.event_id,
                    applied = format!("{:.3}%", applied_fraction * 100.0),
                    min = format!("{:.3}%", self.config.min_kelly_pct * 100.0),
                    "Kelly fraction below minimum"
                );
                None
            }
        };

        (sizing, sized)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
