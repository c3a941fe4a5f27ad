//! Opportunity filter.
//!
//! Pure policy checks applied to scored opportunities before sizing. Every
//! rejection carries a typed reason so the decision log can say why an
//! edge was passed on.

use chrono::{DateTime, Duration, Utc};
use std::fmt;

use crate::config::StrategyConfig;
use crate::types::EvOpportunity;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Minimum `ev_fraction` (0.03 = 3% expected return per unit staked).
    pub min_ev_threshold: f64,
    /// Longest decimal price worth betting. `None` = no cap.
    pub max_odds: Option<f64>,
    /// Ignore events starting further out than this. `None` = no horizon.
    pub max_days_ahead: Option<i64>,
    /// Floor on the fair probability of the outcome.
    pub min_true_probability: f64,
    /// Reject events whose start time is not after `now`.
    pub skip_started: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_ev_threshold: 0.03,
            max_odds: None,
            max_days_ahead: None,
            min_true_probability: 0.0,
            skip_started: true,
        }
    }
}

impl From<&StrategyConfig> for FilterConfig {
    fn from(cfg: &StrategyConfig) -> Self {
        Self {
            min_ev_threshold: cfg.min_ev_threshold,
            max_odds: cfg.max_odds,
            max_days_ahead: cfg.max_days_ahead,
            min_true_probability: cfg.min_true_probability,
            skip_started: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Rejection reasons
// ---------------------------------------------------------------------------

/// Why an opportunity was filtered out.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterRejection {
    BelowMinEv { ev: f64, min: f64 },
    OddsTooLong { price: f64, max: f64 },
    TooFarAhead { commence_time: DateTime<Utc>, max_days: i64 },
    ProbabilityTooLow { probability: f64, min: f64 },
    AlreadyStarted { commence_time: DateTime<Utc> },
}

impl fmt::Display for FilterRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterRejection::BelowMinEv { ev, min } => {
                write!(f, "EV {:+.2}% below minimum {:.2}%", ev * 100.0, min * 100.0)
            }
            FilterRejection::OddsTooLong { price, max } => {
                write!(f, "price {price:.2} above max odds {max:.2}")
            }
            FilterRejection::TooFarAhead { commence_time, max_days } => {
                write!(f, "starts {commence_time}, beyond {max_days} day horizon")
            }
            FilterRejection::ProbabilityTooLow { probability, min } => {
                write!(
                    f,
                    "fair probability {:.1}% below {:.1}%",
                    probability * 100.0,
                    min * 100.0
                )
            }
            FilterRejection::AlreadyStarted { commence_time } => {
                write!(f, "event already started at {commence_time}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

pub struct OpportunityFilter {
    config: FilterConfig,
}

impl OpportunityFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Check one opportunity as seen at `now`. The first failing rule wins.
    pub fn check(&self, opp: &EvOpportunity, now: DateTime<Utc>) -> Result<(), FilterRejection> {
        let cfg = &self.config;

        if opp.ev_fraction < cfg.min_ev_threshold {
            return Err(FilterRejection::BelowMinEv {
                ev: opp.ev_fraction,
                min: cfg.min_ev_threshold,
            });
        }

        if let Some(max) = cfg.max_odds {
            if opp.decimal_price > max {
                return Err(FilterRejection::OddsTooLong {
                    price: opp.decimal_price,
                    max,
                });
            }
        }

        if cfg.skip_started && opp.commence_time <= now {
            return Err(FilterRejection::AlreadyStarted {
                commence_time: opp.commence_time,
            });
        }

        if let Some(days) = cfg.max_days_ahead {
            if opp.commence_time > now + Duration::days(days) {
                return Err(FilterRejection::TooFarAhead {
                    commence_time: opp.commence_time,
                    max_days: days,
                });
            }
        }

        if opp.fair_probability < cfg.min_true_probability {
            return Err(FilterRejection::ProbabilityTooLow {
                probability: opp.fair_probability,
                min: cfg.min_true_probability,
            });
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MarketType;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn make_opp(ev: f64, price: f64, p: f64, starts_in: Duration) -> EvOpportunity {
        EvOpportunity {
            event_id: "evt-1".to_string(),
            sport: "soccer_epl".to_string(),
            market_type: MarketType::H2h,
            outcome_id: "Arsenal".to_string(),
            bookmaker_id: "bet365".to_string(),
            decimal_price: price,
            fair_probability: p,
            ev_fraction: ev,
            recommended_stake: Decimal::ZERO,
            kelly_fraction: 0.0,
            expected_profit: Decimal::ZERO,
            commence_time: now() + starts_in,
            observed_at: now(),
        }
    }

    #[test]
    fn test_passes_good_opportunity() {
        let filter = OpportunityFilter::new(FilterConfig::default());
        let opp = make_opp(0.05, 2.1, 0.5, Duration::hours(3));
        assert!(filter.check(&opp, now()).is_ok());
    }

    #[test]
    fn test_rejects_below_min_ev() {
        let filter = OpportunityFilter::new(FilterConfig::default());
        let opp = make_opp(0.02, 2.04, 0.5, Duration::hours(3));
        assert!(matches!(
            filter.check(&opp, now()),
            Err(FilterRejection::BelowMinEv { .. })
        ));
    }

    #[test]
    fn test_rejects_long_odds_when_capped() {
        let filter = OpportunityFilter::new(FilterConfig {
            max_odds: Some(5.0),
            ..FilterConfig::default()
        });
        let opp = make_opp(0.10, 6.0, 0.19, Duration::hours(3));
        let err = filter.check(&opp, now()).unwrap_err();
        assert_eq!(err, FilterRejection::OddsTooLong { price: 6.0, max: 5.0 });
        assert_eq!(format!("{err}"), "price 6.00 above max odds 5.00");
    }

    #[test]
    fn test_rejects_beyond_horizon() {
        let filter = OpportunityFilter::new(FilterConfig {
            max_days_ahead: Some(2),
            ..FilterConfig::default()
        });
        let near = make_opp(0.05, 2.1, 0.5, Duration::days(1));
        let far = make_opp(0.05, 2.1, 0.5, Duration::days(3));
        assert!(filter.check(&near, now()).is_ok());
        assert!(matches!(
            filter.check(&far, now()),
            Err(FilterRejection::TooFarAhead { max_days: 2, .. })
        ));
    }

    #[test]
    fn test_rejects_started_event() {
        let filter = OpportunityFilter::new(FilterConfig::default());
        let opp = make_opp(0.05, 2.1, 0.5, Duration::zero());
        assert!(matches!(
            filter.check(&opp, now()),
            Err(FilterRejection::AlreadyStarted { .. })
        ));

        let lenient = OpportunityFilter::new(FilterConfig {
            skip_started: false,
            ..FilterConfig::default()
        });
        assert!(lenient.check(&opp, now()).is_ok());
    }

    #[test]
    fn test_rejects_low_fair_probability() {
        let filter = OpportunityFilter::new(FilterConfig {
            min_true_probability: 0.2,
            ..FilterConfig::default()
        });
        let opp = make_opp(0.08, 7.2, 0.15, Duration::hours(3));
        assert!(matches!(
            filter.check(&opp, now()),
            Err(FilterRejection::ProbabilityTooLow { .. })
        ));
    }

    #[test]
    fn test_from_strategy_config() {
        let cfg = StrategyConfig {
            min_ev_threshold: 0.05,
            max_odds: Some(4.0),
            ..StrategyConfig::default()
        };
        let fc = FilterConfig::from(&cfg);
        assert_eq!(fc.min_ev_threshold, 0.05);
        assert_eq!(fc.max_odds, Some(4.0));
        assert!(fc.skip_started);
    }
}
