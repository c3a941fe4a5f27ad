//! Vig removal.
//!
//! Converts the implied probabilities of a reference-book snapshot into a
//! fair probability distribution. Four models are available, selected by
//! `DevigMethod`:
//!
//! - `proportional`: scale every implied probability by the overround.
//! - `power`: raise implied probabilities to a common exponent; corrects
//!   the favourite-longshot bias by taking more margin off longshots.
//! - `shin`: Shin's insider-trading model, solved for the insider share `z`.
//! - `worst_case`: divide by `1 + vig` and renormalise.
//!
//! `power` and `shin` are solved with a bounded, deterministic bisection
//! whose tolerance and iteration cap are explicit (`RootFinder`). A model
//! that cannot produce a valid distribution fails loudly; there is no
//! fallback to another model and no clamping.

use std::collections::BTreeMap;

use tracing::debug;

use crate::types::{DevigMethod, EngineError, FairProbabilityVector, MarketSnapshot, SnapshotId};

/// Allowed deviation of Σ fair from 1.
pub const SUM_TOLERANCE: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Root finding
// ---------------------------------------------------------------------------

/// Bisection settings for the iterative models.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RootFinder {
    /// Stop once |f(x)| is at most this.
    pub tolerance: f64,
    pub max_iterations: u32,
}

impl Default for RootFinder {
    fn default() -> Self {
        Self {
            tolerance: 1e-9,
            max_iterations: 100,
        }
    }
}

/// Why a bisection failed.
#[derive(Debug, Clone, PartialEq)]
pub enum RootError {
    /// f(lo) and f(hi) share a sign, so the bracket holds no root.
    NoSignChange { f_lo: f64, f_hi: f64 },
    /// Iteration cap reached before |f| fell under the tolerance.
    MaxIterations { x: f64, residual: f64 },
}

impl std::fmt::Display for RootError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RootError::NoSignChange { f_lo, f_hi } => {
                write!(f, "no sign change in bracket (f(lo)={f_lo:.3e}, f(hi)={f_hi:.3e})")
            }
            RootError::MaxIterations { x, residual } => {
                write!(f, "iteration cap reached at x={x:.12} (residual {residual:.3e})")
            }
        }
    }
}

impl RootFinder {
    /// Find `x` in `[lo, hi]` with `|f(x)| <= tolerance`.
    pub fn bisect<F>(&self, f: F, mut lo: f64, mut hi: f64) -> Result<f64, RootError>
    where
        F: Fn(f64) -> f64,
    {
        let mut f_lo = f(lo);
        let f_hi = f(hi);
        if f_lo.abs() <= self.tolerance {
            return Ok(lo);
        }
        if f_hi.abs() <= self.tolerance {
            return Ok(hi);
        }
        if f_lo.signum() == f_hi.signum() || f_lo.is_nan() || f_hi.is_nan() {
            return Err(RootError::NoSignChange { f_lo, f_hi });
        }

        let mut last = (lo, f_lo);
        for _ in 0..self.max_iterations {
            let mid = 0.5 * (lo + hi);
            let f_mid = f(mid);
            if f_mid.abs() <= self.tolerance {
                return Ok(mid);
            }
            if f_mid.signum() == f_lo.signum() {
                lo = mid;
                f_lo = f_mid;
            } else {
                hi = mid;
            }
            last = (mid, f_mid);
        }
        Err(RootError::MaxIterations {
            x: last.0,
            residual: last.1,
        })
    }
}

// ---------------------------------------------------------------------------
// Devigger
// ---------------------------------------------------------------------------

/// Stateless de-vig engine parameterised by its root finder.
#[derive(Debug, Clone, Copy, Default)]
pub struct Devigger {
    root_finder: RootFinder,
}

/// De-vig with the default root finder.
pub fn devig(
    snapshot: &MarketSnapshot,
    method: DevigMethod,
) -> Result<FairProbabilityVector, EngineError> {
    Devigger::default().devig(snapshot, method)
}

impl Devigger {
    pub fn new(root_finder: RootFinder) -> Self {
        Self { root_finder }
    }

    pub fn root_finder(&self) -> &RootFinder {
        &self.root_finder
    }

    /// Fair probabilities for every quoted outcome of `snapshot`.
    ///
    /// Each outcome uses its best (highest) reference price.
    pub fn devig(
        &self,
        snapshot: &MarketSnapshot,
        method: DevigMethod,
    ) -> Result<FairProbabilityVector, EngineError> {
        let id = snapshot.id();

        if let Some(bad) = snapshot
            .quotes()
            .find(|q| !q.decimal_price.is_finite() || q.decimal_price <= 1.0)
        {
            return Err(EngineError::DegenerateOdds {
                snapshot: id,
                outcome_id: bad.outcome_id.clone(),
                price: bad.decimal_price,
            });
        }

        let (outcomes, implied): (Vec<String>, Vec<f64>) = snapshot
            .outcomes
            .keys()
            .filter_map(|o| snapshot.best_quote(o).map(|q| (o.clone(), q.implied_probability())))
            .unzip();

        if outcomes.len() < 2 {
            return Err(EngineError::InsufficientQuotes {
                snapshot: id,
                quoted: outcomes.len(),
            });
        }

        let overround: f64 = implied.iter().sum();

        let fair = match method {
            DevigMethod::Proportional => proportional(&implied, overround),
            DevigMethod::Power => self.power(&implied, overround, &id)?,
            DevigMethod::Shin => self.shin(&implied, overround, &id)?,
            DevigMethod::WorstCase => worst_case(&implied, overround),
        };

        validate(&fair, &id, method)?;

        debug!(
            snapshot = %id,
            method = %method,
            overround = format!("{:.4}", overround),
            outcomes = outcomes.len(),
            "De-vigged"
        );

        Ok(FairProbabilityVector {
            snapshot: id,
            method,
            overround,
            probabilities: outcomes.into_iter().zip(fair).collect::<BTreeMap<_, _>>(),
        })
    }

    /// Solve `Σ p_i^(1/k) = 1` for `k ∈ (0, 1]`.
    fn power(&self, implied: &[f64], overround: f64, id: &SnapshotId) -> Result<Vec<f64>, EngineError> {
        if let Some(flat) = self.no_margin(implied, overround, DevigMethod::Power, id)? {
            return Ok(flat);
        }
        let residual = |k: f64| implied.iter().map(|p| p.powf(1.0 / k)).sum::<f64>() - 1.0;
        let k = self
            .root_finder
            .bisect(residual, self.root_finder.tolerance, 1.0)
            .map_err(|e| convergence(id, DevigMethod::Power, e))?;
        Ok(implied.iter().map(|p| p.powf(1.0 / k)).collect())
    }

    /// Solve Shin's model for the insider share `z ∈ (0, 1)`.
    fn shin(&self, implied: &[f64], overround: f64, id: &SnapshotId) -> Result<Vec<f64>, EngineError> {
        if let Some(flat) = self.no_margin(implied, overround, DevigMethod::Shin, id)? {
            return Ok(flat);
        }
        let residual = |z: f64| implied.iter().map(|&p| shin_fair(p, z, overround)).sum::<f64>() - 1.0;
        let z = self
            .root_finder
            .bisect(residual, 0.0, 1.0)
            .map_err(|e| convergence(id, DevigMethod::Shin, e))?;
        Ok(implied.iter().map(|&p| shin_fair(p, z, overround)).collect())
    }

    /// Books without a positive margin have no root for the iterative
    /// models. A margin within tolerance of zero is already fair.
    fn no_margin(
        &self,
        implied: &[f64],
        overround: f64,
        method: DevigMethod,
        id: &SnapshotId,
    ) -> Result<Option<Vec<f64>>, EngineError> {
        if overround > 1.0 + self.root_finder.tolerance {
            return Ok(None);
        }
        if (overround - 1.0).abs() <= self.root_finder.tolerance {
            return Ok(Some(proportional(implied, overround)));
        }
        Err(EngineError::Convergence {
            snapshot: id.clone(),
            method,
            detail: format!("overround {overround:.6} < 1, no margin to remove"),
        })
    }
}

fn proportional(implied: &[f64], overround: f64) -> Vec<f64> {
    implied.iter().map(|p| p / overround).collect()
}

/// Every outcome carries the whole vig, then the simplex is restored.
fn worst_case(implied: &[f64], overround: f64) -> Vec<f64> {
    let vig = overround - 1.0;
    let burdened: Vec<f64> = implied.iter().map(|p| p / (1.0 + vig)).collect();
    let total: f64 = burdened.iter().sum();
    burdened.iter().map(|p| p / total).collect()
}

/// `(sqrt(z² + 4(1-z)p²/S) - z) / (2(1-z))`, rationalised so it stays
/// finite as `z → 1`.
fn shin_fair(p: f64, z: f64, overround: f64) -> f64 {
    let a = 4.0 * (1.0 - z) * p * p / overround;
    2.0 * p * p / (overround * ((z * z + a).sqrt() + z))
}

fn convergence(id: &SnapshotId, method: DevigMethod, err: RootError) -> EngineError {
    EngineError::Convergence {
        snapshot: id.clone(),
        method,
        detail: err.to_string(),
    }
}

fn validate(fair: &[f64], id: &SnapshotId, method: DevigMethod) -> Result<(), EngineError> {
    if let Some(p) = fair.iter().find(|p| !(**p > 0.0 && **p < 1.0)) {
        return Err(EngineError::InvalidProbability {
            snapshot: id.clone(),
            detail: format!("{method} produced {p} outside (0, 1)"),
        });
    }
    let sum: f64 = fair.iter().sum();
    if (sum - 1.0).abs() > SUM_TOLERANCE {
        return Err(EngineError::InvalidProbability {
            snapshot: id.clone(),
            detail: format!("{method} probabilities sum to {sum:.9}"),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
