//! Shared types for the SHARPLINE engine.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that data, strategy, engine
//! and backtest modules can depend on them without circular references.
//!
//! Probabilities and decimal prices are `f64`; money (stakes, bankroll,
//! realised profit) is `rust_decimal::Decimal`.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Betting market kind, keyed the way odds providers name them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MarketType {
    #[serde(rename = "h2h")]
    H2h,
    #[serde(rename = "h2h_3_way")]
    H2h3Way,
    #[serde(rename = "spreads")]
    Spreads,
    #[serde(rename = "totals")]
    Totals,
}

impl MarketType {
    /// All known market types (useful for iteration).
    pub const ALL: &'static [MarketType] = &[
        MarketType::H2h,
        MarketType::H2h3Way,
        MarketType::Spreads,
        MarketType::Totals,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::H2h => "h2h",
            MarketType::H2h3Way => "h2h_3_way",
            MarketType::Spreads => "spreads",
            MarketType::Totals => "totals",
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attempt to parse a provider market key (case-insensitive).
impl std::str::FromStr for MarketType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "h2h" | "moneyline" => Ok(MarketType::H2h),
            "h2h_3_way" => Ok(MarketType::H2h3Way),
            "spreads" | "spread" => Ok(MarketType::Spreads),
            "totals" | "total" => Ok(MarketType::Totals),
            _ => Err(anyhow::anyhow!("Unknown market type: {s}")),
        }
    }
}

/// De-vig model selector. A closed set: each variant is a distinct
/// numeric procedure dispatched by `strategy::devig::devig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevigMethod {
    Proportional,
    Power,
    Shin,
    WorstCase,
}

impl DevigMethod {
    pub const ALL: &'static [DevigMethod] = &[
        DevigMethod::Proportional,
        DevigMethod::Power,
        DevigMethod::Shin,
        DevigMethod::WorstCase,
    ];
}

impl fmt::Display for DevigMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DevigMethod::Proportional => write!(f, "proportional"),
            DevigMethod::Power => write!(f, "power"),
            DevigMethod::Shin => write!(f, "shin"),
            DevigMethod::WorstCase => write!(f, "worst_case"),
        }
    }
}

impl std::str::FromStr for DevigMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "proportional" | "multiplicative" => Ok(DevigMethod::Proportional),
            "power" => Ok(DevigMethod::Power),
            "shin" => Ok(DevigMethod::Shin),
            "worst_case" | "worstcase" => Ok(DevigMethod::WorstCase),
            _ => Err(anyhow::anyhow!("Unknown de-vig method: {s}")),
        }
    }
}

/// Lifecycle status of a bet record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    Pending,
    Won,
    Lost,
    Void,
    NotPlaced,
}

impl BetStatus {
    /// Terminal settlement states.
    pub fn is_settled(&self) -> bool {
        matches!(self, BetStatus::Won | BetStatus::Lost | BetStatus::Void)
    }
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetStatus::Pending => write!(f, "pending"),
            BetStatus::Won => write!(f, "won"),
            BetStatus::Lost => write!(f, "lost"),
            BetStatus::Void => write!(f, "void"),
            BetStatus::NotPlaced => write!(f, "not_placed"),
        }
    }
}

impl std::str::FromStr for BetStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(BetStatus::Pending),
            "won" | "win" => Ok(BetStatus::Won),
            "lost" | "loss" => Ok(BetStatus::Lost),
            "void" | "push" => Ok(BetStatus::Void),
            "not_placed" => Ok(BetStatus::NotPlaced),
            _ => Err(anyhow::anyhow!("Unknown bet status: {s}")),
        }
    }
}

/// Ledger namespace. Live and paper bets never share idempotency keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetMode {
    Live,
    Paper,
}

impl fmt::Display for BetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetMode::Live => write!(f, "live"),
            BetMode::Paper => write!(f, "paper"),
        }
    }
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identifies the snapshot a math error came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotId {
    pub event_id: String,
    pub market_type: MarketType,
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.event_id, self.market_type)
    }
}

/// Content address of a historical snapshot. Historical data never
/// changes, so entries under this key are never invalidated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub event_id: String,
    pub market_type: MarketType,
    pub as_of: DateTime<Utc>,
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}@{}",
            self.event_id,
            self.market_type,
            self.as_of.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }
}

/// `(event_id, market_type, outcome_id)`: the unit of failure tracking.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OpportunityKey {
    pub event_id: String,
    pub market_type: MarketType,
    pub outcome_id: String,
}

impl fmt::Display for OpportunityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.event_id, self.market_type, self.outcome_id)
    }
}

/// Opportunity key within one ledger namespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LedgerKey {
    pub key: OpportunityKey,
    pub mode: BetMode,
}

impl LedgerKey {
    pub fn new(key: OpportunityKey, mode: BetMode) -> Self {
        Self { key, mode }
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.mode, self.key)
    }
}

// ---------------------------------------------------------------------------
// Odds
// ---------------------------------------------------------------------------

/// One bookmaker price for one outcome. Immutable once observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsQuote {
    pub event_id: String,
    pub bookmaker_id: String,
    pub market_type: MarketType,
    pub outcome_id: String,
    pub decimal_price: f64,
    pub observed_at: DateTime<Utc>,
}

impl OddsQuote {
    /// Build a quote, rejecting prices that cannot be a decimal price.
    pub fn new(
        event_id: impl Into<String>,
        bookmaker_id: impl Into<String>,
        market_type: MarketType,
        outcome_id: impl Into<String>,
        decimal_price: f64,
        observed_at: DateTime<Utc>,
    ) -> Result<Self, EngineError> {
        let event_id = event_id.into();
        let outcome_id = outcome_id.into();
        if !decimal_price.is_finite() || decimal_price <= 1.0 {
            return Err(EngineError::DegenerateOdds {
                snapshot: SnapshotId { event_id, market_type },
                outcome_id,
                price: decimal_price,
            });
        }
        Ok(Self {
            event_id,
            bookmaker_id: bookmaker_id.into(),
            market_type,
            outcome_id,
            decimal_price,
            observed_at,
        })
    }

    /// `1 / decimal_price`.
    pub fn implied_probability(&self) -> f64 {
        1.0 / self.decimal_price
    }
}

impl fmt::Display for OddsQuote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} @ {:.3} ({})",
            self.market_type, self.outcome_id, self.decimal_price, self.bookmaker_id
        )
    }
}

/// Event metadata shared by every market of one fixture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventInfo {
    pub event_id: String,
    pub sport: String,
    pub home_team: String,
    pub away_team: String,
    pub commence_time: DateTime<Utc>,
}

impl fmt::Display for EventInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {} [{}]", self.away_team, self.home_team, self.sport)
    }
}

/// All quotes for one event+market at one point in time.
///
/// Outcomes are mutually exclusive and collectively exhaustive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub event: EventInfo,
    pub market_type: MarketType,
    pub as_of: DateTime<Utc>,
    /// outcome_id → bookmaker_id → quote
    pub outcomes: BTreeMap<String, BTreeMap<String, OddsQuote>>,
}

impl MarketSnapshot {
    pub fn new(event: EventInfo, market_type: MarketType, as_of: DateTime<Utc>) -> Self {
        Self {
            event,
            market_type,
            as_of,
            outcomes: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> SnapshotId {
        SnapshotId {
            event_id: self.event.event_id.clone(),
            market_type: self.market_type,
        }
    }

    pub fn key(&self) -> SnapshotKey {
        SnapshotKey {
            event_id: self.event.event_id.clone(),
            market_type: self.market_type,
            as_of: self.as_of,
        }
    }

    /// Insert (or replace) a bookmaker's quote for an outcome.
    pub fn insert(&mut self, quote: OddsQuote) {
        self.outcomes
            .entry(quote.outcome_id.clone())
            .or_default()
            .insert(quote.bookmaker_id.clone(), quote);
    }

    /// Sub-snapshot containing only the given bookmakers. Outcomes left
    /// with no quotes are dropped.
    pub fn restricted_to(&self, bookmakers: &[String]) -> MarketSnapshot {
        let outcomes = self
            .outcomes
            .iter()
            .filter_map(|(outcome, books)| {
                let kept: BTreeMap<_, _> = books
                    .iter()
                    .filter(|(book, _)| bookmakers.iter().any(|b| b == *book))
                    .map(|(book, q)| (book.clone(), q.clone()))
                    .collect();
                (!kept.is_empty()).then(|| (outcome.clone(), kept))
            })
            .collect();
        MarketSnapshot {
            event: self.event.clone(),
            market_type: self.market_type,
            as_of: self.as_of,
            outcomes,
        }
    }

    /// Highest-priced (lowest-margin) quote for an outcome.
    pub fn best_quote(&self, outcome_id: &str) -> Option<&OddsQuote> {
        self.outcomes.get(outcome_id)?.values().max_by(|a, b| {
            a.decimal_price
                .partial_cmp(&b.decimal_price)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }

    /// Every quote in the snapshot, ordered by outcome then bookmaker.
    pub fn quotes(&self) -> impl Iterator<Item = &OddsQuote> {
        self.outcomes.values().flat_map(|books| books.values())
    }

    pub fn outcome_count(&self) -> usize {
        self.outcomes.len()
    }
}

// ---------------------------------------------------------------------------
// Strategy types
// ---------------------------------------------------------------------------

/// Fair probabilities for one snapshot. Derived per scan, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct FairProbabilityVector {
    pub snapshot: SnapshotId,
    pub method: DevigMethod,
    /// Σ implied probability of the reference prices (1 + vig).
    pub overround: f64,
    pub probabilities: BTreeMap<String, f64>,
}

impl FairProbabilityVector {
    pub fn get(&self, outcome_id: &str) -> Option<f64> {
        self.probabilities.get(outcome_id).copied()
    }

    pub fn sum(&self) -> f64 {
        self.probabilities.values().sum()
    }

    pub fn len(&self) -> usize {
        self.probabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probabilities.is_empty()
    }

    pub fn vig(&self) -> f64 {
        self.overround - 1.0
    }
}

/// A quantified edge: a candidate price scored against a fair probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvOpportunity {
    pub event_id: String,
    pub sport: String,
    pub market_type: MarketType,
    pub outcome_id: String,
    pub bookmaker_id: String,
    pub decimal_price: f64,
    pub fair_probability: f64,
    /// `p(price-1) - (1-p)`
    pub ev_fraction: f64,
    pub recommended_stake: Decimal,
    /// Bankroll fraction after the Kelly multiplier.
    pub kelly_fraction: f64,
    pub expected_profit: Decimal,
    pub commence_time: DateTime<Utc>,
    pub observed_at: DateTime<Utc>,
}

impl EvOpportunity {
    pub fn key(&self) -> OpportunityKey {
        OpportunityKey {
            event_id: self.event_id.clone(),
            market_type: self.market_type,
            outcome_id: self.outcome_id.clone(),
        }
    }
}

impl fmt::Display for EvOpportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} @ {:.2} ({}) | fair={:.1}% ev={:+.2}% | stake={:.2}",
            self.event_id,
            self.market_type,
            self.outcome_id,
            self.decimal_price,
            self.bookmaker_id,
            self.fair_probability * 100.0,
            self.ev_fraction * 100.0,
            self.recommended_stake,
        )
    }
}

/// Externally configured bankroll. The engine reads it and never debits it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BankrollState {
    pub amount: Decimal,
    /// Fractional-Kelly multiplier (0.25 = quarter-Kelly).
    pub risk_fraction: f64,
}

// ---------------------------------------------------------------------------
// Placement
// ---------------------------------------------------------------------------

/// What is sent to the placement executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementRequest {
    pub event_id: String,
    pub market_type: MarketType,
    pub bookmaker_id: String,
    pub outcome_id: String,
    pub stake: Decimal,
    pub decimal_price: f64,
}

impl PlacementRequest {
    pub fn for_opportunity(opp: &EvOpportunity) -> Self {
        Self {
            event_id: opp.event_id.clone(),
            market_type: opp.market_type,
            bookmaker_id: opp.bookmaker_id.clone(),
            outcome_id: opp.outcome_id.clone(),
            stake: opp.recommended_stake,
            decimal_price: opp.decimal_price,
        }
    }
}

/// Receipt returned by the placement executor on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementConfirmation {
    pub confirmation_id: String,
    pub bookmaker_id: String,
    pub stake: Decimal,
    pub accepted_price: f64,
    pub placed_at: DateTime<Utc>,
    /// True when produced by a no-op stand-in (paper / dry-run).
    pub simulated: bool,
}

/// Definite result of one placement attempt. There is no "unknown".
#[derive(Debug, Clone, PartialEq)]
pub enum PlacementOutcome {
    Placed(PlacementConfirmation),
    Failed { reason: String },
}

// ---------------------------------------------------------------------------
// Ledger records
// ---------------------------------------------------------------------------

/// One bet in the append-only ledger.
///
/// Every mutation is appended as a new line with the same `bet_id` and a
/// later `updated_at`; replay keeps the last line per `bet_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetRecord {
    pub bet_id: String,
    pub event_id: String,
    pub sport: String,
    pub market_type: MarketType,
    pub outcome_id: String,
    pub bookmaker_id: String,
    pub decimal_price: f64,
    pub stake: Decimal,
    pub placed_at: DateTime<Utc>,
    pub status: BetStatus,
    pub mode: BetMode,
    pub fair_probability: f64,
    pub ev_fraction: f64,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub settled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub profit_loss: Option<Decimal>,
    #[serde(default)]
    pub confirmation_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl BetRecord {
    /// New record for an attempt on `opp` with the given initial status.
    pub fn from_opportunity(
        opp: &EvOpportunity,
        mode: BetMode,
        status: BetStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            bet_id: uuid::Uuid::new_v4().to_string(),
            event_id: opp.event_id.clone(),
            sport: opp.sport.clone(),
            market_type: opp.market_type,
            outcome_id: opp.outcome_id.clone(),
            bookmaker_id: opp.bookmaker_id.clone(),
            decimal_price: opp.decimal_price,
            stake: opp.recommended_stake,
            placed_at: now,
            status,
            mode,
            fair_probability: opp.fair_probability,
            ev_fraction: opp.ev_fraction,
            updated_at: now,
            settled_at: None,
            profit_loss: None,
            confirmation_id: None,
            notes: None,
        }
    }

    pub fn key(&self) -> OpportunityKey {
        OpportunityKey {
            event_id: self.event_id.clone(),
            market_type: self.market_type,
            outcome_id: self.outcome_id.clone(),
        }
    }

    pub fn ledger_key(&self) -> LedgerKey {
        LedgerKey::new(self.key(), self.mode)
    }

    pub fn is_pending(&self) -> bool {
        self.status == BetStatus::Pending
    }

    /// Realised profit for a settlement status.
    pub fn profit_for(&self, status: BetStatus) -> Decimal {
        match status {
            BetStatus::Won => {
                let net_odds = Decimal::from_f64(self.decimal_price - 1.0).unwrap_or(Decimal::ZERO);
                (self.stake * net_odds).round_dp(2)
            }
            BetStatus::Lost => -self.stake,
            _ => Decimal::ZERO,
        }
    }

    /// Copy of this record moved to a settlement status.
    pub fn resolved(&self, status: BetStatus, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.status = status;
        next.updated_at = now;
        next.settled_at = Some(now);
        next.profit_loss = Some(self.profit_for(status));
        next
    }
}

impl fmt::Display for BetRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} {} {} @ {:.2} stake={:.2} ({})",
            self.mode,
            self.status,
            self.event_id,
            self.market_type,
            self.outcome_id,
            self.decimal_price,
            self.stake,
            self.bookmaker_id,
        )
    }
}

/// Failure history for one opportunity key. Never reset automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub key: OpportunityKey,
    pub mode: BetMode,
    pub failure_count: u32,
    pub ignored: bool,
    pub first_failure_at: DateTime<Utc>,
    pub last_failure_at: DateTime<Utc>,
    #[serde(default)]
    pub last_reason: Option<String>,
}

impl FailureEntry {
    pub fn ledger_key(&self) -> LedgerKey {
        LedgerKey::new(self.key.clone(), self.mode)
    }
}

// ---------------------------------------------------------------------------
// Settlement input
// ---------------------------------------------------------------------------

/// Final score of an event, as reported by the settlement source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventResult {
    pub event_id: String,
    pub home_team: String,
    pub away_team: String,
    pub home_score: i64,
    pub away_score: i64,
}

impl EventResult {
    pub fn is_draw(&self) -> bool {
        self.home_score == self.away_score
    }

    pub fn total(&self) -> i64 {
        self.home_score + self.away_score
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for SHARPLINE.
///
/// Math variants carry the offending snapshot so failures can be reported
/// and isolated per market.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Insufficient quotes for {snapshot}: {quoted} outcome(s) quoted, need at least 2")]
    InsufficientQuotes { snapshot: SnapshotId, quoted: usize },

    #[error("Degenerate odds for {snapshot}: {outcome_id} priced at {price}")]
    DegenerateOdds {
        snapshot: SnapshotId,
        outcome_id: String,
        price: f64,
    },

    #[error("Invalid probability for {snapshot}: {detail}")]
    InvalidProbability { snapshot: SnapshotId, detail: String },

    #[error("{method} de-vig did not converge for {snapshot}: {detail}")]
    Convergence {
        snapshot: SnapshotId,
        method: DevigMethod,
        detail: String,
    },

    #[error("Placement failed ({bookmaker}): {reason}")]
    Placement { bookmaker: String, reason: String },

    #[error("Fetch error ({source_name}): {message}")]
    Fetch { source_name: String, message: String },

    #[error("Settlement unavailable for {event_id}: {message}")]
    SettlementUnavailable { event_id: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Math-layer failures are isolated per snapshot; everything else is I/O.
    pub fn is_math(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientQuotes { .. }
                | EngineError::DegenerateOdds { .. }
                | EngineError::InvalidProbability { .. }
                | EngineError::Convergence { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
