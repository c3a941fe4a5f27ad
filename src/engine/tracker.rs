//! Bet lifecycle tracker.
//!
//! Owns the per-key state machine
//! `unattempted → pending → {won, lost, void}` with the `not_placed` side
//! channel for failed placements. The ledger is the source of truth; the
//! in-memory index and the failure counters are rebuilt from it on open.
//!
//! Paper and live bets share this machinery and are kept apart by
//! `BetMode`: the same opportunity may be pending in both namespaces.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, info, warn};

use super::settler::OutcomeRule;
use crate::storage::{fold_latest, LedgerStore};
use crate::types::{
    BetMode, BetRecord, BetStatus, EventResult, EvOpportunity, FailureEntry, LedgerKey,
    PlacementOutcome,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Failed placements before a key is ignored. 0 disables ignoring.
    pub failure_threshold: u32,
    /// Skip every outcome of an event already bet in this mode.
    pub skip_already_bet_events: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            skip_already_bet_events: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Whether an opportunity may be attempted.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Admit,
    Ignored { failure_count: u32 },
    AlreadyPending { bet_id: String },
    AlreadyBetEvent { event_id: String },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admit)
    }
}

impl fmt::Display for Admission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Admission::Admit => write!(f, "admitted"),
            Admission::Ignored { failure_count } => {
                write!(f, "ignored after {failure_count} failed placement(s)")
            }
            Admission::AlreadyPending { bet_id } => write!(f, "already pending as {bet_id}"),
            Admission::AlreadyBetEvent { event_id } => write!(f, "event {event_id} already bet"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptResult {
    /// Appended to the ledger (pending or not_placed).
    Recorded(BetRecord),
    /// A pending record already exists for the key; nothing written.
    Duplicate { existing_bet_id: String },
}

#[derive(Debug, Clone, Default)]
pub struct SettlementReport {
    pub event_id: String,
    pub settled: Vec<BetRecord>,
    /// Pending bets the rule could not decide; left pending.
    pub unresolved: Vec<String>,
}

/// Ledger statistics for one namespace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerSummary {
    pub pending: usize,
    pub won: usize,
    pub lost: usize,
    pub void: usize,
    pub not_placed: usize,
    /// Stake of settled bets.
    pub total_staked: Decimal,
    pub pending_stake: Decimal,
    pub profit_loss: Decimal,
}

impl LedgerSummary {
    /// Profit over settled stake. Zero when nothing is settled.
    pub fn roi(&self) -> f64 {
        if self.total_staked.is_zero() {
            return 0.0;
        }
        (self.profit_loss / self.total_staked).to_f64().unwrap_or(0.0)
    }

    /// Wins over decided bets (voids excluded).
    pub fn hit_rate(&self) -> f64 {
        let decided = self.won + self.lost;
        if decided == 0 {
            0.0
        } else {
            self.won as f64 / decided as f64
        }
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

pub struct BetLifecycleTracker<S: LedgerStore> {
    store: S,
    config: TrackerConfig,
    /// Latest state per bet, in first-appearance order.
    bets: Vec<BetRecord>,
    index: HashMap<String, usize>,
    failures: BTreeMap<LedgerKey, FailureEntry>,
}

impl<S: LedgerStore> BetLifecycleTracker<S> {
    /// Replay the ledger and rebuild the failure index.
    ///
    /// Failure counts are a materialized view of `not_placed` records.
    /// Persisted counters are reconciled against that view; a count is
    /// never lowered. The ignored flag is recomputed from the current
    /// threshold.
    pub fn open(store: S, config: TrackerConfig) -> Result<Self> {
        let bets = fold_latest(store.scan()?);
        let index = bets
            .iter()
            .enumerate()
            .map(|(i, b)| (b.bet_id.clone(), i))
            .collect();

        let mut tracker = Self {
            store,
            config,
            bets,
            index,
            failures: BTreeMap::new(),
        };

        let view = tracker.failure_view();
        let persisted: BTreeMap<LedgerKey, FailureEntry> = tracker
            .store
            .failures()?
            .into_iter()
            .map(|e| (e.ledger_key(), e))
            .collect();

        let mut keys: Vec<LedgerKey> = view.keys().chain(persisted.keys()).cloned().collect();
        keys.sort();
        keys.dedup();

        for key in keys {
            let mut merged = match (view.get(&key), persisted.get(&key)) {
                (Some(v), Some(p)) if p.failure_count >= v.failure_count => p.clone(),
                (Some(v), _) => v.clone(),
                (None, Some(p)) => p.clone(),
                (None, None) => continue,
            };
            // ignored follows the configured threshold, not the stored flag
            merged.ignored = tracker.reaches_threshold(merged.failure_count);
            if persisted.get(&key) != Some(&merged) {
                debug!(key = %key, count = merged.failure_count, "Reconciled failure entry");
                tracker.store.put_failure(&merged)?;
            }
            tracker.failures.insert(key, merged);
        }

        info!(
            bets = tracker.bets.len(),
            pending = tracker.bets.iter().filter(|b| b.is_pending()).count(),
            ignored = tracker.failures.values().filter(|e| e.ignored).count(),
            "Bet ledger replayed"
        );

        Ok(tracker)
    }

    fn reaches_threshold(&self, count: u32) -> bool {
        self.config.failure_threshold > 0 && count >= self.config.failure_threshold
    }

    /// Failure entries derived from `not_placed` records alone.
    fn failure_view(&self) -> BTreeMap<LedgerKey, FailureEntry> {
        let mut view: BTreeMap<LedgerKey, FailureEntry> = BTreeMap::new();
        for rec in self.bets.iter().filter(|b| b.status == BetStatus::NotPlaced) {
            let entry = view.entry(rec.ledger_key()).or_insert_with(|| FailureEntry {
                key: rec.key(),
                mode: rec.mode,
                failure_count: 0,
                ignored: false,
                first_failure_at: rec.placed_at,
                last_failure_at: rec.placed_at,
                last_reason: None,
            });
            entry.failure_count += 1;
            entry.first_failure_at = entry.first_failure_at.min(rec.placed_at);
            if rec.placed_at >= entry.last_failure_at {
                entry.last_failure_at = rec.placed_at;
                entry.last_reason = rec.notes.clone();
            }
        }
        for entry in view.values_mut() {
            entry.ignored = self.reaches_threshold(entry.failure_count);
        }
        view
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn get(&self, bet_id: &str) -> Option<&BetRecord> {
        self.index.get(bet_id).map(|&i| &self.bets[i])
    }

    /// Latest state of every bet in `mode`.
    pub fn records(&self, mode: BetMode) -> impl Iterator<Item = &BetRecord> {
        self.bets.iter().filter(move |b| b.mode == mode)
    }

    /// Pending bets across both namespaces.
    pub fn pending(&self) -> impl Iterator<Item = &BetRecord> {
        self.bets.iter().filter(|b| b.is_pending())
    }

    /// `(sport, event_id)` of every event with a pending bet, deduplicated.
    pub fn pending_events(&self) -> Vec<(String, String)> {
        let mut events: Vec<(String, String)> = self
            .pending()
            .map(|b| (b.sport.clone(), b.event_id.clone()))
            .collect();
        events.sort();
        events.dedup();
        events
    }

    pub fn failure(&self, key: &LedgerKey) -> Option<&FailureEntry> {
        self.failures.get(key)
    }

    fn pending_for(&self, key: &LedgerKey) -> Option<&BetRecord> {
        self.bets
            .iter()
            .find(|b| b.is_pending() && &b.ledger_key() == key)
    }

    // -- Admission ----------------------------------------------------------

    pub fn admit(&self, opp: &EvOpportunity, mode: BetMode) -> Admission {
        let key = LedgerKey::new(opp.key(), mode);

        if let Some(entry) = self.failures.get(&key) {
            if entry.ignored {
                return Admission::Ignored {
                    failure_count: entry.failure_count,
                };
            }
        }

        if let Some(rec) = self.pending_for(&key) {
            return Admission::AlreadyPending {
                bet_id: rec.bet_id.clone(),
            };
        }

        if self.config.skip_already_bet_events
            && self.bets.iter().any(|b| {
                b.mode == mode
                    && b.event_id == opp.event_id
                    && (b.is_pending() || b.status.is_settled())
            })
        {
            return Admission::AlreadyBetEvent {
                event_id: opp.event_id.clone(),
            };
        }

        Admission::Admit
    }

    /// Opportunities that may be attempted, in input order.
    pub fn filter_admissible(&self, opps: Vec<EvOpportunity>, mode: BetMode) -> Vec<EvOpportunity> {
        opps.into_iter()
            .filter(|opp| match self.admit(opp, mode) {
                Admission::Admit => true,
                other => {
                    debug!(
                        event_id = %opp.event_id,
                        outcome = %opp.outcome_id,
                        mode = %mode,
                        reason = %other,
                        "Opportunity not admitted"
                    );
                    false
                }
            })
            .collect()
    }

    // -- Placement ----------------------------------------------------------

    /// Record the definite outcome of one placement attempt.
    pub fn record_attempt(
        &mut self,
        opp: &EvOpportunity,
        mode: BetMode,
        outcome: PlacementOutcome,
        now: DateTime<Utc>,
    ) -> Result<AttemptResult> {
        let key = LedgerKey::new(opp.key(), mode);
        if let Some(existing) = self.pending_for(&key) {
            warn!(key = %key, bet_id = %existing.bet_id, "Refusing duplicate attempt");
            return Ok(AttemptResult::Duplicate {
                existing_bet_id: existing.bet_id.clone(),
            });
        }

        let record = match outcome {
            PlacementOutcome::Placed(conf) => {
                let mut rec = BetRecord::from_opportunity(opp, mode, BetStatus::Pending, now);
                rec.stake = conf.stake;
                rec.decimal_price = conf.accepted_price;
                rec.confirmation_id = Some(conf.confirmation_id.clone());
                if conf.simulated {
                    rec.notes = Some("simulated placement".to_string());
                }
                self.store.append(&rec)?;
                info!(
                    bet_id = %rec.bet_id,
                    key = %key,
                    bookmaker = %rec.bookmaker_id,
                    price = format!("{:.2}", rec.decimal_price),
                    stake = format!("{:.2}", rec.stake),
                    "Bet recorded as pending"
                );
                rec
            }
            PlacementOutcome::Failed { reason } => {
                let mut rec = BetRecord::from_opportunity(opp, mode, BetStatus::NotPlaced, now);
                rec.notes = Some(reason.clone());
                self.store.append(&rec)?;
                self.record_failure(&key, &reason, now)?;
                rec
            }
        };

        self.insert(record.clone());
        Ok(AttemptResult::Recorded(record))
    }

    fn record_failure(&mut self, key: &LedgerKey, reason: &str, now: DateTime<Utc>) -> Result<()> {
        let entry = self.failures.entry(key.clone()).or_insert_with(|| FailureEntry {
            key: key.key.clone(),
            mode: key.mode,
            failure_count: 0,
            ignored: false,
            first_failure_at: now,
            last_failure_at: now,
            last_reason: None,
        });
        entry.failure_count += 1;
        entry.last_failure_at = now;
        entry.last_reason = Some(reason.to_string());

        let threshold = self.config.failure_threshold;
        let newly_ignored = !entry.ignored && threshold > 0 && entry.failure_count >= threshold;
        if newly_ignored {
            entry.ignored = true;
        }
        let entry = entry.clone();

        if newly_ignored {
            warn!(
                key = %key,
                failures = entry.failure_count,
                reason,
                "Opportunity ignored after repeated placement failures"
            );
        } else {
            warn!(key = %key, failures = entry.failure_count, reason, "Placement failed");
        }

        self.store.put_failure(&entry)
    }

    fn insert(&mut self, record: BetRecord) {
        match self.index.get(&record.bet_id) {
            Some(&i) => self.bets[i] = record,
            None => {
                self.index.insert(record.bet_id.clone(), self.bets.len());
                self.bets.push(record);
            }
        }
    }

    // -- Settlement ---------------------------------------------------------

    /// Resolve every pending bet on `result.event_id` (all markets, both
    /// namespaces). Records already settled are left alone, so repeating a
    /// settlement is a no-op.
    pub fn settle(
        &mut self,
        result: &EventResult,
        rule: &dyn OutcomeRule,
        now: DateTime<Utc>,
    ) -> Result<SettlementReport> {
        let mut report = SettlementReport {
            event_id: result.event_id.clone(),
            ..SettlementReport::default()
        };

        let pending: Vec<BetRecord> = self
            .bets
            .iter()
            .filter(|b| b.is_pending() && b.event_id == result.event_id)
            .cloned()
            .collect();

        for rec in pending {
            match rule.settle(&rec, result) {
                Some(status) if status.is_settled() => {
                    let next = rec.resolved(status, now);
                    self.store.append(&next)?;
                    info!(
                        bet_id = %next.bet_id,
                        event_id = %next.event_id,
                        outcome = %next.outcome_id,
                        status = %status,
                        profit_loss = format!("{:.2}", next.profit_loss.unwrap_or_default()),
                        "Bet settled"
                    );
                    self.insert(next.clone());
                    report.settled.push(next);
                }
                _ => {
                    debug!(bet_id = %rec.bet_id, outcome = %rec.outcome_id, "Outcome undecided, left pending");
                    report.unresolved.push(rec.bet_id.clone());
                }
            }
        }

        Ok(report)
    }

    /// Operator override of a bet's result. Returns `None` when the bet
    /// already has that status.
    pub fn resolve_bet(
        &mut self,
        bet_id: &str,
        status: BetStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<BetRecord>> {
        if !status.is_settled() {
            bail!("Cannot resolve bet {bet_id} to {status}: not a settlement status");
        }
        let Some(current) = self.get(bet_id).cloned() else {
            bail!("Unknown bet id: {bet_id}");
        };
        if current.status == BetStatus::NotPlaced {
            bail!("Bet {bet_id} was never placed");
        }
        if current.status == status {
            debug!(bet_id, status = %status, "Already resolved, nothing to do");
            return Ok(None);
        }

        let mut next = current.resolved(status, now);
        next.notes = Some(match &current.notes {
            Some(n) => format!("{n}; manually resolved"),
            None => "manually resolved".to_string(),
        });
        self.store.append(&next)?;
        info!(
            bet_id,
            from = %current.status,
            to = %status,
            profit_loss = format!("{:.2}", next.profit_loss.unwrap_or_default()),
            "Bet manually resolved"
        );
        self.insert(next.clone());
        Ok(Some(next))
    }

    // -- Reporting ----------------------------------------------------------

    /// Ignored keys in `mode`, most recently failed first.
    pub fn ignored_report(&self, mode: BetMode) -> Vec<FailureEntry> {
        let mut out: Vec<FailureEntry> = self
            .failures
            .values()
            .filter(|e| e.mode == mode && e.ignored)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.last_failure_at.cmp(&a.last_failure_at));
        out
    }

    pub fn summary(&self, mode: BetMode) -> LedgerSummary {
        let mut s = LedgerSummary::default();
        for rec in self.records(mode) {
            match rec.status {
                BetStatus::Pending => {
                    s.pending += 1;
                    s.pending_stake += rec.stake;
                }
                BetStatus::NotPlaced => s.not_placed += 1,
                settled => {
                    match settled {
                        BetStatus::Won => s.won += 1,
                        BetStatus::Lost => s.lost += 1,
                        _ => s.void += 1,
                    }
                    s.total_staked += rec.stake;
                    s.profit_loss += rec
                        .profit_loss
                        .unwrap_or_else(|| rec.profit_for(rec.status));
                }
            }
        }
        s
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
