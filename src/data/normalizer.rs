//! Odds normalization.
//!
//! Turns one provider event into canonical `MarketSnapshot`s, one per
//! market type. Stateless.
//!
//! Bookmakers do not always quote the same line: one book may offer
//! totals at 2.5 while another offers 3.0, and some books publish a 3-way
//! soccer market under the 2-way `h2h` key. Mixing those would make the
//! outcomes of a snapshot non-exhaustive (or overlapping), so every
//! market keeps only the bookmakers whose outcome set matches the
//! reference set chosen from the sharp books.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use super::{RawEvent, RawOutcome};
use crate::types::{MarketSnapshot, MarketType, OddsQuote};

/// Canonical outcome id: the outcome name, plus the signed line when the
/// market has one (`Over (+2.5)`, `Chiefs (-3.5)`).
pub fn outcome_id(outcome: &RawOutcome) -> String {
    match outcome.point {
        Some(point) => format!("{} ({:+.1})", outcome.name, point),
        None => outcome.name.clone(),
    }
}

/// Normalize every requested market of `event` as observed at `as_of`.
///
/// An empty `markets` slice keeps every market type the crate knows.
/// Unknown provider keys (`h2h_lay`, `outrights`, ...) are skipped.
pub fn normalize_event(
    event: &RawEvent,
    markets: &[MarketType],
    sharp_books: &[String],
    as_of: DateTime<Utc>,
) -> Vec<MarketSnapshot> {
    // market → bookmaker → quotes
    let mut grouped: BTreeMap<MarketType, BTreeMap<String, Vec<OddsQuote>>> = BTreeMap::new();

    for book in &event.bookmakers {
        for market in &book.markets {
            let Ok(market_type) = market.key.parse::<MarketType>() else {
                continue;
            };
            if !markets.is_empty() && !markets.contains(&market_type) {
                continue;
            }
            let observed_at = market.last_update.or(book.last_update).unwrap_or(as_of);

            let quotes = grouped
                .entry(market_type)
                .or_default()
                .entry(book.key.clone())
                .or_default();

            for outcome in &market.outcomes {
                let id = outcome_id(outcome);
                match OddsQuote::new(
                    &event.id,
                    &book.key,
                    market_type,
                    &id,
                    outcome.price,
                    observed_at,
                ) {
                    Ok(q) => quotes.push(q),
                    Err(e) => warn!(
                        event_id = %event.id,
                        bookmaker = %book.key,
                        error = %e,
                        "Dropping invalid quote"
                    ),
                }
            }
        }
    }

    let info = event.info();
    let mut snapshots = Vec::new();

    for (market_type, books) in grouped {
        let Some(reference) = reference_outcome_set(&books, sharp_books) else {
            continue;
        };

        let mut snapshot = MarketSnapshot::new(info.clone(), market_type, as_of);
        for (book, quotes) in books {
            if outcome_set(&quotes) != reference {
                debug!(
                    event_id = %event.id,
                    market = %market_type,
                    bookmaker = %book,
                    "Outcome set differs from reference, skipping bookmaker"
                );
                continue;
            }
            for q in quotes {
                snapshot.insert(q);
            }
        }

        if snapshot.outcome_count() > 0 {
            snapshots.push(snapshot);
        }
    }

    snapshots
}

/// Normalize a batch of events.
pub fn normalize_events(
    events: &[RawEvent],
    markets: &[MarketType],
    sharp_books: &[String],
    as_of: DateTime<Utc>,
) -> Vec<MarketSnapshot> {
    events
        .iter()
        .flat_map(|e| normalize_event(e, markets, sharp_books, as_of))
        .collect()
}

fn outcome_set(quotes: &[OddsQuote]) -> BTreeSet<String> {
    quotes.iter().map(|q| q.outcome_id.clone()).collect()
}

/// Most common outcome set among sharp books, or among all books when no
/// sharp book quotes the market. Ties resolve to the lexicographically
/// first set, which is not necessarily the one with fewest outcomes.
fn reference_outcome_set(
    books: &BTreeMap<String, Vec<OddsQuote>>,
    sharp_books: &[String],
) -> Option<BTreeSet<String>> {
    let sharp: Vec<&Vec<OddsQuote>> = books
        .iter()
        .filter(|(book, quotes)| sharp_books.contains(*book) && !quotes.is_empty())
        .map(|(_, q)| q)
        .collect();

    let candidates: Vec<&Vec<OddsQuote>> = if sharp.is_empty() {
        books.values().filter(|q| !q.is_empty()).collect()
    } else {
        sharp
    };

    let mut counts: BTreeMap<BTreeSet<String>, usize> = BTreeMap::new();
    for quotes in candidates {
        *counts.entry(outcome_set(quotes)).or_default() += 1;
    }

    // BTreeMap iterates sets in lexicographic order; keep the first maximum.
    let mut best: Option<(BTreeSet<String>, usize)> = None;
    for (set, count) in counts {
        if best.as_ref().map_or(true, |(_, c)| count > *c) {
            best = Some((set, count));
        }
    }
    best.map(|(set, _)| set)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
