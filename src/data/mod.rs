//! Market data payloads.
//!
//! Wire shapes returned by Odds-API-style providers (live odds, historical
//! odds, scores) and the normalizer that turns them into `MarketSnapshot`s.

pub mod normalizer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{EventInfo, EventResult};

// ---------------------------------------------------------------------------
// Odds payloads
// ---------------------------------------------------------------------------

/// One fixture with every bookmaker's markets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: String,
    pub sport_key: String,
    pub commence_time: DateTime<Utc>,
    pub home_team: String,
    pub away_team: String,
    #[serde(default)]
    pub bookmakers: Vec<RawBookmaker>,
}

impl RawEvent {
    pub fn info(&self) -> EventInfo {
        EventInfo {
            event_id: self.id.clone(),
            sport: self.sport_key.clone(),
            home_team: self.home_team.clone(),
            away_team: self.away_team.clone(),
            commence_time: self.commence_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBookmaker {
    pub key: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub markets: Vec<RawMarket>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMarket {
    /// Provider market key, e.g. `h2h`, `spreads`, `h2h_lay`.
    pub key: String,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub outcomes: Vec<RawOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOutcome {
    pub name: String,
    pub price: f64,
    /// Handicap or total line for spreads/totals.
    #[serde(default)]
    pub point: Option<f64>,
}

/// Envelope of the historical odds endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalOddsResponse {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub previous_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data: Vec<RawEvent>,
}

// ---------------------------------------------------------------------------
// Score payloads
// ---------------------------------------------------------------------------

/// One fixture from the scores endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawScoreEvent {
    pub id: String,
    #[serde(default)]
    pub completed: bool,
    pub home_team: String,
    pub away_team: String,
    #[serde(default)]
    pub scores: Option<Vec<RawScore>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawScore {
    pub name: String,
    pub score: String,
}

impl RawScoreEvent {
    /// Final result, or `None` while the event is not final or the score
    /// line cannot be read.
    pub fn to_result(&self) -> Option<EventResult> {
        if !self.completed {
            return None;
        }
        let scores = self.scores.as_ref()?;
        let score_of = |team: &str| {
            scores
                .iter()
                .find(|s| s.name == team)
                .and_then(|s| s.score.trim().parse::<i64>().ok())
        };
        Some(EventResult {
            event_id: self.id.clone(),
            home_team: self.home_team.clone(),
            away_team: self.away_team.clone(),
            home_score: score_of(&self.home_team)?,
            away_score: score_of(&self.away_team)?,
        })
    }
}
