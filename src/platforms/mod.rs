//! External collaborators.
//!
//! Defines the boundary traits the engine talks to and provides the
//! Odds-API-style REST client that implements the read side:
//! - `OddsProvider`: current odds per sport
//! - `HistoricalOddsProvider`: odds as they stood at a past instant
//! - `SettlementSource`: final scores
//! - `PlacementExecutor`: turns a placement request into a definite outcome

pub mod odds_api;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::data::{HistoricalOddsResponse, RawEvent};
use crate::types::{EngineError, EventResult, MarketType, PlacementConfirmation, PlacementRequest};

#[cfg(test)]
use mockall::automock;

/// Live odds feed.
#[async_trait]
pub trait OddsProvider: Send + Sync {
    /// Every upcoming event of `sport` with the requested markets.
    async fn fetch_odds(&self, sport: &str, markets: &[MarketType]) -> Result<Vec<RawEvent>, EngineError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// Point-in-time odds archive used by the backtester.
#[async_trait]
pub trait HistoricalOddsProvider: Send + Sync {
    async fn fetch_historical(
        &self,
        sport: &str,
        markets: &[MarketType],
        as_of: DateTime<Utc>,
    ) -> Result<HistoricalOddsResponse, EngineError>;
}

/// Source of final results.
#[async_trait]
pub trait SettlementSource: Send + Sync {
    /// `Ok(None)` while the event is not final.
    async fn fetch_result(&self, sport: &str, event_id: &str) -> Result<Option<EventResult>, EngineError>;
}

/// Places bets. Every call ends in a confirmation or a `Placement` error;
/// there is no in-between.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PlacementExecutor: Send + Sync {
    async fn place(&self, request: &PlacementRequest) -> Result<PlacementConfirmation, EngineError>;

    /// Whether placements cost real money.
    fn is_live(&self) -> bool;
}
