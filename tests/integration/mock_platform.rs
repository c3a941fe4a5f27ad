//! Mock collaborators for integration testing.
//!
//! Deterministic in-memory stand-ins for the odds feed, the historical
//! archive, the scores source and the placement executor. Every mock
//! counts its calls and can be forced to fail from test code.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sharpline::data::{HistoricalOddsResponse, RawBookmaker, RawEvent, RawMarket, RawOutcome};
use sharpline::platforms::{HistoricalOddsProvider, OddsProvider, PlacementExecutor, SettlementSource};
use sharpline::types::{EngineError, EventResult, MarketType, PlacementConfirmation, PlacementRequest};

/// Fixed clock for every scenario.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap()
}

fn book(key: &str, home_name: &str, home: f64, away_name: &str, away: f64) -> RawBookmaker {
    RawBookmaker {
        key: key.to_string(),
        title: key.to_string(),
        last_update: None,
        markets: vec![RawMarket {
            key: "h2h".to_string(),
            last_update: None,
            outcomes: vec![
                RawOutcome { name: home_name.to_string(), price: home, point: None },
                RawOutcome { name: away_name.to_string(), price: away, point: None },
            ],
        }],
    }
}

/// A two-way fixture: the sharp book prices it even, the soft book offers
/// `soft_home` on the home side.
pub fn make_event(id: &str, home: &str, away: &str, commence: DateTime<Utc>, soft_home: f64) -> RawEvent {
    RawEvent {
        id: id.to_string(),
        sport_key: "basketball_nba".to_string(),
        commence_time: commence,
        home_team: home.to_string(),
        away_team: away.to_string(),
        bookmakers: vec![
            book("pinnacle", home, 1.95, away, 1.95),
            book("bet365", home, soft_home, away, 1.80),
        ],
    }
}

/// Default slate: one strong edge, one mild edge, one with no edge.
pub fn default_slate() -> Vec<RawEvent> {
    let t = base_time();
    vec![
        make_event("nba-1", "Boston Celtics", "New York Knicks", t + Duration::hours(6), 2.25),
        make_event("nba-2", "Denver Nuggets", "Phoenix Suns", t + Duration::hours(8), 2.08),
        make_event("nba-3", "Miami Heat", "Chicago Bulls", t + Duration::hours(9), 1.90),
    ]
}

// ---------------------------------------------------------------------------
// Odds feed
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MockOdds {
    events: Arc<Mutex<Vec<RawEvent>>>,
    calls: Arc<AtomicUsize>,
    force_error: Arc<Mutex<Option<String>>>,
}

impl MockOdds {
    pub fn new(events: Vec<RawEvent>) -> Self {
        Self {
            events: Arc::new(Mutex::new(events)),
            ..Self::default()
        }
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OddsProvider for MockOdds {
    async fn fetch_odds(&self, _sport: &str, _markets: &[MarketType]) -> Result<Vec<RawEvent>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = self.force_error.lock().unwrap().as_ref() {
            return Err(EngineError::Fetch {
                source_name: "mock".to_string(),
                message: msg.clone(),
            });
        }
        Ok(self.events.lock().unwrap().clone())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Historical archive
// ---------------------------------------------------------------------------

/// Serves the default slate at every instant, with the event start times
/// anchored to `base_time`.
#[derive(Clone, Default)]
pub struct MockHistory {
    calls: Arc<AtomicUsize>,
}

impl MockHistory {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HistoricalOddsProvider for MockHistory {
    async fn fetch_historical(
        &self,
        _sport: &str,
        _markets: &[MarketType],
        as_of: DateTime<Utc>,
    ) -> Result<HistoricalOddsResponse, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(HistoricalOddsResponse {
            timestamp: as_of,
            previous_timestamp: None,
            next_timestamp: None,
            data: default_slate(),
        })
    }
}

// ---------------------------------------------------------------------------
// Scores
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MockResults {
    results: Arc<Mutex<HashMap<String, EventResult>>>,
    calls: Arc<AtomicUsize>,
}

impl MockResults {
    /// Mark an event final with the given score.
    pub fn finish(&self, event: &RawEvent, home_score: i64, away_score: i64) {
        self.results.lock().unwrap().insert(
            event.id.clone(),
            EventResult {
                event_id: event.id.clone(),
                home_team: event.home_team.clone(),
                away_team: event.away_team.clone(),
                home_score,
                away_score,
            },
        );
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SettlementSource for MockResults {
    async fn fetch_result(&self, _sport: &str, event_id: &str) -> Result<Option<EventResult>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.results.lock().unwrap().get(event_id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MockExecutor {
    requests: Arc<Mutex<Vec<PlacementRequest>>>,
    force_error: Arc<Mutex<Option<String>>>,
}

impl MockExecutor {
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    /// Every request received, successful or not.
    pub fn requests(&self) -> Vec<PlacementRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlacementExecutor for MockExecutor {
    async fn place(&self, request: &PlacementRequest) -> Result<PlacementConfirmation, EngineError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(msg) = self.force_error.lock().unwrap().as_ref() {
            return Err(EngineError::Placement {
                bookmaker: request.bookmaker_id.clone(),
                reason: msg.clone(),
            });
        }
        Ok(PlacementConfirmation {
            confirmation_id: format!("MOCK-{}", uuid::Uuid::new_v4()),
            bookmaker_id: request.bookmaker_id.clone(),
            stake: request.stake,
            accepted_price: request.decimal_price,
            placed_at: base_time(),
            simulated: false,
        })
    }

    fn is_live(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_mock_odds_counts_and_fails() {
        let odds = MockOdds::new(default_slate());
        assert_eq!(odds.fetch_odds("basketball_nba", &[MarketType::H2h]).await.unwrap().len(), 3);

        odds.set_error("HTTP 429");
        assert!(odds.fetch_odds("basketball_nba", &[]).await.is_err());
        odds.clear_error();
        assert!(odds.fetch_odds("basketball_nba", &[]).await.is_ok());
        assert_eq!(odds.calls(), 3);
    }

    #[tokio::test]
    async fn test_mock_executor_records_requests() {
        let exec = MockExecutor::default();
        let request = PlacementRequest {
            event_id: "nba-1".to_string(),
            market_type: MarketType::H2h,
            bookmaker_id: "bet365".to_string(),
            outcome_id: "Boston Celtics".to_string(),
            stake: dec!(20),
            decimal_price: 2.25,
        };
        let conf = exec.place(&request).await.unwrap();
        assert_eq!(conf.stake, dec!(20));

        exec.set_error("odds changed");
        let err = exec.place(&request).await.unwrap_err();
        assert!(err.to_string().contains("odds changed"));
        assert_eq!(exec.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_results_not_final_until_finished() {
        let results = MockResults::default();
        let slate = default_slate();
        assert!(results.fetch_result("basketball_nba", "nba-1").await.unwrap().is_none());
        results.finish(&slate[0], 110, 101);
        let r = results.fetch_result("basketball_nba", "nba-1").await.unwrap().unwrap();
        assert_eq!(r.home_score, 110);
        assert_eq!(results.calls(), 2);
    }
}
