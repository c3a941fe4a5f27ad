//! Odds-API-style REST client.
//!
//! One HTTP client implements the odds, historical-odds and scores
//! collaborators. The API key travels as a query parameter and is held as
//! a `SecretString` so it never lands in logs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use super::{HistoricalOddsProvider, OddsProvider, SettlementSource};
use crate::config::OddsApiConfig;
use crate::data::{HistoricalOddsResponse, RawEvent, RawScoreEvent};
use crate::types::{EngineError, EventResult, MarketType};

const SOURCE_NAME: &str = "odds_api";

/// How far back the scores endpoint looks for completed events.
const SCORES_DAYS_FROM: u32 = 3;

#[derive(Debug)]
pub struct OddsApiClient {
    http: Client,
    base_url: String,
    api_key: SecretString,
    regions: String,
}

impl OddsApiClient {
    pub fn new(config: &OddsApiConfig, api_key: SecretString) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("sharpline/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client for odds API")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            regions: config.regions.clone(),
        })
    }

    fn odds_url(&self, sport: &str, markets: &[MarketType]) -> String {
        format!(
            "{}/sports/{}/odds?regions={}&markets={}&oddsFormat=decimal&dateFormat=iso",
            self.base_url,
            urlencoding::encode(sport),
            urlencoding::encode(&self.regions),
            urlencoding::encode(&market_list(markets)),
        )
    }

    fn historical_url(&self, sport: &str, markets: &[MarketType], as_of: DateTime<Utc>) -> String {
        format!(
            "{}/historical/sports/{}/odds?regions={}&markets={}&oddsFormat=decimal&dateFormat=iso&date={}",
            self.base_url,
            urlencoding::encode(sport),
            urlencoding::encode(&self.regions),
            urlencoding::encode(&market_list(markets)),
            urlencoding::encode(&as_of.to_rfc3339_opts(SecondsFormat::Secs, true)),
        )
    }

    fn scores_url(&self, sport: &str, event_id: &str) -> String {
        format!(
            "{}/sports/{}/scores?daysFrom={}&dateFormat=iso&eventIds={}",
            self.base_url,
            urlencoding::encode(sport),
            SCORES_DAYS_FROM,
            urlencoding::encode(event_id),
        )
    }

    /// GET `url` (key appended here, never logged) and decode JSON.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, EngineError> {
        debug!(url = %url, "Odds API request");

        let keyed = format!(
            "{url}&apiKey={}",
            urlencoding::encode(self.api_key.expose_secret())
        );
        let resp = self
            .http
            .get(&keyed)
            .send()
            .await
            .map_err(|e| fetch_error(format!("request failed: {}", e.without_url())))?;

        log_quota(&resp);

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(fetch_error(format!("HTTP {status}: {body}")));
        }

        resp.json::<T>()
            .await
            .map_err(|e| fetch_error(format!("invalid response body: {}", e.without_url())))
    }
}

fn market_list(markets: &[MarketType]) -> String {
    let markets = if markets.is_empty() { &[MarketType::H2h][..] } else { markets };
    markets.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(",")
}

fn fetch_error(message: String) -> EngineError {
    EngineError::Fetch {
        source_name: SOURCE_NAME.to_string(),
        message,
    }
}

fn log_quota(resp: &Response) {
    let header = |name: &str| {
        resp.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let remaining = header("x-requests-remaining");
    let used = header("x-requests-used");

    if let Some(r) = remaining.as_deref().and_then(|r| r.parse::<f64>().ok()) {
        if r < 10.0 {
            warn!(remaining = r, "Odds API quota nearly exhausted");
        }
    }
    debug!(remaining = ?remaining, used = ?used, "Odds API quota");
}

#[async_trait]
impl OddsProvider for OddsApiClient {
    async fn fetch_odds(&self, sport: &str, markets: &[MarketType]) -> Result<Vec<RawEvent>, EngineError> {
        let events: Vec<RawEvent> = self.get_json(&self.odds_url(sport, markets)).await?;
        debug!(sport, events = events.len(), "Odds fetched");
        Ok(events)
    }

    fn name(&self) -> &str {
        SOURCE_NAME
    }
}

#[async_trait]
impl HistoricalOddsProvider for OddsApiClient {
    async fn fetch_historical(
        &self,
        sport: &str,
        markets: &[MarketType],
        as_of: DateTime<Utc>,
    ) -> Result<HistoricalOddsResponse, EngineError> {
        let resp: HistoricalOddsResponse =
            self.get_json(&self.historical_url(sport, markets, as_of)).await?;
        debug!(
            sport,
            as_of = %as_of,
            snapshot_at = %resp.timestamp,
            events = resp.data.len(),
            "Historical odds fetched"
        );
        Ok(resp)
    }
}

#[async_trait]
impl SettlementSource for OddsApiClient {
    async fn fetch_result(&self, sport: &str, event_id: &str) -> Result<Option<EventResult>, EngineError> {
        let events: Vec<RawScoreEvent> = self.get_json(&self.scores_url(sport, event_id)).await?;
        Ok(events
            .iter()
            .find(|e| e.id == event_id)
            .and_then(RawScoreEvent::to_result))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_client() -> OddsApiClient {
        let config = OddsApiConfig {
            base_url: "https://odds.example.com/v4/".to_string(),
            api_key_env: "ODDS_API_KEY".to_string(),
            regions: "uk,eu".to_string(),
            markets: vec![MarketType::H2h],
            sports: vec!["soccer_epl".to_string()],
            sharp_books: vec!["pinnacle".to_string()],
            betting_bookmakers: vec!["bet365".to_string()],
            timeout_secs: 5,
        };
        OddsApiClient::new(&config, SecretString::new("s3cret-key".to_string())).unwrap()
    }

    #[test]
    fn test_odds_url() {
        let url = make_client().odds_url("soccer_epl", &[MarketType::H2h, MarketType::Totals]);
        assert_eq!(
            url,
            "https://odds.example.com/v4/sports/soccer_epl/odds?regions=uk%2Ceu&markets=h2h%2Ctotals&oddsFormat=decimal&dateFormat=iso"
        );
    }

    #[test]
    fn test_historical_url_carries_date() {
        let as_of = Utc.with_ymd_and_hms(2024, 11, 2, 12, 0, 0).unwrap();
        let url = make_client().historical_url("basketball_nba", &[], as_of);
        assert!(url.starts_with("https://odds.example.com/v4/historical/sports/basketball_nba/odds?"));
        assert!(url.contains("markets=h2h&"));
        assert!(url.ends_with("date=2024-11-02T12%3A00%3A00Z"));
    }

    #[test]
    fn test_scores_url_filters_event() {
        let url = make_client().scores_url("soccer_epl", "abc123");
        assert!(url.contains("/sports/soccer_epl/scores?daysFrom=3"));
        assert!(url.ends_with("eventIds=abc123"));
    }

    #[test]
    fn test_api_key_not_in_debug_or_urls() {
        let client = make_client();
        assert!(!format!("{client:?}").contains("s3cret-key"));
        assert!(!client.odds_url("soccer_epl", &[]).contains("s3cret-key"));
    }
}
