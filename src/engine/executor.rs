//! Placement executors.
//!
//! `PaperExecutor` confirms every request without I/O and serves paper and
//! dry-run modes. `HttpExecutor` forwards requests to an external placement
//! service as JSON. Either way the caller gets a definite
//! `PlacementOutcome` through `execute`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::platforms::PlacementExecutor;
use crate::types::{EngineError, PlacementConfirmation, PlacementOutcome, PlacementRequest};

/// Run one placement to a definite outcome. Errors become `Failed`.
pub async fn execute(executor: &dyn PlacementExecutor, request: &PlacementRequest) -> PlacementOutcome {
    match executor.place(request).await {
        Ok(conf) => PlacementOutcome::Placed(conf),
        Err(e) => {
            let reason = match e {
                EngineError::Placement { reason, .. } => reason,
                other => other.to_string(),
            };
            warn!(
                event_id = %request.event_id,
                bookmaker = %request.bookmaker_id,
                reason = %reason,
                "Placement attempt failed"
            );
            PlacementOutcome::Failed { reason }
        }
    }
}

// ---------------------------------------------------------------------------
// Paper
// ---------------------------------------------------------------------------

/// Always confirms at the requested price and stake.
#[derive(Debug, Clone)]
pub struct PaperExecutor {
    label: &'static str,
}

impl PaperExecutor {
    pub fn paper() -> Self {
        Self { label: "paper" }
    }

    pub fn dry_run() -> Self {
        Self { label: "dry-run" }
    }
}

#[async_trait]
impl PlacementExecutor for PaperExecutor {
    async fn place(&self, request: &PlacementRequest) -> Result<PlacementConfirmation, EngineError> {
        info!(
            event_id = %request.event_id,
            outcome = %request.outcome_id,
            bookmaker = %request.bookmaker_id,
            price = format!("{:.2}", request.decimal_price),
            stake = format!("{:.2}", request.stake),
            "[{}] Would place bet",
            self.label.to_uppercase()
        );
        Ok(PlacementConfirmation {
            confirmation_id: format!("{}-{}", self.label, uuid::Uuid::new_v4()),
            bookmaker_id: request.bookmaker_id.clone(),
            stake: request.stake,
            accepted_price: request.decimal_price,
            placed_at: Utc::now(),
            simulated: true,
        })
    }

    fn is_live(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Reply of the placement service. Either side may omit the price/stake
/// echo; the request values are assumed then.
#[derive(Debug, Deserialize)]
struct PlacementReply {
    #[serde(default = "default_accepted")]
    accepted: bool,
    #[serde(default)]
    confirmation_id: Option<String>,
    #[serde(default)]
    accepted_price: Option<f64>,
    #[serde(default)]
    stake: Option<Decimal>,
    #[serde(default)]
    reason: Option<String>,
}

fn default_accepted() -> bool {
    true
}

pub struct HttpExecutor {
    http: Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl HttpExecutor {
    pub fn new(endpoint: &str, api_key: Option<SecretString>, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("sharpline/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client for placement executor")?;

        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            api_key,
        })
    }

    fn placement_error(request: &PlacementRequest, reason: String) -> EngineError {
        EngineError::Placement {
            bookmaker: request.bookmaker_id.clone(),
            reason,
        }
    }
}

#[async_trait]
impl PlacementExecutor for HttpExecutor {
    async fn place(&self, request: &PlacementRequest) -> Result<PlacementConfirmation, EngineError> {
        debug!(endpoint = %self.endpoint, event_id = %request.event_id, "Submitting placement");

        let mut req = self.http.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key.expose_secret());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Self::placement_error(request, format!("request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::placement_error(request, format!("HTTP {status}: {body}")));
        }

        let reply: PlacementReply = resp
            .json()
            .await
            .map_err(|e| Self::placement_error(request, format!("invalid reply: {e}")))?;

        if !reply.accepted {
            let reason = reply.reason.unwrap_or_else(|| "rejected by bookmaker".to_string());
            return Err(Self::placement_error(request, reason));
        }

        let conf = PlacementConfirmation {
            confirmation_id: reply
                .confirmation_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            bookmaker_id: request.bookmaker_id.clone(),
            stake: reply.stake.unwrap_or(request.stake),
            accepted_price: reply.accepted_price.unwrap_or(request.decimal_price),
            placed_at: Utc::now(),
            simulated: false,
        };

        info!(
            confirmation_id = %conf.confirmation_id,
            event_id = %request.event_id,
            bookmaker = %conf.bookmaker_id,
            price = format!("{:.2}", conf.accepted_price),
            stake = format!("{:.2}", conf.stake),
            "Bet placed"
        );

        Ok(conf)
    }

    fn is_live(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
