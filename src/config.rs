//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fs;

use crate::types::{BetMode, DevigMethod, EngineError, MarketType};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub bankroll: BankrollConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    pub odds_api: OddsApiConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
}

/// How placements are carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Real placements through the configured executor.
    Live,
    /// Simulated placements recorded in the paper namespace.
    Paper,
    /// Log what would be placed; nothing is recorded.
    DryRun,
}

impl RunMode {
    /// Ledger namespace for this mode. Dry runs never touch the ledger.
    pub fn ledger_mode(&self) -> Option<BetMode> {
        match self {
            RunMode::Live => Some(BetMode::Live),
            RunMode::Paper => Some(BetMode::Paper),
            RunMode::DryRun => None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    pub scan_interval_secs: u64,
    pub mode: RunMode,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BankrollConfig {
    pub amount: Decimal,
    /// Fractional-Kelly multiplier (0.25 = quarter-Kelly).
    pub kelly_fraction: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StrategyConfig {
    pub devig_method: DevigMethod,
    pub min_ev_threshold: f64,
    pub min_true_probability: f64,
    /// Minimum applied Kelly fraction of bankroll (0.01 = 1%).
    pub min_kelly_pct: f64,
    /// Stakes are floored to a multiple of this. 0 disables rounding.
    pub stake_rounding: Decimal,
    pub max_odds: Option<f64>,
    pub max_days_ahead: Option<i64>,
    pub one_bet_per_event: bool,
    pub skip_already_bet_events: bool,
    pub max_bets_per_cycle: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            devig_method: DevigMethod::Proportional,
            min_ev_threshold: 0.03,
            min_true_probability: 0.0,
            min_kelly_pct: 0.0,
            stake_rounding: Decimal::ZERO,
            max_odds: None,
            max_days_ahead: None,
            one_bet_per_event: true,
            skip_already_bet_events: false,
            max_bets_per_cycle: 1,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Failed placements before a key is ignored. 0 disables ignoring.
    pub failure_threshold: u32,
    pub ledger_dir: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            ledger_dir: "data".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OddsApiConfig {
    #[serde(default = "default_odds_base_url")]
    pub base_url: String,
    pub api_key_env: String,
    #[serde(default = "default_regions")]
    pub regions: String,
    #[serde(default = "default_markets")]
    pub markets: Vec<MarketType>,
    pub sports: Vec<String>,
    pub sharp_books: Vec<String>,
    pub betting_bookmakers: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_odds_base_url() -> String {
    "https://api.the-odds-api.com/v4".to_string()
}

fn default_regions() -> String {
    "uk,eu".to_string()
}

fn default_markets() -> Vec<MarketType> {
    vec![MarketType::H2h]
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ExecutorConfig {
    /// HTTP endpoint accepting placement requests (live mode only).
    pub endpoint: Option<String>,
    pub api_key_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BacktestConfig {
    /// Directory for cached historical snapshots. None keeps them in memory.
    pub cache_dir: Option<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub snapshot_interval_hours: i64,
    pub initial_bankroll: Option<Decimal>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            cache_dir: Some("backtest_cache".to_string()),
            start: None,
            end: None,
            snapshot_interval_hours: 12,
            initial_bankroll: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot act on sensibly.
    pub fn validate(&self) -> Result<(), EngineError> {
        let s = &self.strategy;
        if self.agent.scan_interval_secs == 0 {
            return Err(EngineError::Config("agent.scan_interval_secs must be > 0".into()));
        }
        if self.bankroll.amount < Decimal::ZERO {
            return Err(EngineError::Config("bankroll.amount must be >= 0".into()));
        }
        if !(0.0..=1.0).contains(&self.bankroll.kelly_fraction) {
            return Err(EngineError::Config("bankroll.kelly_fraction must be in [0, 1]".into()));
        }
        if !(0.0..1.0).contains(&s.min_true_probability) {
            return Err(EngineError::Config("strategy.min_true_probability must be in [0, 1)".into()));
        }
        if !(0.0..=1.0).contains(&s.min_kelly_pct) {
            return Err(EngineError::Config("strategy.min_kelly_pct must be in [0, 1]".into()));
        }
        if s.stake_rounding < Decimal::ZERO {
            return Err(EngineError::Config("strategy.stake_rounding must be >= 0".into()));
        }
        if matches!(s.max_odds, Some(o) if o <= 1.0) {
            return Err(EngineError::Config("strategy.max_odds must be > 1.0".into()));
        }
        if matches!(s.max_days_ahead, Some(d) if d < 0) {
            return Err(EngineError::Config("strategy.max_days_ahead must be >= 0".into()));
        }
        if self.odds_api.sharp_books.is_empty() {
            return Err(EngineError::Config("odds_api.sharp_books must not be empty".into()));
        }
        if self.backtest.snapshot_interval_hours <= 0 {
            return Err(EngineError::Config("backtest.snapshot_interval_hours must be > 0".into()));
        }
        if self.agent.mode == RunMode::Live && self.executor.endpoint.is_none() {
            return Err(EngineError::Config("live mode requires executor.endpoint".into()));
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Bankroll used by the backtest when none is configured for it.
    pub fn backtest_bankroll(&self) -> Decimal {
        self.backtest.initial_bankroll.unwrap_or(self.bankroll.amount).max(dec!(0))
    }
}
