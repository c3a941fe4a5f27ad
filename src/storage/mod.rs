//! Persistence layer.
//!
//! The bet ledger is append-only: every status change is a new line with
//! the same `bet_id`, and readers fold the log keeping the last line per
//! bet. Failure counters live beside it as a small JSON document that is
//! rewritten atomically (temp file + rename).

use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::types::{BetRecord, FailureEntry, LedgerKey};

const BETS_FILE: &str = "bets.jsonl";
const FAILURES_FILE: &str = "failures.json";

/// Durable home of bet records and failure counters.
pub trait LedgerStore: Send {
    /// Append one record. Must be durable before returning.
    fn append(&mut self, record: &BetRecord) -> Result<()>;

    /// Every stored line, oldest first.
    fn scan(&self) -> Result<Vec<BetRecord>>;

    /// Insert or replace the failure entry for its ledger key.
    fn put_failure(&mut self, entry: &FailureEntry) -> Result<()>;

    fn failures(&self) -> Result<Vec<FailureEntry>>;

    /// Current state of every bet under `key`.
    fn lookup(&self, key: &LedgerKey) -> Result<Vec<BetRecord>> {
        Ok(fold_latest(self.scan()?)
            .into_iter()
            .filter(|r| &r.ledger_key() == key)
            .collect())
    }
}

/// Collapse a ledger log to the latest line per `bet_id`, keeping the
/// order in which bets first appeared.
pub fn fold_latest(lines: Vec<BetRecord>) -> Vec<BetRecord> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<BetRecord> = Vec::new();
    for rec in lines {
        match index.get(&rec.bet_id) {
            Some(&i) => {
                if rec.updated_at >= out[i].updated_at {
                    out[i] = rec;
                }
            }
            None => {
                index.insert(rec.bet_id.clone(), out.len());
                out.push(rec);
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Volatile store for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    lines: Vec<BetRecord>,
    failures: BTreeMap<LedgerKey, FailureEntry>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryLedger {
    fn append(&mut self, record: &BetRecord) -> Result<()> {
        self.lines.push(record.clone());
        Ok(())
    }

    fn scan(&self) -> Result<Vec<BetRecord>> {
        Ok(self.lines.clone())
    }

    fn put_failure(&mut self, entry: &FailureEntry) -> Result<()> {
        self.failures.insert(entry.ledger_key(), entry.clone());
        Ok(())
    }

    fn failures(&self) -> Result<Vec<FailureEntry>> {
        Ok(self.failures.values().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// JSON-lines store
// ---------------------------------------------------------------------------

/// `bets.jsonl` + `failures.json` under one directory.
#[derive(Debug)]
pub struct JsonlLedger {
    bets_path: PathBuf,
    failures_path: PathBuf,
    failures: BTreeMap<LedgerKey, FailureEntry>,
}

impl JsonlLedger {
    /// Open (creating if needed) the ledger in `dir`.
    ///
    /// A torn final line left by a crash mid-append is cut off so later
    /// appends start on a clean line.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create ledger directory {}", dir.display()))?;

        let bets_path = dir.join(BETS_FILE);
        let failures_path = dir.join(FAILURES_FILE);

        if bets_path.exists() {
            repair_torn_tail(&bets_path)?;
        }

        let failures = if failures_path.exists() {
            let json = fs::read_to_string(&failures_path)
                .with_context(|| format!("Failed to read {}", failures_path.display()))?;
            let entries: Vec<FailureEntry> = serde_json::from_str(&json)
                .with_context(|| format!("Failed to parse {}", failures_path.display()))?;
            entries.into_iter().map(|e| (e.ledger_key(), e)).collect()
        } else {
            BTreeMap::new()
        };

        info!(
            path = %dir.display(),
            failure_entries = failures.len(),
            "Ledger opened"
        );

        Ok(Self {
            bets_path,
            failures_path,
            failures,
        })
    }

    pub fn bets_path(&self) -> &Path {
        &self.bets_path
    }

    fn write_failures(&self) -> Result<()> {
        let entries: Vec<&FailureEntry> = self.failures.values().collect();
        let json = serde_json::to_string_pretty(&entries)
            .context("Failed to serialise failure entries")?;

        let tmp = self.failures_path.with_extension("json.tmp");
        {
            let mut f = File::create(&tmp)
                .with_context(|| format!("Failed to create {}", tmp.display()))?;
            f.write_all(json.as_bytes())?;
            f.sync_data()?;
        }
        fs::rename(&tmp, &self.failures_path)
            .with_context(|| format!("Failed to replace {}", self.failures_path.display()))?;
        Ok(())
    }
}

impl LedgerStore for JsonlLedger {
    fn append(&mut self, record: &BetRecord) -> Result<()> {
        let mut line = serde_json::to_string(record).context("Failed to serialise bet record")?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.bets_path)
            .with_context(|| format!("Failed to open {}", self.bets_path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("Failed to append to {}", self.bets_path.display()))?;
        file.sync_data()?;

        debug!(bet_id = %record.bet_id, status = %record.status, "Ledger line appended");
        Ok(())
    }

    fn scan(&self) -> Result<Vec<BetRecord>> {
        if !self.bets_path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.bets_path)
            .with_context(|| format!("Failed to read {}", self.bets_path.display()))?;
        parse_lines(&contents, &self.bets_path)
    }

    fn put_failure(&mut self, entry: &FailureEntry) -> Result<()> {
        self.failures.insert(entry.ledger_key(), entry.clone());
        self.write_failures()
    }

    fn failures(&self) -> Result<Vec<FailureEntry>> {
        Ok(self.failures.values().cloned().collect())
    }
}

fn parse_lines(contents: &str, path: &Path) -> Result<Vec<BetRecord>> {
    let lines: Vec<&str> = contents.lines().filter(|l| !l.trim().is_empty()).collect();
    let last = lines.len().saturating_sub(1);
    let mut records = Vec::with_capacity(lines.len());

    for (i, line) in lines.iter().enumerate() {
        match serde_json::from_str::<BetRecord>(line) {
            Ok(rec) => records.push(rec),
            Err(e) if i == last && !contents.ends_with('\n') => {
                warn!(path = %path.display(), error = %e, "Skipping torn final ledger line");
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Corrupt ledger line {} in {}", i + 1, path.display())
                });
            }
        }
    }
    Ok(records)
}

/// Truncate everything after the last newline.
fn repair_torn_tail(path: &Path) -> Result<()> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    if bytes.is_empty() || bytes.ends_with(b"\n") {
        return Ok(());
    }
    let keep = bytes.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
    warn!(
        path = %path.display(),
        dropped_bytes = bytes.len() - keep,
        "Truncating torn final ledger line"
    );
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    file.set_len(keep as u64)?;
    file.sync_data()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BetMode, BetStatus, MarketType, OpportunityKey};
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn temp_dir() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("sharpline_test_ledger_{}", uuid::Uuid::new_v4()));
        p
    }

    fn make_record(bet_id: &str, outcome: &str, status: BetStatus, minute: i64) -> BetRecord {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minute);
        BetRecord {
            bet_id: bet_id.to_string(),
            event_id: "evt-1".to_string(),
            sport: "soccer_epl".to_string(),
            market_type: MarketType::H2h,
            outcome_id: outcome.to_string(),
            bookmaker_id: "bet365".to_string(),
            decimal_price: 2.1,
            stake: dec!(25),
            placed_at: at,
            status,
            mode: BetMode::Paper,
            fair_probability: 0.5,
            ev_fraction: 0.05,
            updated_at: at,
            settled_at: None,
            profit_loss: None,
            confirmation_id: None,
            notes: None,
        }
    }

    fn make_failure(outcome: &str, count: u32) -> FailureEntry {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        FailureEntry {
            key: OpportunityKey {
                event_id: "evt-1".to_string(),
                market_type: MarketType::H2h,
                outcome_id: outcome.to_string(),
            },
            mode: BetMode::Paper,
            failure_count: count,
            ignored: count >= 3,
            first_failure_at: at,
            last_failure_at: at,
            last_reason: Some("odds changed".to_string()),
        }
    }

    #[test]
    fn test_fold_latest_last_wins() {
        let lines = vec![
            make_record("b1", "Arsenal", BetStatus::Pending, 0),
            make_record("b2", "Chelsea", BetStatus::NotPlaced, 1),
            make_record("b1", "Arsenal", BetStatus::Won, 90),
        ];
        let folded = fold_latest(lines);
        assert_eq!(folded.len(), 2);
        assert_eq!(folded[0].bet_id, "b1");
        assert_eq!(folded[0].status, BetStatus::Won);
        assert_eq!(folded[1].status, BetStatus::NotPlaced);
    }

    #[test]
    fn test_memory_lookup_by_ledger_key() {
        let mut store = MemoryLedger::new();
        store.append(&make_record("b1", "Arsenal", BetStatus::Pending, 0)).unwrap();
        store.append(&make_record("b2", "Chelsea", BetStatus::Pending, 0)).unwrap();

        let key = make_record("x", "Arsenal", BetStatus::Pending, 0).ledger_key();
        let found = store.lookup(&key).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].bet_id, "b1");

        let live_key = LedgerKey::new(key.key.clone(), BetMode::Live);
        assert!(store.lookup(&live_key).unwrap().is_empty());
    }

    #[test]
    fn test_jsonl_append_and_reopen() {
        let dir = temp_dir();
        {
            let mut store = JsonlLedger::open(&dir).unwrap();
            store.append(&make_record("b1", "Arsenal", BetStatus::Pending, 0)).unwrap();
            store.append(&make_record("b1", "Arsenal", BetStatus::Lost, 95)).unwrap();
            store.put_failure(&make_failure("Chelsea", 2)).unwrap();
        }

        let store = JsonlLedger::open(&dir).unwrap();
        let lines = store.scan().unwrap();
        assert_eq!(lines.len(), 2);
        let folded = fold_latest(lines);
        assert_eq!(folded[0].status, BetStatus::Lost);

        let failures = store.failures().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].failure_count, 2);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_put_failure_replaces_entry() {
        let dir = temp_dir();
        let mut store = JsonlLedger::open(&dir).unwrap();
        store.put_failure(&make_failure("Chelsea", 1)).unwrap();
        store.put_failure(&make_failure("Chelsea", 3)).unwrap();

        let reopened = JsonlLedger::open(&dir).unwrap();
        let failures = reopened.failures().unwrap();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].ignored);
        assert!(!dir.join("failures.json.tmp").exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_torn_tail_skipped_and_repaired() {
        let dir = temp_dir();
        fs::create_dir_all(&dir).unwrap();
        let good = serde_json::to_string(&make_record("b1", "Arsenal", BetStatus::Pending, 0)).unwrap();
        fs::write(dir.join(BETS_FILE), format!("{good}\n{{\"bet_id\": \"b2\", \"ev")).unwrap();

        // scan before repair tolerates the torn line
        let torn = fs::read_to_string(dir.join(BETS_FILE)).unwrap();
        assert_eq!(parse_lines(&torn, &dir.join(BETS_FILE)).unwrap().len(), 1);

        let mut store = JsonlLedger::open(&dir).unwrap();
        store.append(&make_record("b3", "Chelsea", BetStatus::Pending, 5)).unwrap();
        let lines = store.scan().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].bet_id, "b3");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_corrupt_middle_line_is_an_error() {
        let dir = temp_dir();
        fs::create_dir_all(&dir).unwrap();
        let good = serde_json::to_string(&make_record("b1", "Arsenal", BetStatus::Pending, 0)).unwrap();
        fs::write(dir.join(BETS_FILE), format!("not json\n{good}\n")).unwrap();

        let store = JsonlLedger::open(&dir).unwrap();
        assert!(store.scan().is_err());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_scan_missing_file_is_empty() {
        let dir = temp_dir();
        let store = JsonlLedger::open(&dir).unwrap();
        assert!(store.scan().unwrap().is_empty());
        assert!(store.bets_path().ends_with(BETS_FILE));
        fs::remove_dir_all(&dir).unwrap();
    }
}
