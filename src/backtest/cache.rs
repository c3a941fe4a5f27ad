//! Historical snapshot cache.
//!
//! Snapshots are content-addressed by `SnapshotKey` within the sharp-book
//! scope that normalized them, and a request index maps each
//! `RequestKey` (sport, markets, sharp books, as_of) to the keys that
//! request produced, so a repeated request is answered without calling
//! the provider. Historical odds never change: entries are never
//! invalidated.
//!
//! With a cache directory set, every fetched request is also written as
//! one JSON file (temp file + rename) and later runs read it back.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::data::normalizer::normalize_events;
use crate::platforms::HistoricalOddsProvider;
use crate::types::{EngineError, MarketSnapshot, MarketType, SnapshotKey};

/// Everything that shapes the snapshots of one provider request.
///
/// Markets and sharp books are sorted and deduplicated, so the same
/// request spelled in a different order hits the same entry. Empty
/// `markets` means every known market.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub sport: String,
    pub markets: Vec<MarketType>,
    pub sharp_books: Vec<String>,
    pub as_of: DateTime<Utc>,
}

impl RequestKey {
    pub fn new(sport: &str, markets: &[MarketType], sharp_books: &[String], as_of: DateTime<Utc>) -> Self {
        let mut markets = markets.to_vec();
        markets.sort();
        markets.dedup();
        Self {
            sport: sport.to_string(),
            markets,
            sharp_books: book_scope(sharp_books),
            as_of,
        }
    }

    /// `{sport}_{markets}_{books}_{as_of}`, filesystem safe.
    fn file_stem(&self) -> String {
        let markets = if self.markets.is_empty() {
            "all".to_string()
        } else {
            self.markets.iter().map(MarketType::as_str).collect::<Vec<_>>().join("-")
        };
        format!(
            "{}_{}_{}_{}",
            sanitize(&self.sport),
            sanitize(&markets),
            sanitize(&self.sharp_books.join("-")),
            self.as_of.format("%Y%m%dT%H%M%SZ")
        )
    }
}

/// On-disk form of one request.
#[derive(Debug, Serialize, Deserialize)]
struct CachedRequest {
    request: RequestKey,
    snapshots: Vec<MarketSnapshot>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub memory_hits: usize,
    pub disk_hits: usize,
    pub fetches: usize,
}

#[derive(Debug, Default)]
pub struct SnapshotCache {
    // keyed by (sharp-book scope, snapshot key)
    snapshots: HashMap<(Vec<String>, SnapshotKey), MarketSnapshot>,
    requests: HashMap<RequestKey, Vec<SnapshotKey>>,
    dir: Option<PathBuf>,
    stats: CacheStats,
}

impl SnapshotCache {
    /// Memory-only cache.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Cache backed by `dir`, created if missing.
    pub fn with_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache dir {}", dir.display()))?;
        Ok(Self {
            dir: Some(dir),
            ..Self::default()
        })
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Snapshot under `key` as normalized against `sharp_books`.
    pub fn get(&self, sharp_books: &[String], key: &SnapshotKey) -> Option<&MarketSnapshot> {
        self.snapshots.get(&(book_scope(sharp_books), key.clone()))
    }

    /// Snapshots for `sport` as they stood at `as_of`, fetching only when
    /// neither memory nor disk has the request.
    pub async fn snapshots_for(
        &mut self,
        provider: &dyn HistoricalOddsProvider,
        sport: &str,
        markets: &[MarketType],
        sharp_books: &[String],
        as_of: DateTime<Utc>,
    ) -> Result<Vec<MarketSnapshot>, EngineError> {
        let request = RequestKey::new(sport, markets, sharp_books, as_of);

        if self.requests.contains_key(&request) {
            self.stats.memory_hits += 1;
            return Ok(self.collect(&request));
        }

        if let Some(cached) = self.read_disk(&request) {
            self.stats.disk_hits += 1;
            debug!(sport, as_of = %as_of, snapshots = cached.snapshots.len(), "Snapshot request read from disk");
            self.index(&request, cached.snapshots);
            return Ok(self.collect(&request));
        }

        let resp = provider.fetch_historical(sport, &request.markets, as_of).await?;
        self.stats.fetches += 1;
        let snapshots = normalize_events(&resp.data, &request.markets, &request.sharp_books, as_of);
        debug!(
            sport,
            as_of = %as_of,
            provider_timestamp = %resp.timestamp,
            snapshots = snapshots.len(),
            "Snapshot request fetched"
        );

        if let Err(e) = self.write_disk(&request, &snapshots) {
            warn!(sport, as_of = %as_of, error = %e, "Failed to persist snapshot request");
        }
        self.index(&request, snapshots);
        Ok(self.collect(&request))
    }

    fn index(&mut self, request: &RequestKey, snapshots: Vec<MarketSnapshot>) {
        let mut keys = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            let key = snapshot.key();
            keys.push(key.clone());
            // first write wins; within one scope the content under a key cannot differ
            self.snapshots
                .entry((request.sharp_books.clone(), key))
                .or_insert(snapshot);
        }
        self.requests.insert(request.clone(), keys);
    }

    fn collect(&self, request: &RequestKey) -> Vec<MarketSnapshot> {
        self.requests
            .get(request)
            .map(|keys| {
                keys.iter()
                    .filter_map(|k| self.snapshots.get(&(request.sharp_books.clone(), k.clone())).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    // -- Disk ---------------------------------------------------------------

    fn file_for(&self, request: &RequestKey) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        Some(dir.join(format!("{}.json", request.file_stem())))
    }

    fn read_disk(&self, request: &RequestKey) -> Option<CachedRequest> {
        let path = self.file_for(request)?;
        if !path.exists() {
            return None;
        }
        let parsed = fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|s| serde_json::from_str::<CachedRequest>(&s).map_err(anyhow::Error::from));
        match parsed {
            Ok(cached) if &cached.request == request => Some(cached),
            Ok(_) => {
                warn!(path = %path.display(), "Cache file does not match its request, refetching");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable cache file, refetching");
                None
            }
        }
    }

    fn write_disk(&self, request: &RequestKey, snapshots: &[MarketSnapshot]) -> Result<()> {
        let Some(path) = self.file_for(request) else {
            return Ok(());
        };
        let body = serde_json::to_string(&CachedRequest {
            request: request.clone(),
            snapshots: snapshots.to_vec(),
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("Failed to move {} into place", path.display()))?;
        Ok(())
    }
}

fn book_scope(sharp_books: &[String]) -> Vec<String> {
    let mut books = sharp_books.to_vec();
    books.sort();
    books.dedup();
    books
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
