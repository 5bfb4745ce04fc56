//! CSV-backed store
//!
//! Price observations live in daily files `prices/prices_YYYY-MM-DD.csv`
//! (`timestamp,asset,price,source,volume`, timestamp in ms). Match records
//! live in `matches/matches.csv` (`match_id,status,winner`).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use csv::ReaderBuilder;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use super::{MatchStore, ObservationStore};
use crate::types::{AssetId, FinalizedMatch, MatchStatus, PriceObservation, SourceId};

/// Price row as stored on disk. Prices stay textual until parsed as decimals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceRecord {
    pub timestamp: i64,
    pub asset: String,
    pub price: String,
    pub source: String,
    pub volume: Option<String>,
}

impl PriceRecord {
    /// Parse into an observation; `None` for rows that are not finite decimals
    pub fn to_observation(&self) -> Option<PriceObservation> {
        let observed_at = Utc.timestamp_millis_opt(self.timestamp).single()?;
        let price = Decimal::from_str(self.price.trim()).ok()?;
        let volume = self
            .volume
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .and_then(|v| Decimal::from_str(v).ok());
        Some(PriceObservation::new(
            self.asset.clone(),
            self.source.clone(),
            price,
            volume,
            observed_at,
        ))
    }
}

/// Match row as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: String,
    pub status: String,
    pub winner: Option<String>,
}

/// Rows loaded for one sample window
#[derive(Debug)]
struct WindowCache {
    since: DateTime<Utc>,
    loaded_at: Instant,
    rows: Arc<Vec<PriceObservation>>,
}

/// A tick asks for the same window once for tracked assets and once per
/// (asset, source) pair; those calls share one read of the files.
const WINDOW_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct CsvStore {
    data_dir: PathBuf,
    window: Mutex<Option<WindowCache>>,
}

impl CsvStore {
    /// Open (and create if needed) a store rooted at `data_dir`
    pub fn new(data_dir: &str) -> Result<Self> {
        let data_dir = PathBuf::from(data_dir);
        fs::create_dir_all(data_dir.join("prices")).context("Failed to create prices directory")?;
        fs::create_dir_all(data_dir.join("matches"))
            .context("Failed to create matches directory")?;
        Ok(Self {
            data_dir,
            window: Mutex::new(None),
        })
    }

    fn price_file(data_dir: &Path, date: NaiveDate) -> PathBuf {
        data_dir
            .join("prices")
            .join(format!("prices_{}.csv", date.format("%Y-%m-%d")))
    }

    fn match_file(data_dir: &Path) -> PathBuf {
        data_dir.join("matches").join("matches.csv")
    }

    /// Load every parsable price row at or after `since`
    fn load_prices(data_dir: &Path, since: DateTime<Utc>) -> Result<Vec<PriceObservation>> {
        let mut out = Vec::new();
        let mut date = since.date_naive();
        let today = Utc::now().date_naive().max(date);

        while date <= today {
            let path = Self::price_file(data_dir, date);
            if path.exists() {
                let file = fs::File::open(&path)
                    .with_context(|| format!("Failed to open price file {}", path.display()))?;
                let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
                for result in reader.deserialize::<PriceRecord>() {
                    let record = match result {
                        Ok(r) => r,
                        Err(e) => {
                            debug!(file = %path.display(), error = %e, "Skipping malformed price row");
                            continue;
                        }
                    };
                    match record.to_observation() {
                        Some(obs) if obs.observed_at >= since => out.push(obs),
                        Some(_) => {}
                        None => debug!(
                            asset = %record.asset,
                            price = %record.price,
                            "Skipping non-decimal price row"
                        ),
                    }
                }
            }
            date = match date.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }

        out.sort_by_key(|o| o.observed_at);
        Ok(out)
    }

    fn load_matches(data_dir: &Path) -> Result<Vec<MatchRecord>> {
        let path = Self::match_file(data_dir);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&path)
            .with_context(|| format!("Failed to open match file {}", path.display()))?;
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
        let mut records = Vec::new();
        for result in reader.deserialize::<MatchRecord>() {
            records.push(result.context("Failed to deserialize match record")?);
        }
        Ok(records)
    }

    /// Rows at or after `since`, read from disk at most once per window.
    /// Concurrent callers wait for the first load instead of repeating it.
    async fn prices_since(&self, since: DateTime<Utc>) -> Result<Arc<Vec<PriceObservation>>> {
        let mut cache = self.window.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.since == since && cached.loaded_at.elapsed() < WINDOW_CACHE_TTL {
                return Ok(cached.rows.clone());
            }
        }

        let data_dir = self.data_dir.clone();
        let rows = tokio::task::spawn_blocking(move || Self::load_prices(&data_dir, since))
            .await
            .context("Price loader task failed")??;
        let rows = Arc::new(rows);
        debug!(rows = rows.len(), since = %since, "Price window loaded");

        *cache = Some(WindowCache {
            since,
            loaded_at: Instant::now(),
            rows: rows.clone(),
        });
        Ok(rows)
    }
}

#[async_trait]
impl ObservationStore for CsvStore {
    async fn tracked_assets(&self, since: DateTime<Utc>) -> Result<Vec<AssetId>> {
        let assets: BTreeSet<AssetId> = self
            .prices_since(since)
            .await?
            .iter()
            .map(|o| o.asset.clone())
            .collect();
        Ok(assets.into_iter().collect())
    }

    async fn observations(
        &self,
        asset: &AssetId,
        source: &SourceId,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceObservation>> {
        Ok(self
            .prices_since(since)
            .await?
            .iter()
            .filter(|o| &o.asset == asset && &o.source == source)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MatchStore for CsvStore {
    async fn finalized_matches(&self) -> Result<Vec<FinalizedMatch>> {
        let data_dir = self.data_dir.clone();
        let records = tokio::task::spawn_blocking(move || Self::load_matches(&data_dir))
            .await
            .context("Match loader task failed")??;

        Ok(records
            .iter()
            .filter_map(|r| {
                let status: MatchStatus = r.status.parse().ok()?;
                FinalizedMatch::from_record(&r.match_id, status, r.winner.as_deref())
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use csv::WriterBuilder;
    use rust_decimal_macros::dec;
    use std::fs::OpenOptions;
    use tempfile::TempDir;

    fn store() -> (TempDir, CsvStore) {
        let dir = TempDir::new().unwrap();
        let store = CsvStore::new(dir.path().to_str().unwrap()).unwrap();
        (dir, store)
    }

    /// Append one observation to its day's file, as the ingestion side does
    fn append_price(store: &CsvStore, obs: &PriceObservation) {
        let path = CsvStore::price_file(&store.data_dir, obs.observed_at.date_naive());
        let has_data = fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);
        let file = OpenOptions::new().create(true).append(true).open(&path).unwrap();
        let mut writer = WriterBuilder::new().has_headers(!has_data).from_writer(file);
        writer
            .serialize(PriceRecord {
                timestamp: obs.observed_at.timestamp_millis(),
                asset: obs.asset.to_string(),
                price: obs.price.to_string(),
                source: obs.source.to_string(),
                volume: obs.volume.map(|v| v.to_string()),
            })
            .unwrap();
        writer.flush().unwrap();
    }

    fn write_matches(store: &CsvStore, records: &[MatchRecord]) {
        let mut writer = WriterBuilder::new()
            .from_path(CsvStore::match_file(&store.data_dir))
            .unwrap();
        for record in records {
            writer.serialize(record).unwrap();
        }
        writer.flush().unwrap();
    }

    #[tokio::test]
    async fn appended_prices_read_back_within_window() {
        let (_dir, store) = store();
        let now = Utc::now();
        append_price(&store, &PriceObservation::new("ak", "steam", dec!(10.25), Some(dec!(3)), now));
        append_price(&store, &PriceObservation::new("ak", "steam", dec!(11), None, now));
        append_price(
            &store,
            &PriceObservation::new("ak", "steam", dec!(99), None, now - Duration::hours(3)),
        );

        let since = now - Duration::hours(1);
        let rows = store
            .observations(&AssetId::new("ak"), &SourceId::new("steam"), since)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].volume, Some(dec!(3)));
        assert_eq!(rows[1].volume, None);
        assert_eq!(store.tracked_assets(since).await.unwrap(), vec![AssetId::new("ak")]);
    }

    #[tokio::test]
    async fn non_decimal_rows_are_dropped() {
        let (dir, store) = store();
        let now = Utc::now();
        let path = CsvStore::price_file(dir.path(), now.date_naive());
        let ts = now.timestamp_millis();
        fs::write(
            &path,
            format!(
                "timestamp,asset,price,source,volume\n{ts},ak,NaN,steam,\n{ts},ak,inf,steam,1\n{ts},ak,5.5,steam,\n"
            ),
        )
        .unwrap();

        let rows = store
            .observations(&AssetId::new("ak"), &SourceId::new("steam"), now - Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].price, dec!(5.5));
    }

    #[tokio::test]
    async fn one_window_read_serves_every_pair() {
        let (_dir, store) = store();
        let now = Utc::now();
        let since = now - Duration::hours(1);
        append_price(&store, &PriceObservation::new("ak", "steam", dec!(10), None, now));

        assert_eq!(store.tracked_assets(since).await.unwrap(), vec![AssetId::new("ak")]);

        // same window: answered from the first read
        append_price(&store, &PriceObservation::new("awp", "steam", dec!(20), None, now));
        assert_eq!(store.tracked_assets(since).await.unwrap(), vec![AssetId::new("ak")]);
        let rows = store
            .observations(&AssetId::new("ak"), &SourceId::new("steam"), since)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        // next tick's window re-reads the files
        let next = since + Duration::milliseconds(1);
        assert_eq!(
            store.tracked_assets(next).await.unwrap(),
            vec![AssetId::new("ak"), AssetId::new("awp")]
        );
    }

    #[tokio::test]
    async fn finalized_matches_from_csv() {
        let (_dir, store) = store();
        assert!(store.finalized_matches().await.unwrap().is_empty());

        write_matches(
            &store,
            &[
                MatchRecord {
                    match_id: "m1".into(),
                    status: "FINISHED".into(),
                    winner: Some("NAVI".into()),
                },
                MatchRecord {
                    match_id: "m2".into(),
                    status: "LIVE".into(),
                    winner: None,
                },
                MatchRecord {
                    match_id: "m3".into(),
                    status: "FINISHED".into(),
                    winner: None,
                },
            ],
        );

        let finals = store.finalized_matches().await.unwrap();
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].match_id, "m1");
        assert_eq!(finals[0].winner, "NAVI");
    }
}
