//! Read-only views of the market store
//!
//! Ingestion (scrapers, match trackers) writes elsewhere; the relay only
//! queries recent price observations and finalized matches.

mod csv_store;
mod memory;

pub use csv_store::{CsvStore, MatchRecord, PriceRecord};
pub use memory::MemoryStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{AssetId, FinalizedMatch, PriceObservation, SourceId};

/// Append-only time series of price observations
#[async_trait]
pub trait ObservationStore: Send + Sync {
    /// Assets with any observation at or after `since`
    async fn tracked_assets(&self, since: DateTime<Utc>) -> Result<Vec<AssetId>>;

    /// Observations for one (asset, source) pair at or after `since`
    async fn observations(
        &self,
        asset: &AssetId,
        source: &SourceId,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceObservation>>;
}

/// Match records with status and winner
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Matches with status FINISHED and a non-empty winner
    async fn finalized_matches(&self) -> Result<Vec<FinalizedMatch>>;
}
