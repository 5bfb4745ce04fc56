//! In-memory store, used by tests and dry runs

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tokio::sync::RwLock;

use super::{MatchStore, ObservationStore};
use crate::types::{AssetId, FinalizedMatch, MatchStatus, PriceObservation, SourceId};

#[derive(Debug, Clone)]
struct MatchRow {
    match_id: String,
    status: MatchStatus,
    winner: Option<String>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    observations: RwLock<Vec<PriceObservation>>,
    matches: RwLock<Vec<MatchRow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_observation(&self, obs: PriceObservation) {
        self.observations.write().await.push(obs);
    }

    /// Insert or update a match row
    pub async fn upsert_match(&self, match_id: &str, status: MatchStatus, winner: Option<&str>) {
        let mut matches = self.matches.write().await;
        let row = MatchRow {
            match_id: match_id.to_string(),
            status,
            winner: winner.map(str::to_string),
        };
        match matches.iter_mut().find(|m| m.match_id == match_id) {
            Some(existing) => *existing = row,
            None => matches.push(row),
        }
    }
}

#[async_trait]
impl ObservationStore for MemoryStore {
    async fn tracked_assets(&self, since: DateTime<Utc>) -> Result<Vec<AssetId>> {
        let observations = self.observations.read().await;
        let assets: BTreeSet<AssetId> = observations
            .iter()
            .filter(|o| o.observed_at >= since)
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
        let observations = self.observations.read().await;
        Ok(observations
            .iter()
            .filter(|o| &o.asset == asset && &o.source == source && o.observed_at >= since)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MatchStore for MemoryStore {
    async fn finalized_matches(&self) -> Result<Vec<FinalizedMatch>> {
        let matches = self.matches.read().await;
        Ok(matches
            .iter()
            .filter_map(|m| FinalizedMatch::from_record(&m.match_id, m.status, m.winner.as_deref()))
            .collect())
    }
}
