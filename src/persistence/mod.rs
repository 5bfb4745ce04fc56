//! Relay state persistence
//!
//! Saves pending candidates, last confirmed prices and relayed match ids so a
//! restart neither forgets an in-progress challenge window nor re-resolves a
//! match it already relayed. A crash between a confirmed transaction and the
//! next save can still repeat one submission.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::oracle::CandidateSlot;
use crate::types::AssetId;

const STATE_VERSION: &str = "1";

/// Everything the relay keeps between ticks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayStateSnapshot {
    pub version: String,
    pub saved_at: i64,
    pub relayed_matches: BTreeSet<String>,
    pub assets: HashMap<AssetId, CandidateSlot>,
}

impl RelayStateSnapshot {
    pub fn new(
        relayed_matches: BTreeSet<String>,
        assets: HashMap<AssetId, CandidateSlot>,
    ) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            saved_at: chrono::Utc::now().timestamp_millis(),
            relayed_matches,
            assets,
        }
    }
}

/// JSON file holding the latest [`RelayStateSnapshot`]
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write atomically: temp file then rename
    pub fn save(&self, state: &RelayStateSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create state directory")?;
        }
        let json = serde_json::to_string_pretty(state).context("Failed to encode relay state")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }

    /// Load the saved state. Missing file starts fresh; a corrupt one is ignored.
    pub fn load_or_default(&self) -> RelayStateSnapshot {
        if !self.path.exists() {
            info!(path = %self.path.display(), "No relay state found, starting fresh");
            return RelayStateSnapshot::default();
        }
        match self.load() {
            Ok(state) => {
                info!(
                    path = %self.path.display(),
                    assets = state.assets.len(),
                    relayed_matches = state.relayed_matches.len(),
                    "Relay state loaded"
                );
                state
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %format!("{:#}", e), "Ignoring unreadable relay state");
                RelayStateSnapshot::default()
            }
        }
    }

    fn load(&self) -> Result<RelayStateSnapshot> {
        let json = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        serde_json::from_str(&json).context("Failed to decode relay state")
    }
}
