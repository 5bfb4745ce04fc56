//! Match Finality Relay
//!
//! Sweeps finalized matches and submits one resolveMatch per match id.
//! Successful ids go into the relayed set; failures stay out so the next
//! sweep retries them. A "not configured" gateway aborts the whole sweep.

use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::{GatewayError, RelayError};
use crate::gateway::SubmissionGateway;
use crate::store::MatchStore;
use crate::types::TxRef;

/// Match ids already resolved on-chain
#[derive(Debug, Default)]
pub struct RelayedMatchSet {
    ids: Mutex<BTreeSet<String>>,
}

impl RelayedMatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids(ids: BTreeSet<String>) -> Self {
        Self {
            ids: Mutex::new(ids),
        }
    }

    pub async fn contains(&self, match_id: &str) -> bool {
        self.ids.lock().await.contains(match_id)
    }

    pub async fn insert(&self, match_id: &str) -> bool {
        self.ids.lock().await.insert(match_id.to_string())
    }

    pub async fn len(&self) -> usize {
        self.ids.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ids.lock().await.is_empty()
    }

    pub async fn snapshot(&self) -> BTreeSet<String> {
        self.ids.lock().await.clone()
    }
}

/// Result of one sweep
#[derive(Debug, Default)]
pub struct FinalitySweepReport {
    pub resolved: Vec<(String, TxRef)>,
    pub failed: Vec<(String, RelayError)>,
    pub already_relayed: usize,
    /// Set when the sweep stopped early on a "not configured" gateway
    pub aborted: Option<RelayError>,
}

pub struct FinalityRelay {
    store: Arc<dyn MatchStore>,
    gateway: Arc<dyn SubmissionGateway>,
    relayed: Arc<RelayedMatchSet>,
    /// Serialises sweeps so overlapping ticks cannot resolve a match twice
    sweep_lock: Mutex<()>,
}

impl FinalityRelay {
    pub fn new(
        store: Arc<dyn MatchStore>,
        gateway: Arc<dyn SubmissionGateway>,
        relayed: Arc<RelayedMatchSet>,
    ) -> Self {
        Self {
            store,
            gateway,
            relayed,
            sweep_lock: Mutex::new(()),
        }
    }

    pub fn relayed(&self) -> &Arc<RelayedMatchSet> {
        &self.relayed
    }

    pub async fn run_sweep(&self) -> Result<FinalitySweepReport, RelayError> {
        let _sweep = self.sweep_lock.lock().await;
        let matches = self.store.finalized_matches().await?;
        let mut report = FinalitySweepReport::default();

        for m in matches {
            if self.relayed.contains(&m.match_id).await {
                report.already_relayed += 1;
                continue;
            }

            if !self.gateway.is_ready() {
                warn!(match_id = %m.match_id, "Relayer not configured, skip resolveMatch");
                report.aborted = Some(RelayError::NotConfigured("relayer".to_string()));
                break;
            }

            match self
                .gateway
                .submit_match_resolution(&m.match_id, &m.winner)
                .await
            {
                Ok(tx) => {
                    self.relayed.insert(&m.match_id).await;
                    info!(match_id = %m.match_id, winner = %m.winner, tx = %tx, "Match result relayed");
                    report.resolved.push((m.match_id, tx));
                }
                Err(GatewayError::NotConfigured(what)) => {
                    warn!(match_id = %m.match_id, missing = %what, "Gateway not configured, aborting match sweep");
                    report.aborted = Some(RelayError::NotConfigured(what));
                    break;
                }
                Err(e) => {
                    warn!(match_id = %m.match_id, error = %e, "resolveMatch failed, retrying next tick");
                    report.failed.push((m.match_id, e.into()));
                }
            }
        }

        debug!(
            resolved = report.resolved.len(),
            failed = report.failed.len(),
            already_relayed = report.already_relayed,
            aborted = report.aborted.is_some(),
            "Match sweep complete"
        );
        Ok(report)
    }
}
