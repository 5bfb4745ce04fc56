//! Price relay tick
//!
//! For every tracked asset: VWAP per source, cross-source consensus, candidate
//! state machine, then sign + submit when the state machine promotes.

use chrono::{DateTime, Duration, Utc};
use futures_util::future::{join_all, try_join_all};
use rust_decimal::Decimal;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::errors::RelayError;
use crate::gateway::SubmissionGateway;
use crate::oracle::candidate::{CandidateBook, CandidatePolicy, Decision};
use crate::oracle::consensus::{ConsensusPrice, ConsensusRule};
use crate::oracle::vwap::VwapAggregator;
use crate::store::ObservationStore;
use crate::types::{AssetId, SourceId, TxRef};

/// Everything that shapes a price tick
#[derive(Debug, Clone, PartialEq)]
pub struct RelayPolicy {
    /// Ordered independent sources sampled per asset
    pub sources: Vec<SourceId>,
    pub consensus: ConsensusRule,
    pub candidate: CandidatePolicy,
    /// Look-back window for VWAP
    pub sample_window: Duration,
    /// Assets evaluated even when the store has no recent rows for them
    pub extra_assets: Vec<AssetId>,
}

impl Default for RelayPolicy {
    fn default() -> Self {
        let candidate = CandidatePolicy::default();
        Self {
            sources: vec![SourceId::new("buff163"), SourceId::new("steam")],
            consensus: ConsensusRule::pairwise(candidate.divergence_tolerance),
            candidate,
            sample_window: Duration::minutes(60),
            extra_assets: Vec::new(),
        }
    }
}

/// What happened to one asset in one tick
#[derive(Debug)]
pub enum AssetOutcome {
    /// State machine withheld submission
    Held(Decision),
    /// Price relayed and confirmed
    Submitted { price: Decimal, tx: TxRef },
    /// Skipped for data or gateway reasons; retried next tick
    Skipped(RelayError),
}

/// Summary of one price tick
#[derive(Debug, Default)]
pub struct PriceTickReport {
    pub outcomes: Vec<(AssetId, AssetOutcome)>,
}

impl PriceTickReport {
    pub fn submitted(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, AssetOutcome::Submitted { .. }))
            .count()
    }

    pub fn held(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, AssetOutcome::Held(_)))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, AssetOutcome::Skipped(_)))
            .count()
    }

    pub fn outcome(&self, asset: &AssetId) -> Option<&AssetOutcome> {
        self.outcomes.iter().find(|(a, _)| a == asset).map(|(_, o)| o)
    }
}

/// Snapshot of relay health
#[derive(Debug, Clone, PartialEq)]
pub struct RelayStatus {
    pub last_price_update: Option<DateTime<Utc>>,
    pub tracked: usize,
    pub pending: usize,
    pub gateway_ready: bool,
}

pub struct PriceRelay {
    store: Arc<dyn ObservationStore>,
    gateway: Arc<dyn SubmissionGateway>,
    aggregator: VwapAggregator,
    consensus: ConsensusRule,
    sources: Vec<SourceId>,
    extra_assets: Vec<AssetId>,
    book: Arc<CandidateBook>,
    last_price_update: RwLock<Option<DateTime<Utc>>>,
}

impl PriceRelay {
    pub fn new(
        policy: RelayPolicy,
        store: Arc<dyn ObservationStore>,
        gateway: Arc<dyn SubmissionGateway>,
    ) -> Self {
        let book = Arc::new(CandidateBook::new(policy.candidate));
        Self::with_book(
            policy.sources,
            policy.consensus,
            policy.sample_window,
            policy.extra_assets,
            book,
            store,
            gateway,
        )
    }

    /// Build around an existing book (restored state, shared with the persister)
    pub fn with_book(
        sources: Vec<SourceId>,
        consensus: ConsensusRule,
        sample_window: Duration,
        extra_assets: Vec<AssetId>,
        book: Arc<CandidateBook>,
        store: Arc<dyn ObservationStore>,
        gateway: Arc<dyn SubmissionGateway>,
    ) -> Self {
        Self {
            store,
            gateway,
            aggregator: VwapAggregator::new(sample_window),
            consensus,
            sources,
            extra_assets,
            book,
            last_price_update: RwLock::new(None),
        }
    }

    pub fn book(&self) -> &Arc<CandidateBook> {
        &self.book
    }

    pub async fn run_tick(&self) -> Result<PriceTickReport, RelayError> {
        self.run_tick_at(Utc::now()).await
    }

    /// Evaluate every tracked asset as of `now`. Assets run concurrently;
    /// each asset's slot lock serialises overlapping ticks.
    pub async fn run_tick_at(&self, now: DateTime<Utc>) -> Result<PriceTickReport, RelayError> {
        let since = self.aggregator.window_start(now);
        let mut assets = self.store.tracked_assets(since).await?;
        for extra in &self.extra_assets {
            if !assets.contains(extra) {
                assets.push(extra.clone());
            }
        }

        let outcomes = join_all(assets.iter().map(|asset| self.process_asset(asset, now))).await;
        let report = PriceTickReport {
            outcomes: assets.into_iter().zip(outcomes).collect(),
        };

        debug!(
            assets = report.outcomes.len(),
            submitted = report.submitted(),
            held = report.held(),
            skipped = report.skipped(),
            "Price tick complete"
        );
        Ok(report)
    }

    /// Run one asset through consensus, the state machine and the gateway
    pub async fn process_asset(&self, asset: &AssetId, now: DateTime<Utc>) -> AssetOutcome {
        let consensus = match self.consensus_price(asset, now).await {
            Ok(c) => c,
            Err(e) => {
                if e.is_informational() {
                    info!(asset = %asset, reason = %e, "Skipping asset this tick");
                } else {
                    warn!(asset = %asset, error = %e, "Skipping asset this tick");
                }
                return AssetOutcome::Skipped(e);
            }
        };

        let slot = self.book.slot(asset);
        let mut guard = slot.lock().await;

        let decision = guard.decide(consensus.price, now, self.book.policy());
        self.book.publish(asset, &guard);
        let price = match decision {
            Decision::Promote { price } => price,
            Decision::SwingRejected {
                candidate,
                last_confirmed,
                price,
            } => {
                warn!(
                    asset = %asset,
                    candidate = %candidate,
                    last_confirmed = %last_confirmed,
                    restarted_at = %price,
                    "Candidate exceeds swing limit, restarting challenge window"
                );
                return AssetOutcome::Held(decision);
            }
            other => {
                debug!(asset = %asset, consensus = %consensus.price, decision = ?other, "Candidate held");
                return AssetOutcome::Held(other);
            }
        };

        if !self.gateway.is_ready() {
            warn!(asset = %asset, price = %price, "Relayer not configured, skip updatePrice");
            return AssetOutcome::Skipped(RelayError::NotConfigured("relayer".to_string()));
        }

        let signature = match self.gateway.sign_price(asset, price).await {
            Ok(sig) => sig,
            Err(e) => {
                warn!(asset = %asset, price = %price, error = %e, "Price signing failed, retrying next tick");
                return AssetOutcome::Skipped(e.into());
            }
        };

        match self.gateway.submit_price(asset, price, &signature).await {
            Ok(tx) => {
                guard.confirm(price);
                self.book.publish(asset, &guard);
                *self
                    .last_price_update
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = Some(now);
                info!(asset = %asset, price = %price, tx = %tx, "Price relayed");
                AssetOutcome::Submitted { price, tx }
            }
            Err(e) => {
                warn!(asset = %asset, price = %price, error = %e, "Price submission failed, retrying next tick");
                AssetOutcome::Skipped(e.into())
            }
        }
    }

    /// Aggregate every configured source and check they agree
    pub async fn consensus_price(
        &self,
        asset: &AssetId,
        now: DateTime<Utc>,
    ) -> Result<ConsensusPrice, RelayError> {
        let since = self.aggregator.window_start(now);
        let prices = try_join_all(self.sources.iter().map(|source| async move {
            let observations = self.store.observations(asset, source, since).await?;
            Ok::<_, RelayError>(self.aggregator.aggregate(asset, source, &observations, now))
        }))
        .await?;

        self.consensus.evaluate(asset, &prices)
    }

    /// Never waits on an in-flight submission
    pub async fn status(&self) -> RelayStatus {
        let snapshot = self.book.snapshot();
        RelayStatus {
            last_price_update: *self
                .last_price_update
                .read()
                .unwrap_or_else(PoisonError::into_inner),
            tracked: snapshot.len(),
            pending: snapshot.values().filter(|s| s.pending.is_some()).count(),
            gateway_ready: self.gateway.is_ready(),
        }
    }
}
