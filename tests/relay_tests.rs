//! End-to-end relay behaviour against the in-memory store

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

use skin_oracle_relay::errors::{GatewayError, RelayError};
use skin_oracle_relay::gateway::SubmissionGateway;
use skin_oracle_relay::oracle::{
    AssetOutcome, CandidatePolicy, ConsensusRule, Decision, FinalityRelay, PriceRelay,
    RelayPolicy, RelayedMatchSet,
};
use skin_oracle_relay::persistence::{RelayStateSnapshot, StateFile};
use skin_oracle_relay::store::MemoryStore;
use skin_oracle_relay::types::{AssetId, MatchStatus, PriceObservation, PriceSignature, SourceId, TxRef};

// ============================================================================
// Helpers
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Price(String, Decimal),
    Match(String, String),
}

/// Gateway that records every submission and can be told to fail
#[derive(Default)]
struct RecordingGateway {
    calls: Mutex<Vec<Call>>,
    failures: Mutex<VecDeque<GatewayError>>,
}

impl RecordingGateway {
    async fn fail_next(&self, err: GatewayError) {
        self.failures.lock().await.push_back(err);
    }

    async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    async fn next_result(&self, call: Call) -> Result<TxRef, GatewayError> {
        if let Some(err) = self.failures.lock().await.pop_front() {
            return Err(err);
        }
        let mut calls = self.calls.lock().await;
        calls.push(call);
        Ok(TxRef(format!("0x{:064x}", calls.len())))
    }
}

#[async_trait]
impl SubmissionGateway for RecordingGateway {
    fn is_ready(&self) -> bool {
        true
    }

    async fn sign_price(
        &self,
        asset: &AssetId,
        price: Decimal,
    ) -> Result<PriceSignature, GatewayError> {
        Ok(PriceSignature(format!("0xsig:{}:{}", asset, price)))
    }

    async fn submit_price(
        &self,
        asset: &AssetId,
        price: Decimal,
        signature: &PriceSignature,
    ) -> Result<TxRef, GatewayError> {
        assert_eq!(signature.as_str(), format!("0xsig:{}:{}", asset, price));
        self.next_result(Call::Price(asset.to_string(), price)).await
    }

    async fn submit_match_resolution(
        &self,
        match_id: &str,
        winner: &str,
    ) -> Result<TxRef, GatewayError> {
        self.next_result(Call::Match(match_id.to_string(), winner.to_string()))
            .await
    }

    async fn settle_expired(&self) -> Result<TxRef, GatewayError> {
        Err(GatewayError::not_configured("chain.option_pool_address"))
    }
}

const WINDOW_MS: i64 = 120_000;

fn t(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(1_760_000_000_000 + ms).unwrap()
}

fn policy() -> RelayPolicy {
    RelayPolicy {
        sources: vec![SourceId::new("buff163"), SourceId::new("steam")],
        consensus: ConsensusRule::pairwise(dec!(0.05)),
        candidate: CandidatePolicy {
            divergence_tolerance: dec!(0.05),
            challenge_window: Duration::milliseconds(WINDOW_MS),
            max_swing: dec!(0.5),
        },
        sample_window: Duration::minutes(60),
        extra_assets: Vec::new(),
    }
}

/// One equal-volume observation per source
async fn quote(store: &MemoryStore, asset: &str, at: DateTime<Utc>, buff: Decimal, steam: Decimal) {
    store
        .push_observation(PriceObservation::new(asset, "buff163", buff, Some(dec!(1000)), at))
        .await;
    store
        .push_observation(PriceObservation::new(asset, "steam", steam, Some(dec!(1000)), at))
        .await;
}

fn setup() -> (Arc<MemoryStore>, Arc<RecordingGateway>, PriceRelay) {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(RecordingGateway::default());
    let relay = PriceRelay::new(policy(), store.clone(), gateway.clone());
    (store, gateway, relay)
}

// ============================================================================
// Price relay
// ============================================================================

#[tokio::test]
async fn stable_price_is_submitted_once_after_challenge_window() {
    let (store, gateway, relay) = setup();
    quote(&store, "skin_ak", t(0), dec!(100), dec!(100)).await;

    relay.run_tick_at(t(0)).await.unwrap();
    relay.run_tick_at(t(WINDOW_MS - 1)).await.unwrap();
    assert!(gateway.calls().await.is_empty());

    let report = relay.run_tick_at(t(WINDOW_MS)).await.unwrap();
    assert_eq!(report.submitted(), 1);
    assert_eq!(
        gateway.calls().await,
        vec![Call::Price("skin_ak".to_string(), dec!(100))]
    );

    // slot collapsed back to Empty: next tick starts a fresh candidate
    let report = relay.run_tick_at(t(WINDOW_MS + 1)).await.unwrap();
    assert!(matches!(
        report.outcome(&AssetId::new("skin_ak")),
        Some(AssetOutcome::Held(Decision::Started { .. }))
    ));
    assert_eq!(gateway.calls().await.len(), 1);
}

#[tokio::test]
async fn divergent_price_mid_window_restarts_timer() {
    let (store, gateway, relay) = setup();
    quote(&store, "skin_ak", t(0), dec!(100), dec!(100)).await;
    relay.run_tick_at(t(0)).await.unwrap();

    // a heavy new print moves both VWAPs to ~110
    let half = WINDOW_MS / 2;
    store
        .push_observation(PriceObservation::new("skin_ak", "buff163", dec!(110), Some(dec!(1_000_000)), t(half)))
        .await;
    store
        .push_observation(PriceObservation::new("skin_ak", "steam", dec!(110), Some(dec!(1_000_000)), t(half)))
        .await;
    let report = relay.run_tick_at(t(half)).await.unwrap();
    assert!(matches!(
        report.outcome(&AssetId::new("skin_ak")),
        Some(AssetOutcome::Held(Decision::Reset { .. }))
    ));

    relay.run_tick_at(t(WINDOW_MS)).await.unwrap();
    relay.run_tick_at(t(half + WINDOW_MS - 1)).await.unwrap();
    assert!(gateway.calls().await.is_empty());

    relay.run_tick_at(t(half + WINDOW_MS)).await.unwrap();
    let calls = gateway.calls().await;
    assert_eq!(calls.len(), 1);
    match &calls[0] {
        Call::Price(asset, price) => {
            assert_eq!(asset, "skin_ak");
            assert!(*price > dec!(109.9) && *price < dec!(110));
        }
        other => panic!("unexpected call {:?}", other),
    }
}

#[tokio::test]
async fn swing_violation_is_never_promoted_directly() {
    let (store, gateway, relay) = setup();
    quote(&store, "skin_ak", t(0), dec!(100), dec!(100)).await;
    relay.run_tick_at(t(0)).await.unwrap();
    relay.run_tick_at(t(WINDOW_MS)).await.unwrap();
    assert_eq!(gateway.calls().await.len(), 1);

    // market re-prices to 300 and stays there: stable, but a 200% jump
    let later = 10 * WINDOW_MS;
    let sample_window = Duration::minutes(60).num_milliseconds();
    let start = later + sample_window;
    quote(&store, "skin_ak", t(start), dec!(300), dec!(300)).await;

    relay.run_tick_at(t(start)).await.unwrap();
    let report = relay.run_tick_at(t(start + WINDOW_MS)).await.unwrap();
    assert!(matches!(
        report.outcome(&AssetId::new("skin_ak")),
        Some(AssetOutcome::Held(Decision::SwingRejected { .. }))
    ));
    relay.run_tick_at(t(start + 2 * WINDOW_MS)).await.unwrap();
    assert_eq!(gateway.calls().await.len(), 1);
}

#[tokio::test]
async fn transport_error_retries_same_promotion() {
    let (store, gateway, relay) = setup();
    quote(&store, "skin_ak", t(0), dec!(100), dec!(102)).await;

    relay.run_tick_at(t(0)).await.unwrap();
    gateway.fail_next(GatewayError::transport("connection reset")).await;
    let report = relay.run_tick_at(t(WINDOW_MS)).await.unwrap();
    assert!(matches!(
        report.outcome(&AssetId::new("skin_ak")),
        Some(AssetOutcome::Skipped(RelayError::Transport(_)))
    ));
    assert_eq!(relay.status().await.pending, 1);
    assert_eq!(relay.status().await.last_price_update, None);

    relay.run_tick_at(t(WINDOW_MS + 1_000)).await.unwrap();
    assert_eq!(
        gateway.calls().await,
        vec![Call::Price("skin_ak".to_string(), dec!(101))]
    );
    assert_eq!(relay.status().await.last_price_update, Some(t(WINDOW_MS + 1_000)));
}

#[tokio::test]
async fn assets_are_independent() {
    let (store, gateway, relay) = setup();
    quote(&store, "skin_ak", t(0), dec!(100), dec!(100)).await;
    quote(&store, "skin_awp", t(0), dec!(2000), dec!(2500)).await;
    quote(&store, "skin_knife", t(0), dec!(50), dec!(50)).await;

    let report = relay.run_tick_at(t(0)).await.unwrap();
    assert_eq!(report.held(), 2);
    assert_eq!(report.skipped(), 1);

    let report = relay.run_tick_at(t(WINDOW_MS)).await.unwrap();
    assert_eq!(report.submitted(), 2);
    let mut calls = gateway.calls().await;
    calls.sort_by(|a, b| format!("{:?}", a).cmp(&format!("{:?}", b)));
    assert_eq!(
        calls,
        vec![
            Call::Price("skin_ak".to_string(), dec!(100)),
            Call::Price("skin_knife".to_string(), dec!(50)),
        ]
    );
}

#[tokio::test]
async fn overlapping_ticks_submit_once() {
    let (store, gateway, relay) = setup();
    quote(&store, "skin_ak", t(0), dec!(100), dec!(100)).await;
    relay.run_tick_at(t(0)).await.unwrap();

    let relay = Arc::new(relay);
    let a = {
        let relay = relay.clone();
        tokio::spawn(async move { relay.run_tick_at(t(WINDOW_MS)).await.map(|r| r.submitted()) })
    };
    let b = {
        let relay = relay.clone();
        tokio::spawn(async move { relay.run_tick_at(t(WINDOW_MS)).await.map(|r| r.submitted()) })
    };
    let total = a.await.unwrap().unwrap() + b.await.unwrap().unwrap();
    assert_eq!(total, 1);
    assert_eq!(gateway.calls().await.len(), 1);
}

// ============================================================================
// Match finality
// ============================================================================

#[tokio::test]
async fn finalized_match_is_relayed_at_most_once() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(RecordingGateway::default());
    store.upsert_match("m1", MatchStatus::Finished, Some("NAVI")).await;
    store.upsert_match("m2", MatchStatus::Live, None).await;

    let relay = FinalityRelay::new(store.clone(), gateway.clone(), Arc::new(RelayedMatchSet::new()));
    let first = relay.run_sweep().await.unwrap();
    assert_eq!(first.resolved.len(), 1);

    for _ in 0..3 {
        let again = relay.run_sweep().await.unwrap();
        assert!(again.resolved.is_empty());
    }
    assert_eq!(
        gateway.calls().await,
        vec![Call::Match("m1".to_string(), "NAVI".to_string())]
    );

    store.upsert_match("m2", MatchStatus::Finished, Some("G2")).await;
    let next = relay.run_sweep().await.unwrap();
    assert_eq!(next.resolved.len(), 1);
    assert_eq!(gateway.calls().await.len(), 2);
}

#[tokio::test]
async fn relayed_set_survives_restart_through_state_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let file = StateFile::new(dir.path().join("relay_state.json"));

    let store = Arc::new(MemoryStore::new());
    store.upsert_match("m1", MatchStatus::Finished, Some("NAVI")).await;

    let gateway = Arc::new(RecordingGateway::default());
    let relayed = Arc::new(RelayedMatchSet::new());
    let relay = FinalityRelay::new(store.clone(), gateway.clone(), relayed.clone());
    relay.run_sweep().await.unwrap();
    file.save(&RelayStateSnapshot::new(relayed.snapshot().await, Default::default()))
        .unwrap();

    // new process
    let saved = file.load_or_default();
    let gateway = Arc::new(RecordingGateway::default());
    let relay = FinalityRelay::new(
        store,
        gateway.clone(),
        Arc::new(RelayedMatchSet::from_ids(saved.relayed_matches)),
    );
    let report = relay.run_sweep().await.unwrap();
    assert!(report.resolved.is_empty());
    assert!(gateway.calls().await.is_empty());
}
