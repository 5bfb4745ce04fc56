//! Skin Oracle Relay - entry point
//!
//! Wires config, logging, the market store and the on-chain gateway, then runs
//! the price, match-finality and settlement loops until Ctrl-C.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use skin_oracle_relay::config::AppConfig;
use skin_oracle_relay::gateway::{EthersGateway, SubmissionGateway};
use skin_oracle_relay::oracle::{
    CandidateBook, FinalityRelay, PriceRelay, RelayedMatchSet, SettlementKeeper,
};
use skin_oracle_relay::persistence::{RelayStateSnapshot, StateFile};
use skin_oracle_relay::scheduler::{Scheduler, StatePersister};
use skin_oracle_relay::store::CsvStore;

const FINAL_SAVE_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(config.logging.json);

    info!(version = env!("CARGO_PKG_VERSION"), "Oracle relay starting");
    info!(config = %config, "Configuration loaded");

    let policy = config.relay_policy()?;
    let store = Arc::new(CsvStore::new(&config.store.data_dir).context("Failed to open market store")?);
    let gateway: Arc<dyn SubmissionGateway> = Arc::new(EthersGateway::new(config.gateway_config())?);
    if !gateway.is_ready() {
        warn!("Oracle wallet or RPC not configured; submissions will be skipped until it is");
    }

    let state_file = config
        .store
        .persist_state
        .then(|| StateFile::new(&config.store.state_file));
    let saved = state_file
        .as_ref()
        .map(StateFile::load_or_default)
        .unwrap_or_else(RelayStateSnapshot::default);

    let book = Arc::new(CandidateBook::new(policy.candidate.clone()));
    book.restore(saved.assets).await;
    let relayed = Arc::new(RelayedMatchSet::from_ids(saved.relayed_matches));

    let price = Arc::new(PriceRelay::with_book(
        policy.sources.clone(),
        policy.consensus.clone(),
        policy.sample_window,
        policy.extra_assets.clone(),
        book.clone(),
        store.clone(),
        gateway.clone(),
    ));
    let finality = Arc::new(FinalityRelay::new(store, gateway.clone(), relayed.clone()));
    let keeper = config
        .keeper
        .enabled
        .then(|| Arc::new(SettlementKeeper::new(gateway.clone())));
    let persister = state_file.map(|file| Arc::new(StatePersister::new(file, book, relayed)));

    let status = price.status().await;
    info!(
        tracked = status.tracked,
        pending = status.pending,
        gateway_ready = status.gateway_ready,
        "Relay state ready"
    );

    let scheduler = Scheduler {
        price,
        finality,
        keeper,
        persister: persister.clone(),
        price_interval: config.price_interval(),
        match_interval: config.match_interval(),
        keeper_interval: config.keeper_interval(),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = scheduler.start(shutdown_rx);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    warn!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "Run-loop ended abnormally");
        }
    }
    if let Some(p) = persister {
        match tokio::time::timeout(FINAL_SAVE_TIMEOUT, p.save()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %format!("{:#}", e), "Final state save failed"),
            Err(_) => warn!(timeout = ?FINAL_SAVE_TIMEOUT, "Final state save timed out"),
        }
    }

    info!("Oracle relay stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}
