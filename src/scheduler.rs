//! Fixed-interval run-loops
//!
//! Each loop fires on its own interval and spawns every tick as a separate
//! task, so a slow submission never delays the next tick and a failing or
//! panicking tick is logged without stopping the loop. Per-asset ordering is
//! enforced by the candidate book, not here.

use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::oracle::{CandidateBook, FinalityRelay, PriceRelay, RelayedMatchSet, SettlementKeeper};
use crate::persistence::{RelayStateSnapshot, StateFile};

/// Writes the relay state after ticks
pub struct StatePersister {
    file: StateFile,
    book: Arc<CandidateBook>,
    relayed: Arc<RelayedMatchSet>,
    write_lock: Mutex<()>,
}

impl StatePersister {
    pub fn new(file: StateFile, book: Arc<CandidateBook>, relayed: Arc<RelayedMatchSet>) -> Self {
        Self {
            file,
            book,
            relayed,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn save(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let snapshot = RelayStateSnapshot::new(self.relayed.snapshot().await, self.book.snapshot());
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || file.save(&snapshot)).await??;
        Ok(())
    }
}

/// Spawn a loop that runs `tick` every `period` until `shutdown` flips.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(task = name, period_ms = period.as_millis() as u64, "Run-loop started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let run = tokio::spawn(tick());
                    tokio::spawn(async move {
                        match run.await {
                            Ok(Ok(())) => debug!(task = name, "Tick finished"),
                            Ok(Err(e)) => error!(task = name, error = %format!("{:#}", e), "Tick failed"),
                            Err(join) => error!(task = name, error = %join, "Tick aborted"),
                        }
                    });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(task = name, "Run-loop stopped");
    })
}

/// Owns the relay components and their loops
pub struct Scheduler {
    pub price: Arc<PriceRelay>,
    pub finality: Arc<FinalityRelay>,
    pub keeper: Option<Arc<SettlementKeeper>>,
    pub persister: Option<Arc<StatePersister>>,
    pub price_interval: Duration,
    pub match_interval: Duration,
    pub keeper_interval: Duration,
}

impl Scheduler {
    /// Start every loop; they stop when `shutdown` is set to true
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let price = self.price.clone();
        let persister = self.persister.clone();
        handles.push(spawn_periodic(
            "price",
            self.price_interval,
            shutdown.clone(),
            move || {
                let price = price.clone();
                let persister = persister.clone();
                async move {
                    let report = price.run_tick().await?;
                    if report.submitted() > 0 {
                        info!(submitted = report.submitted(), "Prices relayed this tick");
                    }
                    save_state(persister.as_deref()).await;
                    let status = price.status().await;
                    debug!(
                        tracked = status.tracked,
                        pending = status.pending,
                        gateway_ready = status.gateway_ready,
                        last_price_update = ?status.last_price_update,
                        "Relay status"
                    );
                    Ok(())
                }
            },
        ));

        let finality = self.finality.clone();
        let persister = self.persister.clone();
        handles.push(spawn_periodic(
            "matches",
            self.match_interval,
            shutdown.clone(),
            move || {
                let finality = finality.clone();
                let persister = persister.clone();
                async move {
                    let report = finality.run_sweep().await?;
                    if !report.resolved.is_empty() {
                        save_state(persister.as_deref()).await;
                    }
                    Ok(())
                }
            },
        ));

        if let Some(keeper) = self.keeper.clone() {
            handles.push(spawn_periodic(
                "keeper",
                self.keeper_interval,
                shutdown,
                move || {
                    let keeper = keeper.clone();
                    async move {
                        keeper.run_once().await?;
                        Ok(())
                    }
                },
            ));
        }

        handles
    }
}

async fn save_state(persister: Option<&StatePersister>) {
    if let Some(p) = persister {
        if let Err(e) = p.save().await {
            warn!(error = %format!("{:#}", e), "Failed to persist relay state");
        }
    }
}
