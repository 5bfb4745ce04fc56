//! Price Candidate State Machine
//!
//! Debounces agreed consensus prices before they are allowed onto the ledger.
//! Per asset the slot is either Empty or Pending(price, since). Each tick
//! feeds one consensus price `p`:
//!
//! 1. Empty: start Pending(p, now).
//! 2. Pending and `p` diverges from it beyond tolerance: restart with Pending(p, now).
//! 3. Pending for less than the challenge window: hold.
//! 4. Window elapsed but the pending price swings too far from the last
//!    confirmed price: restart with Pending(p, now).
//! 5. Otherwise: promote the pending price.
//!
//! Promotion does not mutate the slot. The caller submits while holding the
//! slot lock and calls [`CandidateSlot::confirm`] only once the ledger
//! returned a transaction, so a failed submission is retried next tick.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;

use crate::oracle::consensus::{divergence, within_swing};
use crate::types::AssetId;

/// Thresholds driving the state machine
#[derive(Debug, Clone, PartialEq)]
pub struct CandidatePolicy {
    /// Max relative drift of a new price from the pending one before reset
    pub divergence_tolerance: Decimal,
    /// How long a candidate must stay stable before promotion
    pub challenge_window: Duration,
    /// Max relative change from the last confirmed price
    pub max_swing: Decimal,
}

impl Default for CandidatePolicy {
    fn default() -> Self {
        Self {
            divergence_tolerance: Decimal::new(5, 2),
            challenge_window: Duration::milliseconds(120_000),
            max_swing: Decimal::new(5, 1),
        }
    }
}

/// A price waiting out its challenge window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCandidate {
    pub price: Decimal,
    pub first_observed_at: DateTime<Utc>,
}

/// Outcome of feeding one consensus price into a slot
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// No candidate existed; `price` is now pending
    Started { price: Decimal },
    /// New price drifted from the pending one; timer restarted
    Reset { previous: Decimal, price: Decimal },
    /// Pending price still inside its challenge window
    Holding { price: Decimal, remaining: Duration },
    /// Window elapsed but the jump from the last confirmed value is implausible
    SwingRejected {
        candidate: Decimal,
        last_confirmed: Decimal,
        price: Decimal,
    },
    /// Pending price is cleared for submission
    Promote { price: Decimal },
}

impl Decision {
    pub fn is_promotion(&self) -> bool {
        matches!(self, Decision::Promote { .. })
    }
}

/// Observable state of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateState {
    Empty,
    Pending(PendingCandidate),
}

/// Per-asset candidate and confirmed price
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateSlot {
    pub pending: Option<PendingCandidate>,
    pub last_confirmed: Option<Decimal>,
}

impl CandidateSlot {
    pub fn state(&self) -> CandidateState {
        match self.pending {
            Some(p) => CandidateState::Pending(p),
            None => CandidateState::Empty,
        }
    }

    /// Apply one tick's consensus price. Never mutates on promotion.
    pub fn decide(&mut self, price: Decimal, now: DateTime<Utc>, policy: &CandidatePolicy) -> Decision {
        let Some(existing) = self.pending else {
            self.restart(price, now);
            return Decision::Started { price };
        };

        let drift = divergence(existing.price, price);
        if drift.map_or(true, |d| d > policy.divergence_tolerance) {
            self.restart(price, now);
            return Decision::Reset {
                previous: existing.price,
                price,
            };
        }

        let elapsed = now - existing.first_observed_at;
        if elapsed < policy.challenge_window {
            return Decision::Holding {
                price: existing.price,
                remaining: policy.challenge_window - elapsed,
            };
        }

        if !within_swing(self.last_confirmed, existing.price, policy.max_swing) {
            let last_confirmed = self.last_confirmed.unwrap_or(Decimal::ZERO);
            self.restart(price, now);
            return Decision::SwingRejected {
                candidate: existing.price,
                last_confirmed,
                price,
            };
        }

        Decision::Promote {
            price: existing.price,
        }
    }

    /// Record a successful submission: clear the candidate, move the baseline
    pub fn confirm(&mut self, price: Decimal) {
        self.pending = None;
        self.last_confirmed = Some(price);
    }

    fn restart(&mut self, price: Decimal, now: DateTime<Utc>) {
        self.pending = Some(PendingCandidate {
            price,
            first_observed_at: now,
        });
    }
}

/// Process-wide set of per-asset slots.
///
/// The map lock is held only to look up or insert a slot. Each slot has its
/// own async mutex, held across submission, so one asset has a single writer
/// while other assets proceed concurrently.
///
/// Writers [`publish`](Self::publish) each slot after mutating it. Readers
/// never wait on a slot lock: a slot busy with a submission is reported as
/// last published.
#[derive(Debug)]
pub struct CandidateBook {
    policy: CandidatePolicy,
    slots: RwLock<HashMap<AssetId, Arc<Mutex<CandidateSlot>>>>,
    published: RwLock<HashMap<AssetId, CandidateSlot>>,
}

impl CandidateBook {
    pub fn new(policy: CandidatePolicy) -> Self {
        Self {
            policy,
            slots: RwLock::new(HashMap::new()),
            published: RwLock::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &CandidatePolicy {
        &self.policy
    }

    /// Get or create the slot for an asset
    pub fn slot(&self, asset: &AssetId) -> Arc<Mutex<CandidateSlot>> {
        if let Some(slot) = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(asset)
        {
            return slot.clone();
        }
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(asset.clone())
            .or_default()
            .clone()
    }

    fn all_slots(&self) -> Vec<(AssetId, Arc<Mutex<CandidateSlot>>)> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Record the current state of a slot for lock-free readers
    pub fn publish(&self, asset: &AssetId, slot: &CandidateSlot) {
        self.published
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(asset.clone(), slot.clone());
    }

    /// Copy of every slot. Idle slots are read directly; a slot locked by an
    /// in-flight submission falls back to its published state.
    pub fn snapshot(&self) -> HashMap<AssetId, CandidateSlot> {
        let slots = self.all_slots();
        let published = self.published.read().unwrap_or_else(PoisonError::into_inner);
        let mut out = HashMap::with_capacity(slots.len());
        for (asset, slot) in slots {
            let state = match slot.try_lock() {
                Ok(guard) => Some(guard.clone()),
                Err(_) => published.get(&asset).cloned(),
            };
            if let Some(state) = state {
                out.insert(asset, state);
            }
        }
        out
    }

    /// Number of assets currently holding a pending candidate
    pub fn pending_count(&self) -> usize {
        self.snapshot().values().filter(|s| s.pending.is_some()).count()
    }

    /// Seed slots from a saved snapshot
    pub async fn restore(&self, saved: HashMap<AssetId, CandidateSlot>) {
        for (asset, state) in saved {
            let slot = self.slot(&asset);
            self.publish(&asset, &state);
            *slot.lock().await = state;
        }
    }
}
