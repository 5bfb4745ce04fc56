//! Oracle module - Price consensus and on-chain relay
//!
//! Turns raw per-source observations into debounced, cross-checked prices and
//! relays them (and finished match results) to the ledger.

mod candidate;
mod consensus;
mod finality;
mod keeper;
mod relay;
mod vwap;

pub use candidate::{
    CandidateBook, CandidatePolicy, CandidateSlot, CandidateState, Decision, PendingCandidate,
};
pub use consensus::{agrees, divergence, within_swing, ConsensusPrice, ConsensusRule};
pub use finality::{FinalityRelay, FinalitySweepReport, RelayedMatchSet};
pub use keeper::SettlementKeeper;
pub use relay::{AssetOutcome, PriceRelay, PriceTickReport, RelayPolicy, RelayStatus};
pub use vwap::{compute_vwap, VwapAggregator, VWAP_DECIMALS};
