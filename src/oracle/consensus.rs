//! Consensus Validator - Cross-source agreement and swing limits
//!
//! `agrees` and `within_swing` are the pairwise primitives. `ConsensusRule`
//! extends the pairwise check to an ordered set of sources with a quorum,
//! and for two sources with quorum 2 it behaves exactly like `agrees`.

use rust_decimal::Decimal;

use crate::errors::RelayError;
use crate::types::{AggregatedPrice, AssetId, SourceId};

/// True iff both prices are present and `|a - b| / min(a, b) <= tolerance`
pub fn agrees(a: Option<Decimal>, b: Option<Decimal>, tolerance: Decimal) -> bool {
    let (Some(a), Some(b)) = (a, b) else {
        return false;
    };
    if a <= Decimal::ZERO || b <= Decimal::ZERO {
        return false;
    }
    relative_diff((a - b).abs(), a.min(b)).map_or(false, |ratio| ratio <= tolerance)
}

/// True iff there is no baseline, or `|next - last| / last <= max_swing`
pub fn within_swing(last: Option<Decimal>, next: Decimal, max_swing: Decimal) -> bool {
    let Some(last) = last else {
        return true;
    };
    if last <= Decimal::ZERO {
        return true;
    }
    relative_diff((next - last).abs(), last).map_or(false, |ratio| ratio <= max_swing)
}

/// Relative divergence of `candidate` against `reference`
pub fn divergence(reference: Decimal, candidate: Decimal) -> Option<Decimal> {
    if reference <= Decimal::ZERO {
        return None;
    }
    relative_diff((candidate - reference).abs(), reference)
}

fn relative_diff(diff: Decimal, base: Decimal) -> Option<Decimal> {
    diff.checked_div(base)
}

/// Agreement rule over an arbitrary ordered set of sources
#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusRule {
    /// Maximum `(max - min) / min` across present source prices
    pub tolerance: Decimal,
    /// Minimum number of sources that must report a price
    pub quorum: usize,
}

/// The price all sources agreed on for one tick
#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusPrice {
    pub asset: AssetId,
    pub price: Decimal,
    pub spread: Decimal,
    pub sources: Vec<SourceId>,
}

impl ConsensusRule {
    pub fn new(tolerance: Decimal, quorum: usize) -> Self {
        Self {
            tolerance,
            quorum: quorum.max(1),
        }
    }

    /// Pairwise rule for the two-market deployment
    pub fn pairwise(tolerance: Decimal) -> Self {
        Self::new(tolerance, 2)
    }

    /// Check that enough sources agree and return their mean price
    pub fn evaluate(
        &self,
        asset: &AssetId,
        prices: &[AggregatedPrice],
    ) -> Result<ConsensusPrice, RelayError> {
        let present: Vec<(&SourceId, Decimal)> = prices
            .iter()
            .filter_map(|p| p.vwap.filter(|v| *v > Decimal::ZERO).map(|v| (&p.source, v)))
            .collect();

        if present.len() < self.quorum || present.is_empty() {
            let missing = prices
                .iter()
                .filter(|p| p.vwap.map_or(true, |v| v <= Decimal::ZERO))
                .map(|p| p.source.clone())
                .collect();
            return Err(RelayError::InsufficientData {
                asset: asset.clone(),
                missing,
            });
        }

        let min = present.iter().map(|(_, v)| *v).min().unwrap_or(Decimal::ZERO);
        let max = present.iter().map(|(_, v)| *v).max().unwrap_or(Decimal::ZERO);

        // the widest pair bounds every other pair
        if !agrees(Some(min), Some(max), self.tolerance) {
            return Err(RelayError::ConsensusMismatch {
                asset: asset.clone(),
                spread: relative_diff(max - min, min).unwrap_or(Decimal::MAX),
                tolerance: self.tolerance,
            });
        }

        // unrounded mean; the gateway rounds to cents
        let sum: Decimal = present.iter().map(|(_, v)| *v).sum();
        let price = sum / Decimal::from(present.len());

        Ok(ConsensusPrice {
            asset: asset.clone(),
            price,
            spread: relative_diff(max - min, min).unwrap_or(Decimal::ZERO),
            sources: present.into_iter().map(|(s, _)| s.clone()).collect(),
        })
    }
}
