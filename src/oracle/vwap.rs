//! VWAP Aggregator - Volume-weighted average price per (asset, source)
//!
//! Non-positive prices are discarded. Observations without a positive volume
//! count with weight 1. The reduction is a plain sum so the result does not
//! depend on input order.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

use crate::types::{AggregatedPrice, AssetId, PriceObservation, SampleWindow, SourceId};

/// Decimal places kept on an aggregated price
pub const VWAP_DECIMALS: u32 = 4;

/// Compute the VWAP of a set of observations, or `None` when nothing usable remains
pub fn compute_vwap<'a, I>(observations: I) -> Option<Decimal>
where
    I: IntoIterator<Item = &'a PriceObservation>,
{
    let mut total_weight = Decimal::ZERO;
    let mut total_weighted = Decimal::ZERO;

    for obs in observations {
        if obs.price <= Decimal::ZERO {
            continue;
        }
        let weight = match obs.volume {
            Some(v) if v > Decimal::ZERO => v,
            _ => Decimal::ONE,
        };
        let (Some(weighted), Some(next_weight)) =
            (obs.price.checked_mul(weight), total_weight.checked_add(weight))
        else {
            debug!(asset = %obs.asset, price = %obs.price, "Dropping observation: weight overflow");
            continue;
        };
        let Some(next_weighted) = total_weighted.checked_add(weighted) else {
            debug!(asset = %obs.asset, price = %obs.price, "Dropping observation: sum overflow");
            continue;
        };
        total_weight = next_weight;
        total_weighted = next_weighted;
    }

    if total_weight.is_zero() {
        return None;
    }

    total_weighted
        .checked_div(total_weight)
        .map(|v| v.round_dp_with_strategy(VWAP_DECIMALS, RoundingStrategy::MidpointAwayFromZero))
}

/// Aggregates the recent window of one source into an [`AggregatedPrice`]
#[derive(Debug, Clone)]
pub struct VwapAggregator {
    /// Look-back window for observations
    window: Duration,
}

impl VwapAggregator {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Start of the sample window ending at `now`
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.window
    }

    /// Aggregate observations for one (asset, source) pair.
    ///
    /// Observations outside `[now - window, now]` or belonging to another
    /// pair are ignored even if the store handed them over.
    pub fn aggregate(
        &self,
        asset: &AssetId,
        source: &SourceId,
        observations: &[PriceObservation],
        now: DateTime<Utc>,
    ) -> AggregatedPrice {
        let window = SampleWindow {
            from: self.window_start(now),
            to: now,
        };

        let in_window: Vec<&PriceObservation> = observations
            .iter()
            .filter(|o| &o.asset == asset && &o.source == source)
            .filter(|o| o.observed_at >= window.from && o.observed_at <= window.to)
            .collect();

        AggregatedPrice {
            asset: asset.clone(),
            source: source.clone(),
            vwap: compute_vwap(in_window.iter().copied()),
            window,
            samples: in_window.len(),
        }
    }
}

impl Default for VwapAggregator {
    fn default() -> Self {
        Self::new(Duration::minutes(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn obs(price: Decimal, volume: Option<Decimal>) -> PriceObservation {
        PriceObservation::new("skin_ak", "buff163", price, volume, Utc::now())
    }

    #[test]
    fn test_vwap_weights_by_volume() {
        let points = vec![obs(dec!(10), Some(dec!(1))), obs(dec!(20), Some(dec!(3)))];
        assert_eq!(compute_vwap(&points), Some(dec!(17.5)));
    }

    #[test]
    fn test_vwap_missing_or_zero_volume_counts_as_one() {
        let points = vec![
            obs(dec!(10), None),
            obs(dec!(20), Some(dec!(0))),
            obs(dec!(30), Some(dec!(-5))),
        ];
        assert_eq!(compute_vwap(&points), Some(dec!(20)));
    }

    #[test]
    fn test_vwap_discards_non_positive_prices() {
        let points = vec![obs(dec!(0), Some(dec!(100))), obs(dec!(-3), None), obs(dec!(12), None)];
        assert_eq!(compute_vwap(&points), Some(dec!(12)));
    }

    #[test]
    fn test_vwap_empty_and_all_discarded_is_none() {
        assert_eq!(compute_vwap(&Vec::<PriceObservation>::new()), None);
        let points = vec![obs(dec!(0), Some(dec!(5))), obs(dec!(-1), None)];
        assert_eq!(compute_vwap(&points), None);
    }

    #[test]
    fn test_vwap_constant_price_ignores_volumes() {
        let points = vec![
            obs(dec!(42.1234), Some(dec!(1))),
            obs(dec!(42.1234), Some(dec!(999))),
            obs(dec!(42.1234), None),
            obs(dec!(42.1234), Some(dec!(0.003))),
        ];
        assert_eq!(compute_vwap(&points), Some(dec!(42.1234)));
    }

    #[test]
    fn test_vwap_is_order_independent() {
        let points = vec![
            obs(dec!(101.37), Some(dec!(3))),
            obs(dec!(99.12), Some(dec!(7.5))),
            obs(dec!(100.01), None),
            obs(dec!(98.765), Some(dec!(11))),
            obs(dec!(102.5), Some(dec!(0.25))),
        ];
        let expected = compute_vwap(&points);
        assert!(expected.is_some());

        let mut reversed = points.clone();
        reversed.reverse();
        assert_eq!(compute_vwap(&reversed), expected);

        for rotation in 1..points.len() {
            let mut rotated = points.clone();
            rotated.rotate_left(rotation);
            assert_eq!(compute_vwap(&rotated), expected);
        }
    }

    #[test]
    fn test_vwap_rounds_to_four_places() {
        let points = vec![obs(dec!(1), None), obs(dec!(1), None), obs(dec!(2), None)];
        // 4/3 = 1.3333...
        assert_eq!(compute_vwap(&points), Some(dec!(1.3333)));
    }

    #[test]
    fn test_aggregate_ignores_stale_and_foreign_rows() {
        let now = Utc::now();
        let aggregator = VwapAggregator::new(Duration::minutes(60));
        let asset = AssetId::new("skin_ak");
        let source = SourceId::new("buff163");

        let mut stale = obs(dec!(1000), None);
        stale.observed_at = now - Duration::minutes(61);
        let mut other_source = obs(dec!(500), None);
        other_source.source = SourceId::new("steam");
        let mut fresh = obs(dec!(10), None);
        fresh.observed_at = now - Duration::minutes(5);

        let result = aggregator.aggregate(&asset, &source, &[stale, other_source, fresh], now);
        assert_eq!(result.vwap, Some(dec!(10)));
        assert_eq!(result.samples, 1);
        assert_eq!(result.window.to, now);
    }
}
