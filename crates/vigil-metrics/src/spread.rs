//! Spread metrics from a single snapshot.

use rust_decimal::Decimal;

use vigil_common::metrics::SpreadMetrics;
use vigil_common::types::OrderBookSnapshot;

/// Compute absolute spread, spread in bps, and mid price.
///
/// Returns `None` when the book has fewer than one level per side; all
/// spread outputs are absent together. The z-score field is left `None`
/// here and attached by the engine.
pub fn compute_spread(snapshot: &OrderBookSnapshot) -> Option<SpreadMetrics> {
    let spread_abs = snapshot.spread()?;
    let mid_price = snapshot.mid_price()?;
    if mid_price <= Decimal::ZERO {
        return None;
    }
    let spread_bps = (spread_abs / mid_price) * Decimal::from(10_000);

    Some(SpreadMetrics {
        spread_abs,
        spread_bps,
        mid_price,
        zscore: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use vigil_common::types::{PriceLevel, SnapshotSource, Venue};

    fn book(bids: Vec<(Decimal, Decimal)>, asks: Vec<(Decimal, Decimal)>) -> OrderBookSnapshot {
        OrderBookSnapshot {
            venue: Venue::Binance,
            instrument: "BTC-USDT-PERP".to_string(),
            timestamp: Utc::now(),
            local_timestamp: Utc::now(),
            sequence_id: 1,
            bids: bids.into_iter().map(|(p, q)| PriceLevel::new(p, q)).collect(),
            asks: asks.into_iter().map(|(p, q)| PriceLevel::new(p, q)).collect(),
            depth_levels: 20,
            source: SnapshotSource::Stream,
        }
    }

    #[test]
    fn test_compute_spread() {
        let snapshot = book(vec![(dec!(49995), dec!(1))], vec![(dec!(50005), dec!(1))]);
        let metrics = compute_spread(&snapshot).unwrap();

        assert_eq!(metrics.spread_abs, dec!(10));
        assert_eq!(metrics.mid_price, dec!(50000));
        // 10 / 50000 * 10000 = 2 bps
        assert_eq!(metrics.spread_bps, dec!(2));
        assert!(metrics.zscore.is_none());
    }

    #[test]
    fn test_empty_side_gives_absent() {
        let snapshot = book(vec![], vec![(dec!(50005), dec!(1))]);
        assert!(compute_spread(&snapshot).is_none());

        let snapshot = book(vec![(dec!(49995), dec!(1))], vec![]);
        assert!(compute_spread(&snapshot).is_none());
    }

    #[test]
    fn test_full_decimal_precision_preserved() {
        // A tight book where float math would round the distinction away
        let snapshot = book(
            vec![(dec!(0.00001234), dec!(1000000))],
            vec![(dec!(0.00001235), dec!(1000000))],
        );
        let metrics = compute_spread(&snapshot).unwrap();
        assert_eq!(metrics.spread_abs, dec!(0.00000001));
        assert!(metrics.mid_price > dec!(0.00001234));
        assert!(metrics.mid_price < dec!(0.00001235));
    }
}
