//! Depth-at-N-bps and order book imbalance.

use rust_decimal::Decimal;

use vigil_common::metrics::{DepthMetrics, DepthWindow, ImbalanceMetrics};
use vigil_common::types::{BookSide, OrderBookSnapshot};

/// Compute notional depth within each configured bps window of the mid.
///
/// Returns `None` when the book has an empty side (no mid price).
pub fn compute_depth(snapshot: &OrderBookSnapshot, bps_levels: &[u32]) -> Option<DepthMetrics> {
    snapshot.mid_price()?;

    let mut windows = Vec::with_capacity(bps_levels.len());
    for &bps in bps_levels {
        let bid = snapshot.depth_at_bps(bps, BookSide::Bid);
        let ask = snapshot.depth_at_bps(bps, BookSide::Ask);
        windows.push(DepthWindow {
            bps,
            bid,
            ask,
            total: bid + ask,
        });
    }

    Some(DepthMetrics { windows })
}

/// Compute imbalance at several aggregation levels.
///
/// Each value is (bid - ask) / (bid + ask); a zero denominator makes that
/// level absent rather than zero.
pub fn compute_imbalance(
    snapshot: &OrderBookSnapshot,
    depth: Option<&DepthMetrics>,
    reference_bps: u32,
) -> ImbalanceMetrics {
    let top_of_book = match (snapshot.best_bid_quantity(), snapshot.best_ask_quantity()) {
        (Some(bid), Some(ask)) => ratio(bid, ask),
        _ => None,
    };

    let depth_window = depth
        .and_then(|d| d.window(reference_bps))
        .and_then(|window| ratio(window.bid, window.ask));

    ImbalanceMetrics {
        top_of_book,
        depth_window,
        weighted_5: levels_imbalance(snapshot, 5),
        weighted_10: levels_imbalance(snapshot, 10),
    }
}

/// Quantity imbalance over the top `levels` levels of each side.
fn levels_imbalance(snapshot: &OrderBookSnapshot, levels: usize) -> Option<Decimal> {
    if snapshot.bids.is_empty() || snapshot.asks.is_empty() {
        return None;
    }
    let bid: Decimal = snapshot.bids.iter().take(levels).map(|l| l.quantity).sum();
    let ask: Decimal = snapshot.asks.iter().take(levels).map(|l| l.quantity).sum();
    ratio(bid, ask)
}

fn ratio(bid: Decimal, ask: Decimal) -> Option<Decimal> {
    let total = bid + ask;
    if total == Decimal::ZERO {
        return None;
    }
    Some((bid - ask) / total)
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
    fn test_depth_windows() {
        // mid = 50000; 5 bps = [49975, 50025], 10 bps = [49950, 50050]
        let snapshot = book(
            vec![
                (dec!(49999), dec!(1)),
                (dec!(49980), dec!(2)),
                (dec!(49960), dec!(4)),
            ],
            vec![
                (dec!(50001), dec!(1)),
                (dec!(50020), dec!(2)),
                (dec!(50040), dec!(4)),
            ],
        );

        let depth = compute_depth(&snapshot, &[5, 10]).unwrap();

        let w5 = depth.window(5).unwrap();
        // bids: 49999*1 + 49980*2 = 149959
        assert_eq!(w5.bid, dec!(149959));
        // asks: 50001*1 + 50020*2 = 150041
        assert_eq!(w5.ask, dec!(150041));
        assert_eq!(w5.total, dec!(300000));

        let w10 = depth.window(10).unwrap();
        assert_eq!(w10.bid, dec!(149959) + dec!(49960) * dec!(4));
        assert_eq!(w10.ask, dec!(150041) + dec!(50040) * dec!(4));
    }

    #[test]
    fn test_depth_absent_for_one_sided_book() {
        let snapshot = book(vec![(dec!(49999), dec!(1))], vec![]);
        assert!(compute_depth(&snapshot, &[5, 10]).is_none());
    }

    #[test]
    fn test_imbalance_top_of_book() {
        let snapshot = book(vec![(dec!(49999), dec!(3))], vec![(dec!(50001), dec!(1))]);
        let imbalance = compute_imbalance(&snapshot, None, 10);
        // (3 - 1) / (3 + 1) = 0.5
        assert_eq!(imbalance.top_of_book, Some(dec!(0.5)));
    }

    #[test]
    fn test_imbalance_depth_window() {
        let snapshot = book(
            vec![(dec!(49999), dec!(2))],
            vec![(dec!(50001), dec!(1))],
        );
        let depth = compute_depth(&snapshot, &[10]).unwrap();
        let imbalance = compute_imbalance(&snapshot, Some(&depth), 10);

        let bid_notional = dec!(49999) * dec!(2);
        let ask_notional = dec!(50001);
        let expected = (bid_notional - ask_notional) / (bid_notional + ask_notional);
        assert_eq!(imbalance.depth_window, Some(expected));
    }

    #[test]
    fn test_imbalance_range() {
        // All bid, no ask quantity cannot happen with a validated book, but
        // a heavily one-sided book approaches +1
        let snapshot = book(
            vec![(dec!(49999), dec!(1000))],
            vec![(dec!(50001), dec!(0.001))],
        );
        let imbalance = compute_imbalance(&snapshot, None, 10);
        let top = imbalance.top_of_book.unwrap();
        assert!(top > dec!(0.99) && top <= dec!(1));
    }

    #[test]
    fn test_weighted_imbalance_uses_top_levels() {
        let snapshot = book(
            vec![
                (dec!(49999), dec!(1)),
                (dec!(49998), dec!(1)),
                (dec!(49997), dec!(1)),
                (dec!(49996), dec!(1)),
                (dec!(49995), dec!(1)),
                // Level 6, excluded from weighted_5
                (dec!(49994), dec!(100)),
            ],
            vec![(dec!(50001), dec!(5))],
        );
        let imbalance = compute_imbalance(&snapshot, None, 10);
        // weighted_5: bids 5 vs asks 5 -> 0
        assert_eq!(imbalance.weighted_5, Some(dec!(0)));
        // weighted_10 includes the large level 6
        assert!(imbalance.weighted_10.unwrap() > dec!(0.9));
    }
}
