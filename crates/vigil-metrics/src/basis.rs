//! Perp/spot basis and cross-venue divergence pairing.
//!
//! Both calculators cache the latest leg per configured pair and emit
//! whenever either leg updates, provided both legs are fresher than the
//! staleness bound. Stale pairs are skipped silently; gaps are handled by
//! the z-score reset path, not here.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use vigil_common::config::{BasisPair, CrossVenuePair};
use vigil_common::metrics::{BasisMetrics, CrossVenueMetrics};
use vigil_common::types::{OrderBookSnapshot, Venue};

#[derive(Debug, Clone, Copy)]
struct Leg {
    mid: Decimal,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct TopOfBook {
    bid: Decimal,
    ask: Decimal,
    mid: Decimal,
    timestamp: DateTime<Utc>,
}

/// A basis computation triggered by a leg update.
#[derive(Debug, Clone)]
pub struct BasisEmit {
    pub venue: Venue,
    /// The perpetual instrument the basis belongs to.
    pub perp_instrument: String,
    pub timestamp: DateTime<Utc>,
    pub metrics: BasisMetrics,
}

/// Maintains perp and spot legs per configured pair.
#[derive(Debug)]
pub struct BasisCalculator {
    pairs: Vec<BasisPair>,
    staleness: chrono::Duration,
    legs: HashMap<(Venue, String), Leg>,
}

impl BasisCalculator {
    pub fn new(pairs: Vec<BasisPair>, staleness: Duration) -> Self {
        Self {
            pairs,
            staleness: chrono::Duration::from_std(staleness)
                .unwrap_or_else(|_| chrono::Duration::seconds(5)),
            legs: HashMap::new(),
        }
    }

    /// Update one leg and return the basis for every affected pair whose
    /// other leg is fresh enough.
    pub fn update(
        &mut self,
        venue: Venue,
        instrument: &str,
        mid: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Vec<BasisEmit> {
        self.legs
            .insert((venue, instrument.to_string()), Leg { mid, timestamp });

        let mut emits = Vec::new();
        for pair in &self.pairs {
            if pair.venue != venue {
                continue;
            }
            if pair.perp_instrument != instrument && pair.spot_instrument != instrument {
                continue;
            }

            let Some(perp) = self.legs.get(&(venue, pair.perp_instrument.clone())) else {
                continue;
            };
            let Some(spot) = self.legs.get(&(venue, pair.spot_instrument.clone())) else {
                continue;
            };

            let age = (perp.timestamp - spot.timestamp).abs();
            if age > self.staleness {
                continue;
            }
            if spot.mid <= Decimal::ZERO {
                continue;
            }

            let basis_abs = perp.mid - spot.mid;
            let basis_bps = basis_abs / spot.mid * Decimal::from(10_000);

            emits.push(BasisEmit {
                venue,
                perp_instrument: pair.perp_instrument.clone(),
                timestamp,
                metrics: BasisMetrics {
                    basis_abs,
                    basis_bps,
                    perp_mid: perp.mid,
                    spot_mid: spot.mid,
                    zscore: None,
                },
            });
        }
        emits
    }

    /// Drop cached legs for an instrument (unsubscribe).
    pub fn forget(&mut self, venue: Venue, instrument: &str) {
        self.legs.remove(&(venue, instrument.to_string()));
    }
}

/// Maintains the same instrument across two venues for divergence.
#[derive(Debug)]
pub struct CrossVenueCalculator {
    pairs: Vec<CrossVenuePair>,
    staleness: chrono::Duration,
    books: HashMap<(Venue, String), TopOfBook>,
}

impl CrossVenueCalculator {
    pub fn new(pairs: Vec<CrossVenuePair>, staleness: Duration) -> Self {
        Self {
            pairs,
            staleness: chrono::Duration::from_std(staleness)
                .unwrap_or_else(|_| chrono::Duration::seconds(5)),
            books: HashMap::new(),
        }
    }

    /// Update from a snapshot and return divergence metrics for every
    /// affected pair with both venues fresh.
    pub fn update(&mut self, snapshot: &OrderBookSnapshot) -> Vec<CrossVenueMetrics> {
        let (Some(bid), Some(ask), Some(mid)) = (
            snapshot.best_bid(),
            snapshot.best_ask(),
            snapshot.mid_price(),
        ) else {
            return Vec::new();
        };

        self.books.insert(
            (snapshot.venue, snapshot.instrument.clone()),
            TopOfBook {
                bid,
                ask,
                mid,
                timestamp: snapshot.local_timestamp,
            },
        );

        let mut emits = Vec::new();
        for pair in &self.pairs {
            if pair.instrument != snapshot.instrument {
                continue;
            }
            if pair.venue_a != snapshot.venue && pair.venue_b != snapshot.venue {
                continue;
            }

            let Some(book_a) = self.books.get(&(pair.venue_a, pair.instrument.clone())) else {
                continue;
            };
            let Some(book_b) = self.books.get(&(pair.venue_b, pair.instrument.clone())) else {
                continue;
            };

            let age = (book_a.timestamp - book_b.timestamp).abs();
            if age > self.staleness {
                continue;
            }
            if book_b.mid <= Decimal::ZERO {
                continue;
            }

            let divergence_bps =
                (book_a.mid - book_b.mid) / book_b.mid * Decimal::from(10_000);
            let cross_venue_spread = book_a.bid.max(book_b.bid) - book_a.ask.min(book_b.ask);

            emits.push(CrossVenueMetrics {
                venue_a: pair.venue_a,
                venue_b: pair.venue_b,
                instrument: pair.instrument.clone(),
                timestamp: snapshot.local_timestamp,
                mid_price_a: book_a.mid,
                mid_price_b: book_b.mid,
                divergence_bps,
                cross_venue_spread,
                arbitrage_opportunity: cross_venue_spread > Decimal::ZERO,
                zscore: None,
            });
        }
        emits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use vigil_common::types::{PriceLevel, SnapshotSource};

    fn pair() -> BasisPair {
        BasisPair {
            venue: Venue::Binance,
            perp_instrument: "BTC-USDT-PERP".to_string(),
            spot_instrument: "BTC-USDT-SPOT".to_string(),
        }
    }

    #[test]
    fn test_basis_needs_both_legs() {
        let mut calc = BasisCalculator::new(vec![pair()], Duration::from_secs(5));
        let now = Utc::now();

        assert!(calc
            .update(Venue::Binance, "BTC-USDT-PERP", dec!(50050), now)
            .is_empty());

        let emits = calc.update(Venue::Binance, "BTC-USDT-SPOT", dec!(50000), now);
        assert_eq!(emits.len(), 1);

        let emit = &emits[0];
        assert_eq!(emit.perp_instrument, "BTC-USDT-PERP");
        assert_eq!(emit.metrics.basis_abs, dec!(50));
        // 50 / 50000 * 10000 = 10 bps
        assert_eq!(emit.metrics.basis_bps, dec!(10));
        assert!(emit.metrics.is_premium());
    }

    #[test]
    fn test_basis_emitted_on_either_leg_update() {
        let mut calc = BasisCalculator::new(vec![pair()], Duration::from_secs(5));
        let now = Utc::now();

        calc.update(Venue::Binance, "BTC-USDT-SPOT", dec!(50000), now);
        let emits = calc.update(Venue::Binance, "BTC-USDT-PERP", dec!(49950), now);
        assert_eq!(emits.len(), 1);
        assert!(emits[0].metrics.is_discount());
        assert_eq!(emits[0].metrics.basis_bps, dec!(-10));
    }

    #[test]
    fn test_basis_skipped_when_leg_stale() {
        let mut calc = BasisCalculator::new(vec![pair()], Duration::from_secs(5));
        let t0 = Utc::now();

        calc.update(Venue::Binance, "BTC-USDT-SPOT", dec!(50000), t0);
        let t1 = t0 + chrono::Duration::seconds(10);
        assert!(calc
            .update(Venue::Binance, "BTC-USDT-PERP", dec!(50050), t1)
            .is_empty());

        // A fresh spot leg revives the pair
        let t2 = t1 + chrono::Duration::seconds(1);
        assert_eq!(
            calc.update(Venue::Binance, "BTC-USDT-SPOT", dec!(50000), t2)
                .len(),
            1
        );
    }

    #[test]
    fn test_basis_ignores_other_venue() {
        let mut calc = BasisCalculator::new(vec![pair()], Duration::from_secs(5));
        let now = Utc::now();

        calc.update(Venue::Okx, "BTC-USDT-PERP", dec!(50050), now);
        assert!(calc
            .update(Venue::Okx, "BTC-USDT-SPOT", dec!(50000), now)
            .is_empty());
    }

    fn snapshot(venue: Venue, bid: Decimal, ask: Decimal, at: DateTime<Utc>) -> OrderBookSnapshot {
        OrderBookSnapshot {
            venue,
            instrument: "BTC-USDT-PERP".to_string(),
            timestamp: at,
            local_timestamp: at,
            sequence_id: 1,
            bids: vec![PriceLevel::new(bid, dec!(1))],
            asks: vec![PriceLevel::new(ask, dec!(1))],
            depth_levels: 20,
            source: SnapshotSource::Stream,
        }
    }

    fn cross_pair() -> CrossVenuePair {
        CrossVenuePair {
            instrument: "BTC-USDT-PERP".to_string(),
            venue_a: Venue::Binance,
            venue_b: Venue::Okx,
        }
    }

    #[test]
    fn test_cross_venue_divergence() {
        let mut calc = CrossVenueCalculator::new(vec![cross_pair()], Duration::from_secs(5));
        let now = Utc::now();

        assert!(calc
            .update(&snapshot(Venue::Binance, dec!(49999), dec!(50001), now))
            .is_empty());

        let emits = calc.update(&snapshot(Venue::Okx, dec!(50009), dec!(50011), now));
        assert_eq!(emits.len(), 1);

        let metrics = &emits[0];
        assert_eq!(metrics.mid_price_a, dec!(50000));
        assert_eq!(metrics.mid_price_b, dec!(50010));
        // (50000 - 50010) / 50010 * 10000 is about -2 bps
        assert!(metrics.divergence_bps < dec!(-1.9));
        assert!(metrics.divergence_bps > dec!(-2.1));
        // max bid 50009 - min ask 50001 = 8 > 0: arbitrage window
        assert_eq!(metrics.cross_venue_spread, dec!(8));
        assert!(metrics.arbitrage_opportunity);
    }

    #[test]
    fn test_cross_venue_no_arbitrage_flag() {
        let mut calc = CrossVenueCalculator::new(vec![cross_pair()], Duration::from_secs(5));
        let now = Utc::now();

        calc.update(&snapshot(Venue::Binance, dec!(49999), dec!(50001), now));
        let emits = calc.update(&snapshot(Venue::Okx, dec!(49998), dec!(50002), now));
        assert_eq!(emits.len(), 1);
        // max bid 49999 - min ask 50001 = -2
        assert_eq!(emits[0].cross_venue_spread, dec!(-2));
        assert!(!emits[0].arbitrage_opportunity);
    }

    #[test]
    fn test_cross_venue_staleness() {
        let mut calc = CrossVenueCalculator::new(vec![cross_pair()], Duration::from_secs(5));
        let t0 = Utc::now();

        calc.update(&snapshot(Venue::Binance, dec!(49999), dec!(50001), t0));
        let t1 = t0 + chrono::Duration::seconds(30);
        assert!(calc
            .update(&snapshot(Venue::Okx, dec!(50009), dec!(50011), t1))
            .is_empty());
    }
}
