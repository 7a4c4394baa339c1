//! Normalized market data types.
//!
//! Every venue adapter converts its wire format into these structs before
//! anything leaves the adapter. All prices and quantities are
//! `rust_decimal::Decimal`; string wire values are parsed with
//! `str::parse::<Decimal>()`, never through f64.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Supported venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Binance,
    Okx,
}

impl Venue {
    /// Returns the lowercase identifier used in keys and storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Binance => "binance",
            Venue::Okx => "okx",
        }
    }

    /// Parse from the storage identifier.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "binance" => Some(Venue::Binance),
            "okx" => Some(Venue::Okx),
            _ => None,
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Venue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Venue::parse(s).ok_or_else(|| format!("Unknown venue: {}", s))
    }
}

/// Instrument market type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    Spot,
    Perpetual,
}

impl InstrumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentKind::Spot => "spot",
            InstrumentKind::Perpetual => "perpetual",
        }
    }
}

impl std::fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a snapshot came from.
///
/// REST-polled snapshots (degraded mode) carry the same schema as streamed
/// ones but are excluded from latency measurements downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    Stream,
    RestPoll,
}

impl SnapshotSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotSource::Stream => "stream",
            SnapshotSource::RestPoll => "rest_poll",
        }
    }
}

/// A single level in an order book (price + quantity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Price in quote currency.
    pub price: Decimal,
    /// Quantity available at this price in base currency.
    pub quantity: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }

    /// Notional value (price * quantity) at this level.
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

/// Order book invariant violations detected during validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BookValidationError {
    #[error("crossed book: best bid {bid} >= best ask {ask}")]
    Crossed { bid: Decimal, ask: Decimal },

    #[error("non-positive price {price} on {side} side")]
    NonPositivePrice { side: &'static str, price: Decimal },

    #[error("non-positive quantity {quantity} at price {price} on {side} side")]
    NonPositiveQuantity {
        side: &'static str,
        price: Decimal,
        quantity: Decimal,
    },

    #[error("bids not strictly descending at index {index}")]
    UnsortedBids { index: usize },

    #[error("asks not strictly ascending at index {index}")]
    UnsortedAsks { index: usize },
}

/// Normalized per-venue, per-instrument order book snapshot.
///
/// Invariants (enforced by [`OrderBookSnapshot::validate`]):
/// - best bid < best ask
/// - all prices and quantities > 0
/// - bids strictly descending, asks strictly ascending
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    /// Venue identifier.
    pub venue: Venue,
    /// Normalized instrument identifier (e.g., "BTC-USDT-PERP").
    pub instrument: String,
    /// Venue-provided timestamp (UTC).
    pub timestamp: DateTime<Utc>,
    /// Local receipt timestamp (UTC).
    pub local_timestamp: DateTime<Utc>,
    /// Venue sequence number (Binance: lastUpdateId, OKX: seqId).
    pub sequence_id: u64,
    /// Bid levels, best (highest price) first.
    pub bids: Vec<PriceLevel>,
    /// Ask levels, best (lowest price) first.
    pub asks: Vec<PriceLevel>,
    /// Number of depth levels captured.
    pub depth_levels: u16,
    /// Stream or REST fallback.
    pub source: SnapshotSource,
}

impl OrderBookSnapshot {
    /// Validate the book invariants.
    ///
    /// A snapshot that fails validation must be dropped by the adapter, not
    /// published.
    pub fn validate(&self) -> Result<(), BookValidationError> {
        for (side, levels) in [("bid", &self.bids), ("ask", &self.asks)] {
            for level in levels {
                if level.price <= Decimal::ZERO {
                    return Err(BookValidationError::NonPositivePrice {
                        side,
                        price: level.price,
                    });
                }
                if level.quantity <= Decimal::ZERO {
                    return Err(BookValidationError::NonPositiveQuantity {
                        side,
                        price: level.price,
                        quantity: level.quantity,
                    });
                }
            }
        }

        for i in 1..self.bids.len() {
            if self.bids[i].price >= self.bids[i - 1].price {
                return Err(BookValidationError::UnsortedBids { index: i });
            }
        }
        for i in 1..self.asks.len() {
            if self.asks[i].price <= self.asks[i - 1].price {
                return Err(BookValidationError::UnsortedAsks { index: i });
            }
        }

        if let (Some(bid), Some(ask)) = (self.best_bid(), self.best_ask()) {
            if bid >= ask {
                return Err(BookValidationError::Crossed { bid, ask });
            }
        }

        Ok(())
    }

    /// Best (highest) bid price, if any bids exist.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    /// Best (lowest) ask price, if any asks exist.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// Quantity at the best bid level.
    pub fn best_bid_quantity(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.quantity)
    }

    /// Quantity at the best ask level.
    pub fn best_ask_quantity(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.quantity)
    }

    /// Mid price ((best_bid + best_ask) / 2). None unless both sides exist.
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    /// Absolute spread (best_ask - best_bid). None unless both sides exist.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Spread in basis points: (spread / mid) * 10000.
    pub fn spread_bps(&self) -> Option<Decimal> {
        let spread = self.spread()?;
        let mid = self.mid_price()?;
        if mid <= Decimal::ZERO {
            return None;
        }
        Some((spread / mid) * Decimal::from(10_000))
    }

    /// True if both sides have at least one level.
    pub fn is_valid(&self) -> bool {
        !self.bids.is_empty() && !self.asks.is_empty()
    }

    /// Notional depth within `bps` basis points of the mid on one side.
    ///
    /// Threshold prices are `mid * (1 - bps/10000)` for bids and
    /// `mid * (1 + bps/10000)` for asks; inclusion is `>=` / `<=`. Levels
    /// are sorted best-first so the scan stops at the first level outside
    /// the window.
    pub fn depth_at_bps(&self, bps: u32, side: BookSide) -> Decimal {
        let Some(mid) = self.mid_price() else {
            return Decimal::ZERO;
        };
        let fraction = Decimal::from(bps) / Decimal::from(10_000);
        let mut total = Decimal::ZERO;

        match side {
            BookSide::Bid => {
                let threshold = mid * (Decimal::ONE - fraction);
                for level in &self.bids {
                    if level.price >= threshold {
                        total += level.notional();
                    } else {
                        break;
                    }
                }
            }
            BookSide::Ask => {
                let threshold = mid * (Decimal::ONE + fraction);
                for level in &self.asks {
                    if level.price <= threshold {
                        total += level.notional();
                    } else {
                        break;
                    }
                }
            }
        }

        total
    }
}

/// Book side selector for depth queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookSide {
    Bid,
    Ask,
}

/// Normalized ticker snapshot.
///
/// Mark and index prices are perpetual-only; both are `None` for spot
/// instruments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerSnapshot {
    pub venue: Venue,
    pub instrument: String,
    /// Venue-provided timestamp (UTC).
    pub timestamp: DateTime<Utc>,
    /// Local receipt timestamp (UTC).
    pub local_timestamp: DateTime<Utc>,
    /// Last traded price.
    pub last_price: Decimal,
    /// Mark price (perpetuals only).
    pub mark_price: Option<Decimal>,
    /// Index price (perpetuals only).
    pub index_price: Option<Decimal>,
    /// 24-hour volume in base currency.
    pub volume_24h: Decimal,
    /// 24-hour volume in USD notional.
    pub volume_24h_usd: Decimal,
    /// 24-hour high.
    pub high_24h: Decimal,
    /// 24-hour low.
    pub low_24h: Decimal,
    /// Current funding rate (perpetuals only, 8-hour rate).
    pub funding_rate: Option<Decimal>,
    /// Next funding settlement time (perpetuals only).
    pub next_funding_time: Option<DateTime<Utc>>,
}

impl TickerSnapshot {
    /// True if this ticker carries perpetual fields.
    pub fn is_perpetual(&self) -> bool {
        self.mark_price.is_some()
    }

    /// Mark-index deviation in basis points:
    /// (mark - index) / index * 10000. None unless both prices are present
    /// and the index is positive.
    pub fn mark_index_deviation_bps(&self) -> Option<Decimal> {
        let mark = self.mark_price?;
        let index = self.index_price?;
        if index <= Decimal::ZERO {
            return None;
        }
        Some((mark - index) / index * Decimal::from(10_000))
    }

    /// Annualized funding rate assuming 8-hour periods (3 per day).
    pub fn funding_rate_annualized(&self) -> Option<Decimal> {
        self.funding_rate
            .map(|rate| rate * Decimal::from(3) * Decimal::from(365))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn book(bids: Vec<(Decimal, Decimal)>, asks: Vec<(Decimal, Decimal)>) -> OrderBookSnapshot {
        OrderBookSnapshot {
            venue: Venue::Binance,
            instrument: "BTC-USDT-PERP".to_string(),
            timestamp: Utc::now(),
            local_timestamp: Utc::now(),
            sequence_id: 1,
            bids: bids
                .into_iter()
                .map(|(p, q)| PriceLevel::new(p, q))
                .collect(),
            asks: asks
                .into_iter()
                .map(|(p, q)| PriceLevel::new(p, q))
                .collect(),
            depth_levels: 20,
            source: SnapshotSource::Stream,
        }
    }

    #[test]
    fn test_venue_roundtrip() {
        assert_eq!(Venue::Binance.as_str(), "binance");
        assert_eq!(Venue::parse("OKX"), Some(Venue::Okx));
        assert_eq!(Venue::parse("unknown"), None);
        assert_eq!("binance".parse::<Venue>().unwrap(), Venue::Binance);
    }

    #[test]
    fn test_price_level_notional() {
        let level = PriceLevel::new(dec!(50000), dec!(1.5));
        assert_eq!(level.notional(), dec!(75000));
    }

    #[test]
    fn test_spread_and_mid() {
        let snapshot = book(vec![(dec!(49999), dec!(1))], vec![(dec!(50001), dec!(1))]);
        assert_eq!(snapshot.best_bid(), Some(dec!(49999)));
        assert_eq!(snapshot.best_ask(), Some(dec!(50001)));
        assert_eq!(snapshot.mid_price(), Some(dec!(50000)));
        assert_eq!(snapshot.spread(), Some(dec!(2)));
        // 2 / 50000 * 10000 = 0.4 bps
        assert_eq!(snapshot.spread_bps(), Some(dec!(0.4)));
    }

    #[test]
    fn test_spread_absent_for_one_sided_book() {
        let snapshot = book(vec![(dec!(49999), dec!(1))], vec![]);
        assert!(snapshot.mid_price().is_none());
        assert!(snapshot.spread().is_none());
        assert!(snapshot.spread_bps().is_none());
        assert!(!snapshot.is_valid());
    }

    #[test]
    fn test_validate_crossed_book() {
        let snapshot = book(vec![(dec!(50001), dec!(1))], vec![(dec!(50000), dec!(1))]);
        assert!(matches!(
            snapshot.validate(),
            Err(BookValidationError::Crossed { .. })
        ));
    }

    #[test]
    fn test_validate_touching_book_is_crossed() {
        // best_bid == best_ask is rejected too
        let snapshot = book(vec![(dec!(50000), dec!(1))], vec![(dec!(50000), dec!(1))]);
        assert!(matches!(
            snapshot.validate(),
            Err(BookValidationError::Crossed { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_non_positive() {
        let snapshot = book(vec![(dec!(0), dec!(1))], vec![(dec!(50001), dec!(1))]);
        assert!(matches!(
            snapshot.validate(),
            Err(BookValidationError::NonPositivePrice { .. })
        ));

        let snapshot = book(vec![(dec!(49999), dec!(0))], vec![(dec!(50001), dec!(1))]);
        assert!(matches!(
            snapshot.validate(),
            Err(BookValidationError::NonPositiveQuantity { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_unsorted_sides() {
        let snapshot = book(
            vec![(dec!(49998), dec!(1)), (dec!(49999), dec!(1))],
            vec![(dec!(50001), dec!(1))],
        );
        assert_eq!(
            snapshot.validate(),
            Err(BookValidationError::UnsortedBids { index: 1 })
        );

        let snapshot = book(
            vec![(dec!(49999), dec!(1))],
            vec![(dec!(50002), dec!(1)), (dec!(50001), dec!(1))],
        );
        assert_eq!(
            snapshot.validate(),
            Err(BookValidationError::UnsortedAsks { index: 1 })
        );
    }

    #[test]
    fn test_depth_at_bps() {
        // mid = 50000; 10 bps window = [49950, 50050]
        let snapshot = book(
            vec![
                (dec!(49999), dec!(1)),
                (dec!(49960), dec!(2)),
                (dec!(49900), dec!(10)),
            ],
            vec![
                (dec!(50001), dec!(1)),
                (dec!(50040), dec!(2)),
                (dec!(50100), dec!(10)),
            ],
        );

        let bid_depth = snapshot.depth_at_bps(10, BookSide::Bid);
        // 49999*1 + 49960*2 = 149919
        assert_eq!(bid_depth, dec!(149919));

        let ask_depth = snapshot.depth_at_bps(10, BookSide::Ask);
        // 50001*1 + 50040*2 = 150081
        assert_eq!(ask_depth, dec!(150081));
    }

    #[test]
    fn test_depth_at_bps_single_level() {
        let snapshot = book(vec![(dec!(49999), dec!(1))], vec![(dec!(50001), dec!(1))]);
        assert_eq!(snapshot.depth_at_bps(5, BookSide::Bid), dec!(49999));
        // 1 bps window [49995, 50005] still contains both single levels
        assert_eq!(snapshot.depth_at_bps(1, BookSide::Ask), dec!(50001));
    }

    #[test]
    fn test_ticker_mark_index_deviation() {
        let ticker = TickerSnapshot {
            venue: Venue::Okx,
            instrument: "BTC-USDT-PERP".to_string(),
            timestamp: Utc::now(),
            local_timestamp: Utc::now(),
            last_price: dec!(50000),
            mark_price: Some(dec!(50010)),
            index_price: Some(dec!(50000)),
            volume_24h: dec!(1000),
            volume_24h_usd: dec!(50000000),
            high_24h: dec!(51000),
            low_24h: dec!(49000),
            funding_rate: Some(dec!(0.0001)),
            next_funding_time: None,
        };

        assert!(ticker.is_perpetual());
        // (50010 - 50000) / 50000 * 10000 = 2 bps
        assert_eq!(ticker.mark_index_deviation_bps(), Some(dec!(2)));
        assert_eq!(ticker.funding_rate_annualized(), Some(dec!(0.1095)));
    }

    #[test]
    fn test_ticker_spot_has_no_deviation() {
        let ticker = TickerSnapshot {
            venue: Venue::Binance,
            instrument: "BTC-USDT-SPOT".to_string(),
            timestamp: Utc::now(),
            local_timestamp: Utc::now(),
            last_price: dec!(50000),
            mark_price: None,
            index_price: None,
            volume_24h: dec!(1000),
            volume_24h_usd: dec!(50000000),
            high_24h: dec!(51000),
            low_24h: dec!(49000),
            funding_rate: None,
            next_funding_time: None,
        };

        assert!(!ticker.is_perpetual());
        assert!(ticker.mark_index_deviation_bps().is_none());
        assert!(ticker.funding_rate_annualized().is_none());
    }
}
