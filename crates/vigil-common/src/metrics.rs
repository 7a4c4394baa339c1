//! Computed microstructure metric types.
//!
//! A z-score of `None` means the statistical engine was warming up or
//! guarded when the sample was produced; it is never the same thing as a
//! z-score of zero.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Venue;

/// Bid-ask spread metrics for one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpreadMetrics {
    /// Absolute spread (best_ask - best_bid) in quote currency.
    pub spread_abs: Decimal,
    /// Spread in basis points: (spread / mid) * 10000.
    pub spread_bps: Decimal,
    /// Mid price ((best_bid + best_ask) / 2).
    pub mid_price: Decimal,
    /// Z-score of spread_bps over the rolling window, None during warmup.
    pub zscore: Option<Decimal>,
}

/// Notional depth inside one bps window of the mid price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthWindow {
    /// Window half-width in basis points.
    pub bps: u32,
    /// Bid-side notional within the window.
    pub bid: Decimal,
    /// Ask-side notional within the window.
    pub ask: Decimal,
    /// bid + ask.
    pub total: Decimal,
}

/// Order book depth at each configured bps level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthMetrics {
    /// One entry per configured level, ascending by bps.
    pub windows: Vec<DepthWindow>,
}

impl DepthMetrics {
    /// Look up a window by its bps level.
    pub fn window(&self, bps: u32) -> Option<&DepthWindow> {
        self.windows.iter().find(|w| w.bps == bps)
    }

    /// Total depth at a level, if configured.
    pub fn total_at(&self, bps: u32) -> Option<Decimal> {
        self.window(bps).map(|w| w.total)
    }
}

/// Order book imbalance at several aggregation levels.
///
/// Each value is (bid - ask) / (bid + ask) in [-1, +1]; absent when the
/// denominator is zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImbalanceMetrics {
    /// Imbalance of quantities at the best bid/ask only.
    pub top_of_book: Option<Decimal>,
    /// Notional imbalance within the reference depth window (10 bps).
    pub depth_window: Option<Decimal>,
    /// Volume-weighted imbalance across the top 5 levels.
    pub weighted_5: Option<Decimal>,
    /// Volume-weighted imbalance across the top 10 levels.
    pub weighted_10: Option<Decimal>,
}

/// Perpetual-spot basis metrics.
///
/// Positive basis means the perpetual trades at a premium to spot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasisMetrics {
    /// Absolute basis (perp_mid - spot_mid).
    pub basis_abs: Decimal,
    /// Basis in bps relative to spot: (basis_abs / spot_mid) * 10000.
    pub basis_bps: Decimal,
    /// Perpetual mid price.
    pub perp_mid: Decimal,
    /// Spot mid price.
    pub spot_mid: Decimal,
    /// Z-score of basis_bps, None during warmup.
    pub zscore: Option<Decimal>,
}

impl BasisMetrics {
    pub fn is_premium(&self) -> bool {
        self.basis_abs > Decimal::ZERO
    }

    pub fn is_discount(&self) -> bool {
        self.basis_abs < Decimal::ZERO
    }
}

/// Cross-venue comparison for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossVenueMetrics {
    pub venue_a: Venue,
    pub venue_b: Venue,
    pub instrument: String,
    pub timestamp: DateTime<Utc>,
    pub mid_price_a: Decimal,
    pub mid_price_b: Decimal,
    /// (mid_a - mid_b) / mid_b * 10000.
    pub divergence_bps: Decimal,
    /// max(best bids) - min(best asks) across the two venues.
    pub cross_venue_spread: Decimal,
    /// True when cross_venue_spread is positive.
    pub arbitrage_opportunity: bool,
    /// Z-score of divergence_bps, None during warmup.
    pub zscore: Option<Decimal>,
}

/// The complete metrics package computed for one order book snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedMetrics {
    pub venue: Venue,
    pub instrument: String,
    /// Timestamp of the underlying snapshot (local receipt time).
    pub timestamp: DateTime<Utc>,
    pub spread: SpreadMetrics,
    pub depth: DepthMetrics,
    pub imbalance: ImbalanceMetrics,
    /// Present only for perpetual instruments with a fresh spot leg.
    pub basis: Option<BasisMetrics>,
}

impl AggregatedMetrics {
    pub fn has_basis(&self) -> bool {
        self.basis.is_some()
    }

    /// Extract the value of a named metric, if available in this package.
    ///
    /// Names follow the storage convention: `spread_bps`, `spread_abs`,
    /// `basis_bps`, `basis_abs`, `imbalance`, `depth_{N}bps_total`.
    pub fn metric_value(&self, metric_name: &str) -> Option<Decimal> {
        match metric_name {
            "spread_bps" => Some(self.spread.spread_bps),
            "spread_abs" => Some(self.spread.spread_abs),
            "mid_price" => Some(self.spread.mid_price),
            "basis_bps" => self.basis.as_ref().map(|b| b.basis_bps),
            "basis_abs" => self.basis.as_ref().map(|b| b.basis_abs),
            "imbalance" => self.imbalance.depth_window,
            other => {
                let bps = parse_depth_metric_name(other)?;
                self.depth.total_at(bps)
            }
        }
    }

    /// Extract the z-score attached to a named metric.
    pub fn metric_zscore(&self, metric_name: &str) -> Option<Decimal> {
        match metric_name {
            "spread_bps" | "spread_abs" => self.spread.zscore,
            "basis_bps" | "basis_abs" => self.basis.as_ref().and_then(|b| b.zscore),
            _ => None,
        }
    }
}

/// Parse "depth_{N}bps_total" into N.
fn parse_depth_metric_name(name: &str) -> Option<u32> {
    let rest = name.strip_prefix("depth_")?;
    let bps = rest.strip_suffix("bps_total")?;
    bps.parse().ok()
}

/// One metric observation for the cold store and the detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    /// Metric name (e.g., "spread_bps", "basis_bps", "depth_10bps_total").
    pub metric: String,
    pub venue: Venue,
    pub instrument: String,
    pub timestamp: DateTime<Utc>,
    pub value: Decimal,
    /// None while the z-score engine is warming up or guarded.
    pub zscore: Option<Decimal>,
}

impl MetricSample {
    pub fn new(
        metric: impl Into<String>,
        venue: Venue,
        instrument: impl Into<String>,
        timestamp: DateTime<Utc>,
        value: Decimal,
        zscore: Option<Decimal>,
    ) -> Self {
        Self {
            metric: metric.into(),
            venue,
            instrument: instrument.into(),
            timestamp,
            value,
            zscore,
        }
    }
}
