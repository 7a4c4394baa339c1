//! The metrics engine: per-snapshot aggregation and z-score ownership.
//!
//! One engine instance is owned by a single task. Z-score states are keyed
//! by (metric, venue, instrument), created lazily on first sample, cleared
//! on qualifying gaps, and destroyed on unsubscribe. Everything here is
//! synchronous; the engine never suspends.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use vigil_common::config::{BasisPair, CrossVenuePair, FeatureConfig};
use vigil_common::health::{GapMarker, ZScoreStatus};
use vigil_common::metrics::{AggregatedMetrics, CrossVenueMetrics, MetricSample};
use vigil_common::types::{OrderBookSnapshot, TickerSnapshot, Venue};

use crate::basis::{BasisCalculator, BasisEmit, CrossVenueCalculator};
use crate::depth::{compute_depth, compute_imbalance};
use crate::spread::compute_spread;
use crate::zscore::ZScoreCalculator;

type ZKey = (String, Venue, String);

/// Everything produced for one input snapshot.
#[derive(Debug, Default)]
pub struct MetricsUpdate {
    /// Complete per-snapshot package; None for invalid/empty books.
    pub aggregated: Option<AggregatedMetrics>,
    /// Flattened samples for the cold store and the detector.
    pub samples: Vec<MetricSample>,
    /// Basis emissions (may belong to a different instrument than the
    /// snapshot that triggered them).
    pub basis: Vec<BasisEmit>,
    /// Cross-venue divergence emissions.
    pub cross: Vec<CrossVenueMetrics>,
}

/// Derives microstructure metrics from normalized snapshots.
pub struct MetricsEngine {
    features: FeatureConfig,
    /// Depth window used for the imbalance metric.
    imbalance_reference_bps: u32,
    zscores: HashMap<ZKey, ZScoreCalculator>,
    basis: BasisCalculator,
    cross: CrossVenueCalculator,
}

impl MetricsEngine {
    pub fn new(
        features: FeatureConfig,
        basis_pairs: Vec<BasisPair>,
        cross_venue_pairs: Vec<CrossVenuePair>,
    ) -> Self {
        let imbalance_reference_bps = features
            .depth_bps_levels
            .iter()
            .copied()
            .find(|bps| *bps == 10)
            .or_else(|| features.depth_bps_levels.first().copied())
            .unwrap_or(10);

        let basis = BasisCalculator::new(basis_pairs, features.pair_staleness);
        let cross = CrossVenueCalculator::new(cross_venue_pairs, features.pair_staleness);

        Self {
            features,
            imbalance_reference_bps,
            zscores: HashMap::new(),
            basis,
            cross,
        }
    }

    /// Process one order book snapshot.
    pub fn on_book(&mut self, snapshot: &OrderBookSnapshot) -> MetricsUpdate {
        let mut update = MetricsUpdate::default();

        // Empty or one-sided books produce no metrics at all.
        let Some(mut spread) = compute_spread(snapshot) else {
            debug!(
                venue = %snapshot.venue,
                instrument = %snapshot.instrument,
                "Snapshot without both sides, no metrics"
            );
            return update;
        };
        let Some(depth) = compute_depth(snapshot, &self.features.depth_bps_levels) else {
            return update;
        };

        let timestamp = snapshot.local_timestamp;
        let venue = snapshot.venue;
        let instrument = snapshot.instrument.clone();

        spread.zscore =
            self.track("spread_bps", venue, &instrument, spread.spread_bps, timestamp);

        let imbalance = compute_imbalance(snapshot, Some(&depth), self.imbalance_reference_bps);

        update.samples.push(MetricSample::new(
            "spread_bps",
            venue,
            &instrument,
            timestamp,
            spread.spread_bps,
            spread.zscore,
        ));
        update.samples.push(MetricSample::new(
            "spread_abs",
            venue,
            &instrument,
            timestamp,
            spread.spread_abs,
            None,
        ));
        update.samples.push(MetricSample::new(
            "mid_price",
            venue,
            &instrument,
            timestamp,
            spread.mid_price,
            None,
        ));
        for window in &depth.windows {
            update.samples.push(MetricSample::new(
                format!("depth_{}bps_total", window.bps),
                venue,
                &instrument,
                timestamp,
                window.total,
                None,
            ));
        }
        if let Some(value) = imbalance.depth_window {
            update.samples.push(MetricSample::new(
                "imbalance",
                venue,
                &instrument,
                timestamp,
                value,
                None,
            ));
        }

        // Pair metrics fire on either leg's update.
        let mut own_basis = None;
        for mut emit in self.basis.update(venue, &instrument, spread.mid_price, timestamp) {
            emit.metrics.zscore = self.track(
                "basis_bps",
                emit.venue,
                &emit.perp_instrument,
                emit.metrics.basis_bps,
                timestamp,
            );
            update.samples.push(MetricSample::new(
                "basis_bps",
                emit.venue,
                &emit.perp_instrument,
                timestamp,
                emit.metrics.basis_bps,
                emit.metrics.zscore,
            ));
            update.samples.push(MetricSample::new(
                "basis_abs",
                emit.venue,
                &emit.perp_instrument,
                timestamp,
                emit.metrics.basis_abs,
                None,
            ));
            if emit.perp_instrument == instrument {
                own_basis = Some(emit.metrics.clone());
            }
            update.basis.push(emit);
        }

        for mut metrics in self.cross.update(snapshot) {
            metrics.zscore = self.track(
                "cross_venue_divergence_bps",
                metrics.venue_a,
                &metrics.instrument,
                metrics.divergence_bps,
                timestamp,
            );
            update.samples.push(MetricSample::new(
                "cross_venue_divergence_bps",
                metrics.venue_a,
                &metrics.instrument,
                timestamp,
                metrics.divergence_bps,
                metrics.zscore,
            ));
            update.cross.push(metrics);
        }

        update.aggregated = Some(AggregatedMetrics {
            venue,
            instrument,
            timestamp,
            spread,
            depth,
            imbalance,
            basis: own_basis,
        });

        update
    }

    /// Process one ticker snapshot (mark-index deviation).
    pub fn on_ticker(&mut self, ticker: &TickerSnapshot) -> Vec<MetricSample> {
        let mut samples = Vec::new();
        if let Some(deviation) = ticker.mark_index_deviation_bps() {
            let zscore = self.track(
                "mark_index_deviation_bps",
                ticker.venue,
                &ticker.instrument,
                deviation,
                ticker.local_timestamp,
            );
            samples.push(MetricSample::new(
                "mark_index_deviation_bps",
                ticker.venue,
                &ticker.instrument,
                ticker.local_timestamp,
                deviation,
                zscore,
            ));
        }
        samples
    }

    /// React to a gap marker: gaps at or above the reset threshold clear
    /// every z-score state for the affected (venue, instrument).
    pub fn on_gap(&mut self, gap: &GapMarker) {
        if !gap.exceeds_secs(self.features.reset_on_gap.as_secs()) {
            return;
        }
        for ((metric, venue, instrument), calculator) in self.zscores.iter_mut() {
            if *venue == gap.venue && *instrument == gap.instrument {
                calculator.reset(gap.reason.as_str());
                debug!(metric = %metric, venue = %venue, instrument = %instrument, "Gap reset");
            }
        }
    }

    /// Destroy all state for an instrument (unsubscribe).
    pub fn drop_instrument(&mut self, venue: Venue, instrument: &str) {
        self.zscores
            .retain(|(_, v, i), _| !(*v == venue && i == instrument));
        self.basis.forget(venue, instrument);
    }

    /// Warmup status projection for every live z-score state.
    pub fn zscore_statuses(&self) -> Vec<ZScoreStatus> {
        self.zscores
            .iter()
            .map(|((metric, venue, instrument), calc)| ZScoreStatus {
                metric: metric.clone(),
                venue: *venue,
                instrument: instrument.clone(),
                warmed_up: calc.is_warmed_up(),
                sample_count: calc.sample_count(),
                min_samples: calc.min_samples(),
                progress_pct: calc.progress_pct(),
            })
            .collect()
    }

    /// Append to the series' z-score state if the metric is statistically
    /// tracked; untracked metrics get no state at all.
    fn track(
        &mut self,
        metric: &str,
        venue: Venue,
        instrument: &str,
        value: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Option<Decimal> {
        if !self.features.zscore_metrics.iter().any(|m| m == metric) {
            return None;
        }

        let key = (metric.to_string(), venue, instrument.to_string());
        let features = &self.features;
        let calculator = self.zscores.entry(key).or_insert_with(|| {
            ZScoreCalculator::new(
                format!("{}:{}:{}", metric, venue, instrument),
                features.zscore_window,
                features.zscore_min_samples,
                features.zscore_min_std,
                features.warmup_log_interval,
            )
        });
        calculator.add_sample(value, timestamp)
    }
}
