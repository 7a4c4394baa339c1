//! Metrics engine for the vigil surveillance pipeline.
//!
//! Pure, synchronous, allocation-light computation of microstructure
//! metrics from normalized snapshots. All math is `Decimal`; nothing here
//! suspends or does I/O.
//!
//! ## Modules
//!
//! - `spread`: spread and mid-price
//! - `depth`: depth-at-N-bps and imbalance
//! - `basis`: perp/spot basis and cross-venue divergence pairing
//! - `zscore`: rolling z-score with warmup and reset guards
//! - `engine`: per-snapshot aggregation and z-score state ownership

pub mod basis;
pub mod depth;
pub mod engine;
pub mod spread;
pub mod zscore;

pub use basis::{BasisCalculator, BasisEmit, CrossVenueCalculator};
pub use engine::{MetricsEngine, MetricsUpdate};
pub use zscore::ZScoreCalculator;
