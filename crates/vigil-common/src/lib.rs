//! Shared types and utilities for the vigil market-quality surveillance pipeline.
//!
//! This crate contains:
//! - Normalized market data types (order books, tickers)
//! - Computed metrics types (spread, depth, basis, imbalance)
//! - Alert model (definitions, thresholds, lifecycle)
//! - Health and data-gap types
//! - Frozen runtime configuration
//! - ClickHouse client wrapper and cold-store row types
//!
//! CRITICAL: All prices, quantities, and metric values use
//! `rust_decimal::Decimal`. NEVER use f64 on any path that can reach an
//! alert.

pub mod alerts;
pub mod clickhouse;
pub mod config;
pub mod health;
pub mod metrics;
pub mod types;

pub use alerts::{
    Alert, AlertDefinition, AlertEvent, AlertEventKind, AlertPriority, AlertSeverity, Comparison,
    ConditionKey, Evaluation, ResolutionType, SkipReason, ThresholdSpec,
};
pub use clickhouse::{ClickHouseClient, ClickHouseConfig, ClickHouseError};
pub use config::{Config, ConfigError};
pub use health::{ConnectionStatus, GapMarker, GapReason, HealthSnapshot, ZScoreStatus};
pub use metrics::{
    AggregatedMetrics, BasisMetrics, CrossVenueMetrics, DepthMetrics, DepthWindow,
    ImbalanceMetrics, MetricSample, SpreadMetrics,
};
pub use types::{
    BookSide, BookValidationError, InstrumentKind, OrderBookSnapshot, PriceLevel, SnapshotSource,
    TickerSnapshot, Venue,
};
