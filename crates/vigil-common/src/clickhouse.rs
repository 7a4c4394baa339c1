//! ClickHouse client wrapper for the cold store.
//!
//! Provides a type-safe interface for batch inserts and schema management.
//! The cold store is the system of record: every metric sample, alert
//! lifecycle event, and gap marker is appended here.

use std::time::Duration;

use chrono::{DateTime, Utc};
use clickhouse::inserter::Inserter;
use clickhouse::{Client, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::alerts::AlertEvent;
use crate::health::{GapMarker, HealthSnapshot};
use crate::metrics::{BasisMetrics, MetricSample};
use crate::types::{OrderBookSnapshot, TickerSnapshot};

/// Errors that can occur during ClickHouse operations.
#[derive(Debug, Error)]
pub enum ClickHouseError {
    #[error("ClickHouse client error: {0}")]
    Client(#[from] clickhouse::error::Error),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Schema creation failed: {0}")]
    Schema(String),
}

/// Configuration for the ClickHouse client.
#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    /// ClickHouse HTTP URL (e.g., "http://localhost:8123").
    pub url: String,
    /// Database name.
    pub database: String,
    /// Username (optional).
    pub user: Option<String>,
    /// Password (optional).
    pub password: Option<String>,
    /// Maximum rows before auto-commit in inserters.
    pub max_rows: u64,
    /// Maximum bytes before auto-commit in inserters.
    pub max_bytes: u64,
    /// Auto-commit period for inserters.
    pub commit_period: Duration,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_string(),
            database: "vigil".to_string(),
            user: None,
            password: None,
            max_rows: 10_000,
            max_bytes: 10_000_000,
            commit_period: Duration::from_secs(5),
        }
    }
}

// ---------------------------------------------------------------------------
// Cold-store row types
// ---------------------------------------------------------------------------

/// One metric observation, flattened for the `metric_samples` table.
#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct MetricSampleRow {
    pub metric: String,
    pub venue: String,
    pub instrument: String,
    pub timestamp: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::str")]
    pub value: Decimal,
    /// Empty string when the z-score was absent; absence is not zero.
    pub zscore: String,
}

impl From<&MetricSample> for MetricSampleRow {
    fn from(sample: &MetricSample) -> Self {
        Self {
            metric: sample.metric.clone(),
            venue: sample.venue.as_str().to_string(),
            instrument: sample.instrument.clone(),
            timestamp: sample.timestamp,
            value: sample.value,
            zscore: sample.zscore.map(|z| z.to_string()).unwrap_or_default(),
        }
    }
}

/// Top-of-book summary for the `orderbook_snapshots` table.
#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct OrderBookRow {
    pub venue: String,
    pub instrument: String,
    pub timestamp: DateTime<Utc>,
    pub local_timestamp: DateTime<Utc>,
    pub sequence_id: u64,
    #[serde(with = "rust_decimal::serde::str")]
    pub best_bid: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub best_bid_qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub best_ask: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub best_ask_qty: Decimal,
    pub depth_levels: u16,
    pub source: String,
}

impl OrderBookRow {
    /// Flatten a snapshot; both sides must be non-empty.
    pub fn from_snapshot(snapshot: &OrderBookSnapshot) -> Option<Self> {
        Some(Self {
            venue: snapshot.venue.as_str().to_string(),
            instrument: snapshot.instrument.clone(),
            timestamp: snapshot.timestamp,
            local_timestamp: snapshot.local_timestamp,
            sequence_id: snapshot.sequence_id,
            best_bid: snapshot.best_bid()?,
            best_bid_qty: snapshot.best_bid_quantity()?,
            best_ask: snapshot.best_ask()?,
            best_ask_qty: snapshot.best_ask_quantity()?,
            depth_levels: snapshot.depth_levels,
            source: snapshot.source.as_str().to_string(),
        })
    }
}

/// Ticker record for the `ticker_snapshots` table.
#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct TickerRow {
    pub venue: String,
    pub instrument: String,
    pub timestamp: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::str")]
    pub last_price: Decimal,
    pub mark_price: String,
    pub index_price: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume_24h: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume_24h_usd: Decimal,
    pub funding_rate: String,
}

impl From<&TickerSnapshot> for TickerRow {
    fn from(ticker: &TickerSnapshot) -> Self {
        Self {
            venue: ticker.venue.as_str().to_string(),
            instrument: ticker.instrument.clone(),
            timestamp: ticker.timestamp,
            last_price: ticker.last_price,
            mark_price: ticker.mark_price.map(|p| p.to_string()).unwrap_or_default(),
            index_price: ticker
                .index_price
                .map(|p| p.to_string())
                .unwrap_or_default(),
            volume_24h: ticker.volume_24h,
            volume_24h_usd: ticker.volume_24h_usd,
            funding_rate: ticker
                .funding_rate
                .map(|r| r.to_string())
                .unwrap_or_default(),
        }
    }
}

/// Basis record for the `basis_metrics` table.
#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct BasisRow {
    pub venue: String,
    pub instrument: String,
    pub timestamp: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::str")]
    pub basis_abs: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub basis_bps: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub perp_mid: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub spot_mid: Decimal,
    pub zscore: String,
}

impl BasisRow {
    pub fn new(
        venue: &str,
        instrument: &str,
        timestamp: DateTime<Utc>,
        basis: &BasisMetrics,
    ) -> Self {
        Self {
            venue: venue.to_string(),
            instrument: instrument.to_string(),
            timestamp,
            basis_abs: basis.basis_abs,
            basis_bps: basis.basis_bps,
            perp_mid: basis.perp_mid,
            spot_mid: basis.spot_mid,
            zscore: basis.zscore.map(|z| z.to_string()).unwrap_or_default(),
        }
    }
}

/// Alert lifecycle event for the `alert_events` table.
#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct AlertEventRow {
    pub event_kind: String,
    pub event_timestamp: DateTime<Utc>,
    pub alert_id: String,
    pub alert_type: String,
    pub priority: String,
    pub severity: String,
    pub venue: String,
    pub instrument: String,
    pub trigger_metric: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub trigger_value: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub trigger_threshold: Decimal,
    pub comparison: String,
    pub zscore_value: String,
    pub triggered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub duration_seconds: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub peak_value: Decimal,
    pub escalated: u8,
    pub original_priority: String,
    pub resolution_type: String,
    pub resolution_value: String,
}

impl From<&AlertEvent> for AlertEventRow {
    fn from(event: &AlertEvent) -> Self {
        let alert = &event.alert;
        Self {
            event_kind: event.kind.as_str().to_string(),
            event_timestamp: event.timestamp,
            alert_id: alert.alert_id.to_string(),
            alert_type: alert.alert_type.clone(),
            priority: alert.priority.as_str().to_string(),
            severity: alert.severity.as_str().to_string(),
            venue: alert.venue.as_str().to_string(),
            instrument: alert.instrument.clone(),
            trigger_metric: alert.trigger_metric.clone(),
            trigger_value: alert.trigger_value,
            trigger_threshold: alert.trigger_threshold,
            comparison: alert.comparison.as_str().to_string(),
            zscore_value: alert
                .zscore_value
                .map(|z| z.to_string())
                .unwrap_or_default(),
            triggered_at: alert.triggered_at,
            resolved_at: alert.resolved_at,
            duration_seconds: alert.duration_seconds.unwrap_or(0),
            peak_value: alert.peak_value,
            escalated: alert.escalated as u8,
            original_priority: alert
                .original_priority
                .map(|p| p.as_str().to_string())
                .unwrap_or_default(),
            resolution_type: alert
                .resolution_type
                .map(|r| r.as_str().to_string())
                .unwrap_or_default(),
            resolution_value: alert
                .resolution_value
                .map(|v| v.to_string())
                .unwrap_or_default(),
        }
    }
}

/// Gap marker for the `data_gaps` table, used for query-time exclusion of
/// gap periods.
#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct GapRow {
    pub venue: String,
    pub instrument: String,
    pub gap_start: DateTime<Utc>,
    pub gap_end: DateTime<Utc>,
    pub duration_ms: i64,
    pub reason: String,
    pub sequence_before: u64,
    pub sequence_after: u64,
}

impl From<&GapMarker> for GapRow {
    fn from(gap: &GapMarker) -> Self {
        Self {
            venue: gap.venue.as_str().to_string(),
            instrument: gap.instrument.clone(),
            gap_start: gap.gap_start,
            gap_end: gap.gap_end,
            duration_ms: gap.duration_ms,
            reason: gap.reason.as_str().to_string(),
            sequence_before: gap.sequence_before.unwrap_or(0),
            sequence_after: gap.sequence_after.unwrap_or(0),
        }
    }
}

/// Health sample for the `health_snapshots` table.
#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct HealthRow {
    pub venue: String,
    pub timestamp: DateTime<Utc>,
    pub status: String,
    pub message_count: u64,
    pub lag_ms: u64,
    pub reconnect_count: u32,
    pub gaps_last_hour: u32,
}

impl HealthRow {
    pub fn new(health: &HealthSnapshot, timestamp: DateTime<Utc>) -> Self {
        Self {
            venue: health.venue.as_str().to_string(),
            timestamp,
            status: health.status.as_str().to_string(),
            message_count: health.message_count,
            lag_ms: health.lag_ms,
            reconnect_count: health.reconnect_count,
            gaps_last_hour: health.gaps_last_hour,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// ClickHouse client wrapper with type-safe inserters.
#[derive(Clone)]
pub struct ClickHouseClient {
    client: Client,
    config: ClickHouseConfig,
}

impl ClickHouseClient {
    /// Creates a new ClickHouse client with the given configuration.
    pub fn new(config: ClickHouseConfig) -> Self {
        let mut client = Client::default()
            .with_url(&config.url)
            .with_database(&config.database);

        if let Some(ref user) = config.user {
            client = client.with_user(user);
        }
        if let Some(ref password) = config.password {
            client = client.with_password(password);
        }

        Self { client, config }
    }

    /// Creates a client with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ClickHouseConfig::default())
    }

    /// Returns a reference to the underlying clickhouse client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Tests the connection by running a simple query.
    pub async fn ping(&self) -> Result<(), ClickHouseError> {
        self.client
            .query("SELECT 1")
            .fetch_one::<u8>()
            .await
            .map_err(|e| ClickHouseError::Connection(e.to_string()))?;
        Ok(())
    }

    /// Creates all required tables using the embedded schema.
    pub async fn create_tables(&self) -> Result<(), ClickHouseError> {
        let schema = include_str!("schema.sql");

        for statement in schema.split(';') {
            let statement = statement.trim();
            if statement.is_empty() || statement.starts_with("--") {
                continue;
            }

            let non_comment_lines: Vec<&str> = statement
                .lines()
                .filter(|line| !line.trim().starts_with("--") && !line.trim().is_empty())
                .collect();

            if non_comment_lines.is_empty() {
                continue;
            }

            self.client
                .query(statement)
                .execute()
                .await
                .map_err(|e| ClickHouseError::Schema(format!("{}: {}", e, statement)))?;
        }

        Ok(())
    }

    /// Creates an inserter for metric samples with auto-commit configuration.
    pub fn metric_sample_inserter(&self) -> Result<Inserter<MetricSampleRow>, ClickHouseError> {
        self.create_inserter("metric_samples")
    }

    /// Creates an inserter for order book rows with auto-commit configuration.
    pub fn orderbook_inserter(&self) -> Result<Inserter<OrderBookRow>, ClickHouseError> {
        self.create_inserter("orderbook_snapshots")
    }

    /// Creates an inserter for ticker rows with auto-commit configuration.
    pub fn ticker_inserter(&self) -> Result<Inserter<TickerRow>, ClickHouseError> {
        self.create_inserter("ticker_snapshots")
    }

    /// Creates a generic inserter with the configured auto-commit settings.
    fn create_inserter<T>(&self, table: &str) -> Result<Inserter<T>, ClickHouseError>
    where
        T: Row,
    {
        let inserter = self
            .client
            .inserter(table)?
            .with_max_rows(self.config.max_rows)
            .with_max_bytes(self.config.max_bytes)
            .with_period(Some(self.config.commit_period));

        Ok(inserter)
    }

    /// Performs a single batch insert of metric samples.
    pub async fn insert_metric_samples(
        &self,
        rows: &[MetricSampleRow],
    ) -> Result<(), ClickHouseError> {
        self.insert_rows("metric_samples", rows).await
    }

    /// Performs a single batch insert of order book rows.
    pub async fn insert_orderbooks(&self, rows: &[OrderBookRow]) -> Result<(), ClickHouseError> {
        self.insert_rows("orderbook_snapshots", rows).await
    }

    /// Performs a single batch insert of ticker rows.
    pub async fn insert_tickers(&self, rows: &[TickerRow]) -> Result<(), ClickHouseError> {
        self.insert_rows("ticker_snapshots", rows).await
    }

    /// Performs a single batch insert of basis rows.
    pub async fn insert_basis(&self, rows: &[BasisRow]) -> Result<(), ClickHouseError> {
        self.insert_rows("basis_metrics", rows).await
    }

    /// Performs a single batch insert of alert lifecycle events.
    pub async fn insert_alert_events(&self, rows: &[AlertEventRow]) -> Result<(), ClickHouseError> {
        self.insert_rows("alert_events", rows).await
    }

    /// Performs a single batch insert of gap markers.
    pub async fn insert_gaps(&self, rows: &[GapRow]) -> Result<(), ClickHouseError> {
        self.insert_rows("data_gaps", rows).await
    }

    /// Performs a single batch insert of health samples.
    pub async fn insert_health(&self, rows: &[HealthRow]) -> Result<(), ClickHouseError> {
        self.insert_rows("health_snapshots", rows).await
    }

    async fn insert_rows<T>(&self, table: &str, rows: &[T]) -> Result<(), ClickHouseError>
    where
        T: Row + Serialize,
    {
        if rows.is_empty() {
            return Ok(());
        }

        let mut insert = self.client.insert(table)?;
        for row in rows {
            insert.write(row).await?;
        }
        insert.end().await?;
        Ok(())
    }
}
