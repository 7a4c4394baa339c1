//! Cold-store writer: batched, append-only, never silently lossy.
//!
//! Every metric sample, alert lifecycle event, gap marker, and health
//! sample is appended to ClickHouse, the system of record. Writes are
//! batched (defaults 30 rows / 1 s); failures retry with backoff and the
//! batch then lands in an on-disk JSON-lines fallback queue whose depth is
//! reported in health. The input channel is bounded, so a slow cold store
//! applies backpressure all the way to the adapters.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use vigil_common::alerts::AlertEvent;
use vigil_common::clickhouse::{
    AlertEventRow, BasisRow, ClickHouseClient, ClickHouseError, GapRow, HealthRow,
    MetricSampleRow, OrderBookRow, TickerRow,
};
use vigil_common::config::ColdStoreConfig;
use vigil_common::health::{GapMarker, HealthSnapshot};
use vigil_common::metrics::{BasisMetrics, MetricSample};
use vigil_common::types::{OrderBookSnapshot, TickerSnapshot, Venue};

/// One record for the cold store.
#[derive(Debug, Clone)]
pub enum ColdEvent {
    Sample(MetricSample),
    Book(OrderBookSnapshot),
    Ticker(TickerSnapshot),
    Basis {
        venue: Venue,
        instrument: String,
        timestamp: DateTime<Utc>,
        metrics: BasisMetrics,
    },
    Alert(AlertEvent),
    Gap(GapMarker),
    Health(HealthSnapshot, DateTime<Utc>),
}

/// Writer statistics, exposed to the health publisher.
#[derive(Debug, Default)]
pub struct ColdWriterStats {
    pub received: AtomicU64,
    pub written: AtomicU64,
    pub write_errors: AtomicU64,
    pub retries: AtomicU64,
    pub flushes: AtomicU64,
    /// Rows diverted to the on-disk fallback queue.
    pub fallback_rows: AtomicU64,
}

impl ColdWriterStats {
    pub fn fallback_depth(&self) -> u64 {
        self.fallback_rows.load(Ordering::Relaxed)
    }
}

/// Per-table row batches.
#[derive(Debug, Default)]
struct Batches {
    samples: Vec<MetricSampleRow>,
    books: Vec<OrderBookRow>,
    tickers: Vec<TickerRow>,
    basis: Vec<BasisRow>,
    alerts: Vec<AlertEventRow>,
    gaps: Vec<GapRow>,
    health: Vec<HealthRow>,
}

impl Batches {
    fn add(&mut self, event: ColdEvent) {
        match event {
            ColdEvent::Sample(sample) => self.samples.push(MetricSampleRow::from(&sample)),
            ColdEvent::Book(snapshot) => {
                if let Some(row) = OrderBookRow::from_snapshot(&snapshot) {
                    self.books.push(row);
                }
            }
            ColdEvent::Ticker(ticker) => self.tickers.push(TickerRow::from(&ticker)),
            ColdEvent::Basis {
                venue,
                instrument,
                timestamp,
                metrics,
            } => self
                .basis
                .push(BasisRow::new(venue.as_str(), &instrument, timestamp, &metrics)),
            ColdEvent::Alert(event) => self.alerts.push(AlertEventRow::from(&event)),
            ColdEvent::Gap(gap) => self.gaps.push(GapRow::from(&gap)),
            ColdEvent::Health(health, timestamp) => {
                self.health.push(HealthRow::new(&health, timestamp))
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
            + self.books.len()
            + self.tickers.len()
            + self.basis.len()
            + self.alerts.len()
            + self.gaps.len()
            + self.health.len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One table's rows, ready for insertion or fallback.
#[derive(Debug)]
enum RowBatch {
    Samples(Vec<MetricSampleRow>),
    Books(Vec<OrderBookRow>),
    Tickers(Vec<TickerRow>),
    Basis(Vec<BasisRow>),
    Alerts(Vec<AlertEventRow>),
    Gaps(Vec<GapRow>),
    Health(Vec<HealthRow>),
}

impl RowBatch {
    fn table(&self) -> &'static str {
        match self {
            RowBatch::Samples(_) => "metric_samples",
            RowBatch::Books(_) => "orderbook_snapshots",
            RowBatch::Tickers(_) => "ticker_snapshots",
            RowBatch::Basis(_) => "basis_metrics",
            RowBatch::Alerts(_) => "alert_events",
            RowBatch::Gaps(_) => "data_gaps",
            RowBatch::Health(_) => "health_snapshots",
        }
    }

    fn len(&self) -> usize {
        match self {
            RowBatch::Samples(rows) => rows.len(),
            RowBatch::Books(rows) => rows.len(),
            RowBatch::Tickers(rows) => rows.len(),
            RowBatch::Basis(rows) => rows.len(),
            RowBatch::Alerts(rows) => rows.len(),
            RowBatch::Gaps(rows) => rows.len(),
            RowBatch::Health(rows) => rows.len(),
        }
    }
}

/// The cold-store writer task.
pub struct ColdWriter {
    config: ColdStoreConfig,
    client: ClickHouseClient,
    stats: Arc<ColdWriterStats>,
}

impl ColdWriter {
    pub fn new(config: ColdStoreConfig, client: ClickHouseClient) -> Self {
        Self {
            config,
            client,
            stats: Arc::new(ColdWriterStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ColdWriterStats> {
        Arc::clone(&self.stats)
    }

    /// Run until the input channel closes or shutdown is signaled; flushes
    /// whatever is buffered before returning.
    pub async fn run(
        self,
        mut rx: mpsc::Receiver<ColdEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(
            batch_size = self.config.batch_size,
            flush_interval_ms = self.config.flush_interval.as_millis(),
            "Cold-store writer started"
        );

        let mut batches = Batches::default();
        let mut flush_timer = interval(self.config.flush_interval);
        flush_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(event) => {
                            self.stats.received.fetch_add(1, Ordering::Relaxed);
                            batches.add(event);
                            if batches.len() >= self.config.batch_size {
                                self.flush(&mut batches).await;
                            }
                        }
                        None => {
                            info!("Cold input closed, performing final flush");
                            self.flush(&mut batches).await;
                            break;
                        }
                    }
                }

                _ = flush_timer.tick() => {
                    if !batches.is_empty() {
                        self.flush(&mut batches).await;
                    }
                }

                _ = shutdown.recv() => {
                    // Upstream stages stop on the same signal and drop
                    // their senders; keep consuming until the bus closes
                    // so nothing in flight is lost.
                    info!("Shutdown signal received, draining cold input until close");
                    while let Some(event) = rx.recv().await {
                        self.stats.received.fetch_add(1, Ordering::Relaxed);
                        batches.add(event);
                        if batches.len() >= self.config.batch_size {
                            self.flush(&mut batches).await;
                        }
                    }
                    self.flush(&mut batches).await;
                    break;
                }
            }
        }

        info!(
            written = self.stats.written.load(Ordering::Relaxed),
            fallback_rows = self.stats.fallback_rows.load(Ordering::Relaxed),
            write_errors = self.stats.write_errors.load(Ordering::Relaxed),
            "Cold-store writer stopped"
        );
    }

    async fn flush(&self, batches: &mut Batches) {
        if batches.is_empty() {
            return;
        }
        self.stats.flushes.fetch_add(1, Ordering::Relaxed);

        let mut pending = vec![
            RowBatch::Samples(std::mem::take(&mut batches.samples)),
            RowBatch::Books(std::mem::take(&mut batches.books)),
            RowBatch::Tickers(std::mem::take(&mut batches.tickers)),
            RowBatch::Basis(std::mem::take(&mut batches.basis)),
            RowBatch::Alerts(std::mem::take(&mut batches.alerts)),
            RowBatch::Gaps(std::mem::take(&mut batches.gaps)),
            RowBatch::Health(std::mem::take(&mut batches.health)),
        ];

        for batch in pending.drain(..) {
            self.write_with_retry(batch).await;
        }
    }

    /// Write one table's batch with retry; exhausted retries divert the
    /// batch to the fallback queue. Nothing is dropped silently.
    async fn write_with_retry(&self, batch: RowBatch) {
        let rows = batch.len();
        if rows == 0 {
            return;
        }
        let table = batch.table();

        let mut delay = self.config.retry_initial_delay;
        for attempt in 0..=self.config.retry_max_attempts {
            match self.insert(&batch).await {
                Ok(()) => {
                    self.stats.written.fetch_add(rows as u64, Ordering::Relaxed);
                    debug!(table, rows, "Cold batch written");
                    return;
                }
                Err(e) => {
                    self.stats.write_errors.fetch_add(1, Ordering::Relaxed);
                    if attempt < self.config.retry_max_attempts {
                        self.stats.retries.fetch_add(1, Ordering::Relaxed);
                        warn!(table, error = %e, attempt, "Cold write failed, retrying");
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    } else {
                        error!(
                            table,
                            error = %e,
                            rows,
                            "Cold write failed after retries, diverting to fallback queue"
                        );
                        self.divert_to_fallback(&batch);
                    }
                }
            }
        }
    }

    async fn insert(&self, batch: &RowBatch) -> Result<(), ClickHouseError> {
        match batch {
            RowBatch::Samples(rows) => self.client.insert_metric_samples(rows).await,
            RowBatch::Books(rows) => self.client.insert_orderbooks(rows).await,
            RowBatch::Tickers(rows) => self.client.insert_tickers(rows).await,
            RowBatch::Basis(rows) => self.client.insert_basis(rows).await,
            RowBatch::Alerts(rows) => self.client.insert_alert_events(rows).await,
            RowBatch::Gaps(rows) => self.client.insert_gaps(rows).await,
            RowBatch::Health(rows) => self.client.insert_health(rows).await,
        }
    }

    fn divert_to_fallback(&self, batch: &RowBatch) {
        match batch {
            RowBatch::Samples(rows) => self.append_fallback(batch.table(), rows),
            RowBatch::Books(rows) => self.append_fallback(batch.table(), rows),
            RowBatch::Tickers(rows) => self.append_fallback(batch.table(), rows),
            RowBatch::Basis(rows) => self.append_fallback(batch.table(), rows),
            RowBatch::Alerts(rows) => self.append_fallback(batch.table(), rows),
            RowBatch::Gaps(rows) => self.append_fallback(batch.table(), rows),
            RowBatch::Health(rows) => self.append_fallback(batch.table(), rows),
        }
    }

    fn append_fallback<T: Serialize>(&self, table: &str, rows: &[T]) {
        match append_fallback_rows(&self.config.fallback_path, table, rows) {
            Ok(count) => {
                self.stats
                    .fallback_rows
                    .fetch_add(count as u64, Ordering::Relaxed);
            }
            Err(e) => {
                // Last line of defense failed; this is as loud as it gets.
                error!(table, error = %e, "Fallback queue write failed");
            }
        }
    }
}

/// Append rows to the JSON-lines fallback queue, one envelope per line.
fn append_fallback_rows<T: Serialize>(
    path: &PathBuf,
    table: &str,
    rows: &[T],
) -> std::io::Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    let mut count = 0;
    for row in rows {
        let line = json!({ "table": table, "row": row });
        writeln!(file, "{}", line)?;
        count += 1;
    }
    file.flush()?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use vigil_common::health::{ConnectionStatus, GapReason};
    use vigil_common::types::PriceLevel;
    use vigil_common::types::SnapshotSource;

    fn sample() -> MetricSample {
        MetricSample::new(
            "spread_bps",
            Venue::Binance,
            "BTC-USDT-PERP",
            Utc::now(),
            dec!(1.5),
            None,
        )
    }

    #[test]
    fn test_batches_accumulate_by_table() {
        let mut batches = Batches::default();
        assert!(batches.is_empty());

        batches.add(ColdEvent::Sample(sample()));
        batches.add(ColdEvent::Gap(GapMarker::new(
            Venue::Okx,
            "BTC-USDT-PERP",
            Utc::now(),
            Utc::now(),
            GapReason::Duplicate,
            Some(1),
            Some(1),
        )));
        batches.add(ColdEvent::Health(
            HealthSnapshot {
                venue: Venue::Binance,
                status: ConnectionStatus::Connected,
                last_message_at: Some(Utc::now()),
                message_count: 10,
                lag_ms: 5,
                reconnect_count: 0,
                gaps_last_hour: 0,
            },
            Utc::now(),
        ));

        assert_eq!(batches.len(), 3);
        assert_eq!(batches.samples.len(), 1);
        assert_eq!(batches.gaps.len(), 1);
        assert_eq!(batches.health.len(), 1);
    }

    #[test]
    fn test_one_sided_book_is_not_batched() {
        let mut batches = Batches::default();
        batches.add(ColdEvent::Book(OrderBookSnapshot {
            venue: Venue::Binance,
            instrument: "BTC-USDT-PERP".to_string(),
            timestamp: Utc::now(),
            local_timestamp: Utc::now(),
            sequence_id: 1,
            bids: vec![PriceLevel::new(dec!(49999), dec!(1))],
            asks: Vec::new(),
            depth_levels: 20,
            source: SnapshotSource::Stream,
        }));
        assert!(batches.is_empty());
    }

    #[test]
    fn test_fallback_queue_append() {
        let dir = std::env::temp_dir().join(format!("vigil-fallback-{}", std::process::id()));
        let path = dir.join("cold-fallback.jsonl");
        let _ = std::fs::remove_file(&path);

        let rows = vec![MetricSampleRow::from(&sample()), MetricSampleRow::from(&sample())];
        let count = append_fallback_rows(&path, "metric_samples", &rows).unwrap();
        assert_eq!(count, 2);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let envelope: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(envelope["table"], "metric_samples");
        assert_eq!(envelope["row"]["metric"], "spread_bps");

        // Appending grows the queue rather than replacing it
        append_fallback_rows(&path, "metric_samples", &rows).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 4);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_stats_defaults() {
        let stats = ColdWriterStats::default();
        assert_eq!(stats.fallback_depth(), 0);
        assert_eq!(stats.received.load(Ordering::Relaxed), 0);
    }
}
