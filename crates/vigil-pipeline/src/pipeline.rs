//! Task wiring and supervision.
//!
//! Data flow: venue adapters -> snapshot bus -> (hot-state writes |
//! metrics engine) -> metrics bus -> (cold writer | anomaly detector) ->
//! (alert projections | dispatcher). Each stage is one long-running task
//! reading a bounded channel; hot-state writes drop on overflow while
//! cold-store sends apply backpressure.
//!
//! Shutdown is graceful: adapters close sockets, the buses drain through
//! the engine and detector into the cold store, writers flush, and a hard
//! deadline aborts whatever remains.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::interval;
use tracing::{error, info, warn};

use vigil_common::clickhouse::ClickHouseClient;
use vigil_common::config::{Config, ConfigError};
use vigil_common::health::{GapMarker, HealthSnapshot};
use vigil_common::metrics::MetricSample;
use vigil_detect::{AlertManager, ChannelDispatcher};
use vigil_ingest::adapter::{AdapterError, AdapterEvent, VenueAdapter};
use vigil_metrics::MetricsEngine;

use crate::cold::{ColdEvent, ColdWriter, ColdWriterStats};
use crate::hot::{spawn_hot_writer, HotStore, HotWriter, HotWriterStats, InMemoryHotStore};

/// Alerts active longer than this are resolved by the timeout policy.
const STALE_ALERT_MAX_AGE: Duration = Duration::from_secs(4 * 3600);

/// Fatal pipeline errors, mapped to process exit codes.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Exit code 1.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Exit code 2: a required dependency was unavailable at startup.
    #[error("dependency unavailable: {0}")]
    Dependency(String),

    /// Exit code 3: unrecoverable I/O past the retry budget.
    #[error("unrecoverable i/o: {0}")]
    Io(String),
}

impl PipelineError {
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::Config(_) => 1,
            PipelineError::Dependency(_) => 2,
            PipelineError::Io(_) => 3,
        }
    }
}

impl From<AdapterError> for PipelineError {
    fn from(e: AdapterError) -> Self {
        PipelineError::Io(e.to_string())
    }
}

/// Messages on the metrics bus.
#[derive(Debug)]
pub enum MetricsMsg {
    Samples(Vec<MetricSample>),
    Gap(GapMarker),
}

/// The composed pipeline.
pub struct Pipeline {
    config: Config,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run until the shutdown broadcast fires, then drain and flush.
    pub async fn run(self, shutdown: broadcast::Sender<()>) -> Result<(), PipelineError> {
        let config = self.config;

        // Cold store is a startup dependency: the system of record must be
        // reachable before anything streams.
        let client = ClickHouseClient::new(config.cold_store.clickhouse.clone());
        client
            .ping()
            .await
            .map_err(|e| PipelineError::Dependency(format!("clickhouse: {}", e)))?;
        client
            .create_tables()
            .await
            .map_err(|e| PipelineError::Dependency(format!("clickhouse schema: {}", e)))?;
        info!("Cold store reachable, schema ensured");

        // Hot store and its single writer task.
        let hot_store: Arc<InMemoryHotStore> =
            Arc::new(InMemoryHotStore::new(config.hot_store.update_topic_capacity));
        let (hot, hot_handle) = spawn_hot_writer(
            Arc::clone(&hot_store) as Arc<dyn HotStore>,
            config.hot_store.buffer_capacity,
            config.features.zscore_window,
            config.hot_store.dedup_ttl,
            shutdown.subscribe(),
        );

        // Cold writer task fed by a bounded bus (backpressure).
        let (cold_tx, cold_rx) = mpsc::channel::<ColdEvent>(config.channels.storage_bus);
        let cold_writer = ColdWriter::new(config.cold_store.clone(), client);
        let cold_stats = cold_writer.stats();
        let cold_handle = tokio::spawn(cold_writer.run(cold_rx, shutdown.subscribe()));

        // Snapshot bus shared by every adapter.
        let (snapshot_tx, snapshot_rx) = mpsc::channel::<AdapterEvent>(config.channels.snapshot_bus);

        let mut adapter_handles = Vec::new();
        let mut health_rxs: Vec<watch::Receiver<HealthSnapshot>> = Vec::new();
        for venue_config in &config.venues {
            let instruments = config.instruments_for(venue_config.venue);
            if instruments.is_empty() {
                warn!(venue = %venue_config.venue, "No instruments configured; adapter skipped");
                continue;
            }
            let (adapter, health_rx) = VenueAdapter::new(
                venue_config.clone(),
                &instruments,
                &config.features,
                snapshot_tx.clone(),
            )?;
            info!(venue = %venue_config.venue, instruments = instruments.len(), "Adapter starting");
            health_rxs.push(health_rx);
            adapter_handles.push(tokio::spawn(adapter.run(shutdown.subscribe())));
        }
        // The snapshot bus closes once every adapter has stopped.
        drop(snapshot_tx);

        if adapter_handles.is_empty() {
            return Err(PipelineError::Config(ConfigError::Invalid(
                "no adapters could be started".to_string(),
            )));
        }

        // Metrics engine task.
        let (metrics_tx, metrics_rx) = mpsc::channel::<MetricsMsg>(config.channels.metrics_bus);
        let engine = MetricsEngine::new(
            config.features.clone(),
            config.basis_pairs.clone(),
            config.cross_venue_pairs.clone(),
        );
        let tracked_metrics = config.features.zscore_metrics.clone();
        let metrics_handle = tokio::spawn(metrics_task(
            engine,
            snapshot_rx,
            metrics_tx,
            hot.clone(),
            cold_tx.clone(),
            tracked_metrics,
        ));

        // Detector task: recover lifecycle state from the hot projection,
        // then own the alert maps exclusively.
        let mut manager = AlertManager::new(
            config.alerts.clone(),
            config.features.reset_on_gap,
            true,
        );
        manager.seed_active(hot_store.active_alerts());
        let dispatcher = ChannelDispatcher::console_only();
        let detector_handle = tokio::spawn(detector_task(
            manager,
            dispatcher,
            metrics_rx,
            hot.clone(),
            cold_tx.clone(),
        ));

        // Health publisher.
        let health_handle = tokio::spawn(health_task(
            health_rxs,
            hot.clone(),
            cold_tx.clone(),
            hot.stats(),
            Arc::clone(&cold_stats),
            shutdown.subscribe(),
        ));
        drop(cold_tx);
        drop(hot);

        info!("Pipeline running");

        // Graceful drain with a hard deadline.
        let drain = async {
            for handle in adapter_handles {
                let _ = handle.await;
            }
            let _ = metrics_handle.await;
            let _ = detector_handle.await;
            let _ = health_handle.await;
            let _ = cold_handle.await;
            let _ = hot_handle.await;
        };

        match tokio::time::timeout(config.shutdown.drain_deadline, drain).await {
            Ok(()) => info!("Pipeline drained cleanly"),
            Err(_) => {
                error!(
                    deadline_secs = config.shutdown.drain_deadline.as_secs(),
                    "Drain deadline exceeded; aborting remaining tasks"
                );
            }
        }

        if cold_stats.fallback_depth() > 0 {
            warn!(
                fallback_rows = cold_stats.fallback_depth(),
                "Cold store fallback queue is non-empty"
            );
        }

        Ok(())
    }
}

/// Metrics engine stage: consumes the snapshot bus, owns the z-score
/// states, feeds the metrics bus and both stores.
pub async fn metrics_task(
    mut engine: MetricsEngine,
    mut rx: mpsc::Receiver<AdapterEvent>,
    metrics_tx: mpsc::Sender<MetricsMsg>,
    hot: HotWriter,
    cold: mpsc::Sender<ColdEvent>,
    tracked_metrics: Vec<String>,
) {
    let mut status_timer = interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else {
                    info!("Snapshot bus closed; metrics stage stopping");
                    break;
                };
                match event {
                    AdapterEvent::Book(snapshot) => {
                        // Hot write is fire-and-forget; cold write applies
                        // backpressure.
                        hot.write_orderbook(&snapshot);
                        if cold.send(ColdEvent::Book(snapshot.clone())).await.is_err() {
                            break;
                        }

                        let update = engine.on_book(&snapshot);

                        for emit in &update.basis {
                            let event = ColdEvent::Basis {
                                venue: emit.venue,
                                instrument: emit.perp_instrument.clone(),
                                timestamp: emit.timestamp,
                                metrics: emit.metrics.clone(),
                            };
                            if cold.send(event).await.is_err() {
                                return;
                            }
                        }

                        for sample in &update.samples {
                            if tracked_metrics.iter().any(|m| *m == sample.metric) {
                                hot.push_zscore_sample(
                                    sample.venue,
                                    &sample.instrument,
                                    &sample.metric,
                                    &sample.value,
                                );
                            }
                        }

                        if !update.samples.is_empty()
                            && metrics_tx
                                .send(MetricsMsg::Samples(update.samples))
                                .await
                                .is_err()
                        {
                            break;
                        }
                    }
                    AdapterEvent::Ticker(ticker) => {
                        if cold.send(ColdEvent::Ticker(ticker.clone())).await.is_err() {
                            break;
                        }
                        let samples = engine.on_ticker(&ticker);
                        if !samples.is_empty()
                            && metrics_tx.send(MetricsMsg::Samples(samples)).await.is_err()
                        {
                            break;
                        }
                    }
                    AdapterEvent::Gap(gap) => {
                        engine.on_gap(&gap);
                        // Gap markers go to both stores on creation.
                        hot.write_gap(&gap);
                        if cold.send(ColdEvent::Gap(gap.clone())).await.is_err() {
                            break;
                        }
                        if metrics_tx.send(MetricsMsg::Gap(gap)).await.is_err() {
                            break;
                        }
                    }
                }
            }

            _ = status_timer.tick() => {
                hot.write_zscore_current(&engine.zscore_statuses());
            }
        }
    }
}

/// Detector stage: consumes the metrics bus, owns the alert lifecycle,
/// projects lifecycle events and dispatches notifications.
pub async fn detector_task(
    mut manager: AlertManager,
    dispatcher: ChannelDispatcher,
    mut rx: mpsc::Receiver<MetricsMsg>,
    hot: HotWriter,
    cold: mpsc::Sender<ColdEvent>,
) {
    // Single monotonic timer drives escalation and timeout resolution.
    let mut tick = interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            message = rx.recv() => {
                let Some(message) = message else {
                    info!("Metrics bus closed; detector stopping");
                    break;
                };
                match message {
                    MetricsMsg::Samples(samples) => {
                        for sample in samples {
                            if cold.send(ColdEvent::Sample(sample.clone())).await.is_err() {
                                return;
                            }
                            let now = Utc::now();
                            for event in manager.process_sample(&sample, now) {
                                if publish_event(&hot, &cold, &dispatcher, event).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    MetricsMsg::Gap(gap) => {
                        manager.on_gap(&gap);
                    }
                }
            }

            _ = tick.tick() => {
                let now = Utc::now();
                let mut events = manager.check_escalations(now);
                events.extend(manager.resolve_stale(STALE_ALERT_MAX_AGE, now));
                for event in events {
                    if publish_event(&hot, &cold, &dispatcher, event).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

async fn publish_event(
    hot: &HotWriter,
    cold: &mpsc::Sender<ColdEvent>,
    dispatcher: &ChannelDispatcher,
    event: vigil_common::alerts::AlertEvent,
) -> Result<(), ()> {
    hot.write_alert_event(&event);
    dispatcher.dispatch(&event);
    cold.send(ColdEvent::Alert(event)).await.map_err(|_| ())
}

/// Health publisher: samples adapter watch channels and writer statistics
/// once per second into both stores.
pub async fn health_task(
    health_rxs: Vec<watch::Receiver<HealthSnapshot>>,
    hot: HotWriter,
    cold: mpsc::Sender<ColdEvent>,
    hot_stats: Arc<HotWriterStats>,
    cold_stats: Arc<ColdWriterStats>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut tick = interval(Duration::from_secs(1));
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                ticks += 1;
                let degraded = hot_stats.is_degraded();
                let fallback_depth = cold_stats.fallback_depth();
                for rx in &health_rxs {
                    let snapshot = rx.borrow().clone();
                    hot.write_health(&snapshot, degraded, fallback_depth);
                    if cold.send(ColdEvent::Health(snapshot, Utc::now())).await.is_err() {
                        return;
                    }
                }
                // Periodic operator-facing summary.
                if ticks % 30 == 0 {
                    info!(
                        hot_dropped = hot_stats.dropped_count(),
                        cold_fallback_rows = cold_stats.fallback_depth(),
                        "Storage health"
                    );
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}
