//! Hot-state store: overwrite-wins projection of the latest pipeline
//! state, read directly by the external UI.
//!
//! The key layout is part of the external contract and must stay
//! bit-exact:
//!
//! | Key pattern | Shape |
//! |---|---|
//! | `orderbook:{venue}:{instrument}` | field map |
//! | `zscore:{venue}:{instrument}:{metric}` | rolling sequence |
//! | `zscore:current:{venue}:{instrument}` | field map |
//! | `alerts:active:{alert_id}` | field map |
//! | `alerts:by_instrument:{instrument}` | id set |
//! | `alerts:by_priority:{P1\|P2\|P3}` | id set |
//! | `alerts:dedup:{type}:{venue}:{instrument}` | string with TTL |
//! | `health:{venue}` | field map |
//!
//! Writes are best-effort: the pipeline enqueues fire-and-forget, a single
//! writer task applies them, the bounded buffer drops oldest on overflow,
//! and a `hot_store_degraded` signal is raised in health. A pub/sub topic
//! carries an invalidation for every applied write.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use vigil_common::alerts::{Alert, AlertEvent, AlertEventKind};
use vigil_common::health::{GapMarker, HealthSnapshot, ZScoreStatus};
use vigil_common::types::OrderBookSnapshot;

/// Key construction for the external contract.
pub mod keys {
    use vigil_common::alerts::AlertPriority;
    use vigil_common::types::Venue;

    pub fn orderbook(venue: Venue, instrument: &str) -> String {
        format!("orderbook:{}:{}", venue, instrument)
    }

    pub fn zscore_buffer(venue: Venue, instrument: &str, metric: &str) -> String {
        format!("zscore:{}:{}:{}", venue, instrument, metric)
    }

    pub fn zscore_current(venue: Venue, instrument: &str) -> String {
        format!("zscore:current:{}:{}", venue, instrument)
    }

    pub fn alert_active(alert_id: &str) -> String {
        format!("alerts:active:{}", alert_id)
    }

    pub fn alerts_by_instrument(instrument: &str) -> String {
        format!("alerts:by_instrument:{}", instrument)
    }

    pub fn alerts_by_priority(priority: AlertPriority) -> String {
        format!("alerts:by_priority:{}", priority)
    }

    pub fn alert_dedup(alert_type: &str, venue: Venue, instrument: &str) -> String {
        format!("alerts:dedup:{}:{}:{}", alert_type, venue, instrument)
    }

    pub fn health(venue: Venue) -> String {
        format!("health:{}", venue)
    }

    /// Recent gap markers per venue. Additive to the contract table; the
    /// UI's health panel reads it for the gap history strip.
    pub fn gaps_recent(venue: Venue) -> String {
        format!("gaps:recent:{}", venue)
    }
}

/// A stored record.
#[derive(Debug, Clone)]
pub enum HotRecord {
    /// JSON object of fields; overwrite wins.
    Fields(Value),
    /// Rolling sequence, newest last.
    Sequence(Vec<String>),
    /// Unordered member set.
    Set(HashSet<String>),
    /// String with an expiry (throttle markers).
    Ttl {
        value: String,
        expires_at: DateTime<Utc>,
    },
}

/// Invalidation published after every applied write.
#[derive(Debug, Clone)]
pub struct HotUpdate {
    pub key: String,
}

/// Abstract hot-state sink. The in-process implementation below is the
/// default; a remote key-value store satisfies the same contract.
pub trait HotStore: Send + Sync {
    fn put_fields(&self, key: &str, fields: Value);
    fn push_sequence(&self, key: &str, value: String, max_len: usize);
    fn set_add(&self, key: &str, member: String);
    fn set_remove(&self, key: &str, member: &str);
    fn put_ttl(&self, key: &str, value: String, ttl: Duration);
    fn delete(&self, key: &str);
    fn get(&self, key: &str) -> Option<HotRecord>;
    fn subscribe(&self) -> broadcast::Receiver<HotUpdate>;
}

/// In-process hot store backed by a RwLock map with a broadcast topic.
pub struct InMemoryHotStore {
    records: RwLock<HashMap<String, HotRecord>>,
    updates: broadcast::Sender<HotUpdate>,
}

impl InMemoryHotStore {
    pub fn new(update_topic_capacity: usize) -> Self {
        let (updates, _) = broadcast::channel(update_topic_capacity.max(1));
        Self {
            records: RwLock::new(HashMap::new()),
            updates,
        }
    }

    fn publish(&self, key: &str) {
        let _ = self.updates.send(HotUpdate {
            key: key.to_string(),
        });
    }

    /// All active alerts currently projected (startup recovery).
    pub fn active_alerts(&self) -> Vec<Alert> {
        let records = self.records.read().expect("hot store lock");
        records
            .iter()
            .filter(|(key, _)| key.starts_with("alerts:active:"))
            .filter_map(|(_, record)| match record {
                HotRecord::Fields(fields) => serde_json::from_value(fields.clone()).ok(),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().expect("hot store lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HotStore for InMemoryHotStore {
    fn put_fields(&self, key: &str, fields: Value) {
        self.records
            .write()
            .expect("hot store lock")
            .insert(key.to_string(), HotRecord::Fields(fields));
        self.publish(key);
    }

    fn push_sequence(&self, key: &str, value: String, max_len: usize) {
        let mut records = self.records.write().expect("hot store lock");
        let entry = records
            .entry(key.to_string())
            .or_insert_with(|| HotRecord::Sequence(Vec::new()));
        if let HotRecord::Sequence(sequence) = entry {
            sequence.push(value);
            if sequence.len() > max_len {
                let excess = sequence.len() - max_len;
                sequence.drain(..excess);
            }
        }
        drop(records);
        self.publish(key);
    }

    fn set_add(&self, key: &str, member: String) {
        let mut records = self.records.write().expect("hot store lock");
        let entry = records
            .entry(key.to_string())
            .or_insert_with(|| HotRecord::Set(HashSet::new()));
        if let HotRecord::Set(set) = entry {
            set.insert(member);
        }
        drop(records);
        self.publish(key);
    }

    fn set_remove(&self, key: &str, member: &str) {
        let mut records = self.records.write().expect("hot store lock");
        if let Some(HotRecord::Set(set)) = records.get_mut(key) {
            set.remove(member);
            if set.is_empty() {
                records.remove(key);
            }
        }
        drop(records);
        self.publish(key);
    }

    fn put_ttl(&self, key: &str, value: String, ttl: Duration) {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(300));
        self.records.write().expect("hot store lock").insert(
            key.to_string(),
            HotRecord::Ttl { value, expires_at },
        );
        self.publish(key);
    }

    fn delete(&self, key: &str) {
        self.records.write().expect("hot store lock").remove(key);
        self.publish(key);
    }

    fn get(&self, key: &str) -> Option<HotRecord> {
        let records = self.records.read().expect("hot store lock");
        match records.get(key) {
            Some(HotRecord::Ttl { expires_at, .. }) if *expires_at <= Utc::now() => None,
            record => record.cloned(),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<HotUpdate> {
        self.updates.subscribe()
    }
}

/// One write command for the writer task.
#[derive(Debug)]
enum HotCommand {
    PutFields { key: String, fields: Value },
    PushSequence { key: String, value: String, max_len: usize },
    SetAdd { key: String, member: String },
    SetRemove { key: String, member: String },
    PutTtl { key: String, value: String, ttl: Duration },
    Delete { key: String },
}

/// Writer statistics for the health projection.
#[derive(Debug, Default)]
pub struct HotWriterStats {
    pub enqueued: AtomicU64,
    pub applied: AtomicU64,
    pub dropped: AtomicU64,
    pub degraded: AtomicBool,
}

impl HotWriterStats {
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Fire-and-forget handle used by pipeline stages. Never blocks; overflow
/// drops the write and raises the degraded signal.
#[derive(Clone)]
pub struct HotWriter {
    tx: mpsc::Sender<HotCommand>,
    stats: Arc<HotWriterStats>,
    /// Rolling z-score buffer length mirrored into the store.
    zscore_buffer_len: usize,
    dedup_ttl: Duration,
}

impl HotWriter {
    pub fn stats(&self) -> Arc<HotWriterStats> {
        Arc::clone(&self.stats)
    }

    /// Project the latest order book.
    pub fn write_orderbook(&self, snapshot: &OrderBookSnapshot) {
        let (Some(bid), Some(ask)) = (snapshot.best_bid(), snapshot.best_ask()) else {
            return;
        };
        self.enqueue(HotCommand::PutFields {
            key: keys::orderbook(snapshot.venue, &snapshot.instrument),
            fields: json!({
                "venue": snapshot.venue.as_str(),
                "instrument": snapshot.instrument,
                "timestamp": snapshot.timestamp.to_rfc3339(),
                "local_timestamp": snapshot.local_timestamp.to_rfc3339(),
                "sequence_id": snapshot.sequence_id,
                "best_bid": bid.to_string(),
                "best_ask": ask.to_string(),
                "bid_levels": snapshot.bids.len(),
                "ask_levels": snapshot.asks.len(),
                "source": snapshot.source.as_str(),
            }),
        });
    }

    /// Append one z-score observation to the rolling buffer.
    pub fn push_zscore_sample(
        &self,
        venue: vigil_common::types::Venue,
        instrument: &str,
        metric: &str,
        value: &rust_decimal::Decimal,
    ) {
        self.enqueue(HotCommand::PushSequence {
            key: keys::zscore_buffer(venue, instrument, metric),
            value: value.to_string(),
            max_len: self.zscore_buffer_len,
        });
    }

    /// Project the latest z-score values and warmup status per instrument.
    pub fn write_zscore_current(&self, statuses: &[ZScoreStatus]) {
        let mut by_instrument: HashMap<(vigil_common::types::Venue, &str), Vec<&ZScoreStatus>> =
            HashMap::new();
        for status in statuses {
            by_instrument
                .entry((status.venue, status.instrument.as_str()))
                .or_default()
                .push(status);
        }
        for ((venue, instrument), group) in by_instrument {
            let mut fields = serde_json::Map::new();
            for status in group {
                fields.insert(
                    status.metric.clone(),
                    json!({
                        "warmed_up": status.warmed_up,
                        "sample_count": status.sample_count,
                        "min_samples": status.min_samples,
                        "progress_pct": status.progress_pct.to_string(),
                    }),
                );
            }
            self.enqueue(HotCommand::PutFields {
                key: keys::zscore_current(venue, instrument),
                fields: Value::Object(fields),
            });
        }
    }

    /// Project one alert lifecycle event into the alert keys.
    pub fn write_alert_event(&self, event: &AlertEvent) {
        let alert = &event.alert;
        let id = alert.alert_id.to_string();

        match event.kind {
            AlertEventKind::Triggered => {
                self.enqueue(HotCommand::PutFields {
                    key: keys::alert_active(&id),
                    fields: serde_json::to_value(alert).unwrap_or(Value::Null),
                });
                self.enqueue(HotCommand::SetAdd {
                    key: keys::alerts_by_instrument(&alert.instrument),
                    member: id.clone(),
                });
                self.enqueue(HotCommand::SetAdd {
                    key: keys::alerts_by_priority(alert.priority),
                    member: id.clone(),
                });
                self.enqueue(HotCommand::PutTtl {
                    key: keys::alert_dedup(&alert.alert_type, alert.venue, &alert.instrument),
                    value: id,
                    ttl: self.dedup_ttl,
                });
            }
            AlertEventKind::Escalated => {
                self.enqueue(HotCommand::PutFields {
                    key: keys::alert_active(&id),
                    fields: serde_json::to_value(alert).unwrap_or(Value::Null),
                });
                if let Some(original) = alert.original_priority {
                    self.enqueue(HotCommand::SetRemove {
                        key: keys::alerts_by_priority(original),
                        member: id.clone(),
                    });
                }
                self.enqueue(HotCommand::SetAdd {
                    key: keys::alerts_by_priority(alert.priority),
                    member: id,
                });
            }
            AlertEventKind::Resolved => {
                self.enqueue(HotCommand::Delete {
                    key: keys::alert_active(&id),
                });
                self.enqueue(HotCommand::SetRemove {
                    key: keys::alerts_by_instrument(&alert.instrument),
                    member: id.clone(),
                });
                self.enqueue(HotCommand::SetRemove {
                    key: keys::alerts_by_priority(alert.priority),
                    member: id,
                });
            }
        }
    }

    /// Append a gap marker to the venue's recent-gaps sequence.
    pub fn write_gap(&self, gap: &GapMarker) {
        let Ok(serialized) = serde_json::to_string(gap) else {
            return;
        };
        self.enqueue(HotCommand::PushSequence {
            key: keys::gaps_recent(gap.venue),
            value: serialized,
            max_len: 100,
        });
    }

    /// Project per-venue health, including both storage degradation
    /// signals.
    pub fn write_health(
        &self,
        health: &HealthSnapshot,
        hot_store_degraded: bool,
        cold_fallback_depth: u64,
    ) {
        self.enqueue(HotCommand::PutFields {
            key: keys::health(health.venue),
            fields: json!({
                "venue": health.venue.as_str(),
                "status": health.status.as_str(),
                "last_message_at": health.last_message_at.map(|at| at.to_rfc3339()),
                "message_count": health.message_count,
                "lag_ms": health.lag_ms,
                "reconnect_count": health.reconnect_count,
                "gaps_last_hour": health.gaps_last_hour,
                "hot_store_degraded": hot_store_degraded,
                "cold_fallback_depth": cold_fallback_depth,
            }),
        });
    }

    fn enqueue(&self, command: HotCommand) {
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        if self.tx.try_send(command).is_err() {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            self.stats.degraded.store(true, Ordering::Relaxed);
        }
    }
}

/// Spawn the single writer task for a hot store.
///
/// The internal buffer is bounded; when the store cannot keep up the
/// oldest pending writes are dropped (latest state is recomputable from
/// the next snapshot) and the degraded signal stays raised.
pub fn spawn_hot_writer(
    store: Arc<dyn HotStore>,
    buffer_capacity: usize,
    zscore_buffer_len: usize,
    dedup_ttl: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> (HotWriter, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<HotCommand>(buffer_capacity.max(1));
    let stats = Arc::new(HotWriterStats::default());
    let writer = HotWriter {
        tx,
        stats: Arc::clone(&stats),
        zscore_buffer_len,
        dedup_ttl,
    };

    let handle = tokio::spawn(async move {
        info!(buffer_capacity, "Hot-state writer started");
        let mut pending: VecDeque<HotCommand> = VecDeque::new();

        loop {
            tokio::select! {
                command = rx.recv() => {
                    match command {
                        Some(command) => {
                            pending.push_back(command);
                            if pending.len() > buffer_capacity {
                                pending.pop_front();
                                stats.dropped.fetch_add(1, Ordering::Relaxed);
                                stats.degraded.store(true, Ordering::Relaxed);
                            }
                            while let Some(command) = pending.pop_front() {
                                apply(&*store, command, &stats);
                            }
                        }
                        None => {
                            while let Some(command) = pending.pop_front() {
                                apply(&*store, command, &stats);
                            }
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    // Writers upstream stop on the same signal; consume
                    // until every handle is dropped, then stop.
                    while let Some(command) = rx.recv().await {
                        apply(&*store, command, &stats);
                    }
                    while let Some(command) = pending.pop_front() {
                        apply(&*store, command, &stats);
                    }
                    break;
                }
            }
        }

        info!(
            applied = stats.applied.load(Ordering::Relaxed),
            dropped = stats.dropped.load(Ordering::Relaxed),
            "Hot-state writer stopped"
        );
    });

    (writer, handle)
}

fn apply(store: &dyn HotStore, command: HotCommand, stats: &HotWriterStats) {
    match command {
        HotCommand::PutFields { key, fields } => store.put_fields(&key, fields),
        HotCommand::PushSequence { key, value, max_len } => {
            store.push_sequence(&key, value, max_len)
        }
        HotCommand::SetAdd { key, member } => store.set_add(&key, member),
        HotCommand::SetRemove { key, member } => store.set_remove(&key, &member),
        HotCommand::PutTtl { key, value, ttl } => store.put_ttl(&key, value, ttl),
        HotCommand::Delete { key } => {
            debug!(key = %key, "Hot delete");
            store.delete(&key)
        }
    }
    stats.applied.fetch_add(1, Ordering::Relaxed);
}
