//! Runtime configuration.
//!
//! Four documents (venues, instruments, alerts, features) are loaded from a
//! single TOML file into a validated, frozen [`Config`]. The pipeline never
//! watches files; configuration changes are deliberate restarts.
//!
//! Connection strings for the stores and the log level can be overridden
//! with environment variables (`CLICKHOUSE_URL`, `CLICKHOUSE_HTTP_PORT`,
//! `CLICKHOUSE_DATABASE`, `CLICKHOUSE_USER`, `CLICKHOUSE_PASSWORD`,
//! `LOG_LEVEL`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use crate::alerts::{AlertDefinition, AlertPriority, AlertSeverity, Comparison, ThresholdSpec};
use crate::clickhouse::ClickHouseConfig;
use crate::types::{InstrumentKind, Venue};

/// Errors raised while loading or validating configuration.
///
/// Any of these is fatal at startup (exit code 1).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse TOML config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Reconnection backoff parameters.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Attempts before the adapter enters degraded mode.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 10,
        }
    }
}

/// Per-venue connection configuration.
#[derive(Debug, Clone)]
pub struct VenueConfig {
    pub venue: Venue,
    pub ws_url: String,
    pub rest_url: String,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub connect_timeout: Duration,
    pub backoff: BackoffConfig,
    pub rate_limit_per_second: u32,
    /// REST polling cadence while degraded.
    pub rest_poll_interval: Duration,
}

/// Venue-specific symbol and stream names for one instrument.
#[derive(Debug, Clone)]
pub struct VenueSymbol {
    pub venue: Venue,
    pub symbol: String,
    pub book_stream: Option<String>,
    pub ticker_stream: Option<String>,
    pub mark_price_stream: Option<String>,
}

/// One monitored instrument.
#[derive(Debug, Clone)]
pub struct InstrumentConfig {
    /// Normalized id (e.g., "BTC-USDT-PERP").
    pub id: String,
    pub kind: InstrumentKind,
    pub depth_levels: u16,
    pub enabled: bool,
    pub symbols: Vec<VenueSymbol>,
}

impl InstrumentConfig {
    pub fn is_perpetual(&self) -> bool {
        self.kind == InstrumentKind::Perpetual
    }

    pub fn symbol_for(&self, venue: Venue) -> Option<&VenueSymbol> {
        self.symbols.iter().find(|s| s.venue == venue)
    }
}

/// A perp/spot pair tracked for basis.
#[derive(Debug, Clone)]
pub struct BasisPair {
    pub venue: Venue,
    pub perp_instrument: String,
    pub spot_instrument: String,
}

/// Same instrument watched on two venues for divergence.
#[derive(Debug, Clone)]
pub struct CrossVenuePair {
    pub instrument: String,
    pub venue_a: Venue,
    pub venue_b: Venue,
}

/// Alert definitions plus per-instrument thresholds.
#[derive(Debug, Clone, Default)]
pub struct AlertsConfig {
    pub definitions: HashMap<String, AlertDefinition>,
    /// instrument id (or "*") -> alert type -> thresholds.
    pub thresholds: HashMap<String, HashMap<String, ThresholdSpec>>,
}

impl AlertsConfig {
    /// Resolve the threshold for (instrument, alert_type): exact instrument
    /// first, `*` wildcard fallback.
    pub fn resolve_threshold(&self, instrument: &str, alert_type: &str) -> Option<&ThresholdSpec> {
        if let Some(spec) = self
            .thresholds
            .get(instrument)
            .and_then(|by_type| by_type.get(alert_type))
        {
            return Some(spec);
        }
        self.thresholds
            .get("*")
            .and_then(|by_type| by_type.get(alert_type))
    }
}

/// Statistical and gap-handling feature flags.
#[derive(Debug, Clone)]
pub struct FeatureConfig {
    pub zscore_window: usize,
    pub zscore_min_samples: usize,
    pub zscore_min_std: Decimal,
    pub warmup_log_interval: Duration,
    /// Gaps at least this long reset the affected z-score states.
    pub reset_on_gap: Duration,
    /// Message silence before a timeout gap is recognized.
    pub silence_gap: Duration,
    pub depth_bps_levels: Vec<u32>,
    /// Both legs of a pair must be fresher than this for basis emission.
    pub pair_staleness: Duration,
    /// Metrics tracked by the z-score engine.
    pub zscore_metrics: Vec<String>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            zscore_window: 300,
            zscore_min_samples: 30,
            zscore_min_std: Decimal::new(1, 4),
            warmup_log_interval: Duration::from_secs(30),
            reset_on_gap: Duration::from_secs(5),
            silence_gap: Duration::from_secs(5),
            depth_bps_levels: vec![5, 10, 25],
            pair_staleness: Duration::from_secs(5),
            zscore_metrics: vec![
                "spread_bps".to_string(),
                "basis_bps".to_string(),
                "cross_venue_divergence_bps".to_string(),
            ],
        }
    }
}

/// Bounded channel capacities between pipeline stages.
#[derive(Debug, Clone)]
pub struct ChannelCapacities {
    pub snapshot_bus: usize,
    pub metrics_bus: usize,
    pub storage_bus: usize,
}

impl Default for ChannelCapacities {
    fn default() -> Self {
        Self {
            snapshot_bus: 1024,
            metrics_bus: 1024,
            storage_bus: 4096,
        }
    }
}

/// Hot-state store tuning.
#[derive(Debug, Clone)]
pub struct HotStoreConfig {
    /// Writer queue size; oldest entries are dropped on overflow.
    pub buffer_capacity: usize,
    /// Pub/sub topic capacity for UI invalidations.
    pub update_topic_capacity: usize,
    /// TTL applied to throttle marker keys.
    pub dedup_ttl: Duration,
}

impl Default for HotStoreConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 8192,
            update_topic_capacity: 1024,
            dedup_ttl: Duration::from_secs(300),
        }
    }
}

/// Cold-store writer tuning.
#[derive(Debug, Clone)]
pub struct ColdStoreConfig {
    pub clickhouse: ClickHouseConfig,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub retry_initial_delay: Duration,
    pub retry_max_attempts: u32,
    /// JSON-lines fallback queue written when retries are exhausted.
    pub fallback_path: PathBuf,
}

impl Default for ColdStoreConfig {
    fn default() -> Self {
        Self {
            clickhouse: ClickHouseConfig::default(),
            batch_size: 30,
            flush_interval: Duration::from_secs(1),
            retry_initial_delay: Duration::from_millis(500),
            retry_max_attempts: 3,
            fallback_path: PathBuf::from("data/cold-fallback.jsonl"),
        }
    }
}

/// Shutdown behavior.
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Hard deadline for the graceful drain.
    pub drain_deadline: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_deadline: Duration::from_secs(30),
        }
    }
}

/// The complete, validated, frozen runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub venues: Vec<VenueConfig>,
    pub instruments: Vec<InstrumentConfig>,
    pub basis_pairs: Vec<BasisPair>,
    pub cross_venue_pairs: Vec<CrossVenuePair>,
    pub alerts: AlertsConfig,
    pub features: FeatureConfig,
    pub channels: ChannelCapacities,
    pub hot_store: HotStoreConfig,
    pub cold_store: ColdStoreConfig,
    pub shutdown: ShutdownConfig,
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: TomlFile = toml::from_str(content)?;
        let config = Config::try_from(file)?;
        config.validate()?;
        Ok(config)
    }

    pub fn venue(&self, venue: Venue) -> Option<&VenueConfig> {
        self.venues.iter().find(|v| v.venue == venue)
    }

    pub fn instrument(&self, id: &str) -> Option<&InstrumentConfig> {
        self.instruments.iter().find(|i| i.id == id)
    }

    /// Enabled instruments that have a symbol mapping for `venue`.
    pub fn instruments_for(&self, venue: Venue) -> Vec<&InstrumentConfig> {
        self.instruments
            .iter()
            .filter(|i| i.enabled && i.symbol_for(venue).is_some())
            .collect()
    }

    /// Restrict the run to a subset of configured venues (CLI override).
    ///
    /// Pair metrics that reference a deselected venue are dropped with it.
    pub fn apply_venue_override(&mut self, venues: &[String]) -> Result<(), ConfigError> {
        let mut selected = Vec::with_capacity(venues.len());
        for name in venues {
            let venue = Venue::parse(name)
                .ok_or_else(|| ConfigError::Invalid(format!("unknown venue: {}", name)))?;
            if self.venue(venue).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "venue {} is not configured",
                    venue
                )));
            }
            selected.push(venue);
        }
        if selected.is_empty() {
            return Err(ConfigError::Invalid(
                "venue override selects no venues".to_string(),
            ));
        }

        self.venues.retain(|v| selected.contains(&v.venue));
        self.basis_pairs.retain(|p| selected.contains(&p.venue));
        self.cross_venue_pairs
            .retain(|p| selected.contains(&p.venue_a) && selected.contains(&p.venue_b));
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.venues.is_empty() {
            return Err(ConfigError::Invalid("no venues configured".to_string()));
        }
        if self.instruments.iter().filter(|i| i.enabled).count() == 0 {
            return Err(ConfigError::Invalid(
                "no enabled instruments configured".to_string(),
            ));
        }

        for instrument in &self.instruments {
            for symbol in &instrument.symbols {
                if self.venue(symbol.venue).is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "instrument {} references unconfigured venue {}",
                        instrument.id, symbol.venue
                    )));
                }
            }
        }

        for (instrument, by_type) in &self.alerts.thresholds {
            if instrument != "*" && self.instrument(instrument).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "threshold references unknown instrument {}",
                    instrument
                )));
            }
            for (alert_type, spec) in by_type {
                let Some(definition) = self.alerts.definitions.get(alert_type) else {
                    return Err(ConfigError::Invalid(format!(
                        "threshold references unknown alert type {}",
                        alert_type
                    )));
                };
                if definition.requires_zscore && spec.enabled && spec.zscore_threshold.is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "alert type {} requires a z-score threshold for {}",
                        alert_type, instrument
                    )));
                }
            }
        }

        if self.features.zscore_window < self.features.zscore_min_samples {
            return Err(ConfigError::Invalid(format!(
                "zscore window ({}) must be >= min samples ({})",
                self.features.zscore_window, self.features.zscore_min_samples
            )));
        }

        for pair in &self.basis_pairs {
            for (role, id) in [
                ("perp", &pair.perp_instrument),
                ("spot", &pair.spot_instrument),
            ] {
                if self.instrument(id).is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "basis pair references unknown {} instrument {}",
                        role, id
                    )));
                }
            }
        }

        for pair in &self.cross_venue_pairs {
            if self.instrument(&pair.instrument).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "cross-venue pair references unknown instrument {}",
                    pair.instrument
                )));
            }
            if pair.venue_a == pair.venue_b {
                return Err(ConfigError::Invalid(format!(
                    "cross-venue pair for {} compares {} with itself",
                    pair.instrument, pair.venue_a
                )));
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TOML file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TomlFile {
    general: GeneralToml,
    venues: Vec<VenueToml>,
    instruments: Vec<InstrumentToml>,
    basis_pairs: Vec<BasisPairToml>,
    cross_venue_pairs: Vec<CrossVenuePairToml>,
    alerts: AlertsToml,
    features: FeaturesToml,
    channels: ChannelsToml,
    hot_store: HotStoreToml,
    cold_store: ColdStoreToml,
    shutdown: ShutdownToml,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GeneralToml {
    log_level: String,
}

impl Default for GeneralToml {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct VenueToml {
    name: String,
    ws_url: String,
    rest_url: String,
    ping_interval_secs: u64,
    pong_timeout_secs: u64,
    connect_timeout_secs: u64,
    initial_reconnect_delay_ms: u64,
    max_reconnect_delay_ms: u64,
    max_reconnect_attempts: u32,
    rate_limit_per_second: u32,
    rest_poll_interval_ms: u64,
}

impl Default for VenueToml {
    fn default() -> Self {
        Self {
            name: String::new(),
            ws_url: String::new(),
            rest_url: String::new(),
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
            connect_timeout_secs: 10,
            initial_reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 60_000,
            max_reconnect_attempts: 10,
            rate_limit_per_second: 10,
            rest_poll_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct InstrumentToml {
    id: String,
    kind: String,
    depth_levels: Option<u16>,
    enabled: Option<bool>,
    symbols: Vec<VenueSymbolToml>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct VenueSymbolToml {
    venue: String,
    symbol: String,
    book_stream: Option<String>,
    ticker_stream: Option<String>,
    mark_price_stream: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct BasisPairToml {
    venue: String,
    perp: String,
    spot: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct CrossVenuePairToml {
    instrument: String,
    venue_a: String,
    venue_b: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct AlertsToml {
    definitions: Vec<AlertDefinitionToml>,
    thresholds: Vec<ThresholdToml>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct AlertDefinitionToml {
    alert_type: String,
    name: String,
    metric: String,
    priority: String,
    severity: String,
    comparison: String,
    requires_zscore: bool,
    persistence_seconds: Option<u64>,
    throttle_seconds: Option<u64>,
    escalation_seconds: Option<u64>,
    escalates_to: Option<String>,
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ThresholdToml {
    alert_type: String,
    /// Instrument id or "*".
    instrument: String,
    threshold: String,
    zscore_threshold: Option<String>,
    priority: Option<String>,
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct FeaturesToml {
    zscore_window: usize,
    zscore_min_samples: usize,
    zscore_min_std: String,
    warmup_log_interval_secs: u64,
    reset_on_gap_secs: u64,
    silence_gap_secs: u64,
    depth_bps_levels: Vec<u32>,
    pair_staleness_secs: u64,
    zscore_metrics: Vec<String>,
}

impl Default for FeaturesToml {
    fn default() -> Self {
        let defaults = FeatureConfig::default();
        Self {
            zscore_window: defaults.zscore_window,
            zscore_min_samples: defaults.zscore_min_samples,
            zscore_min_std: defaults.zscore_min_std.to_string(),
            warmup_log_interval_secs: defaults.warmup_log_interval.as_secs(),
            reset_on_gap_secs: defaults.reset_on_gap.as_secs(),
            silence_gap_secs: defaults.silence_gap.as_secs(),
            depth_bps_levels: defaults.depth_bps_levels,
            pair_staleness_secs: defaults.pair_staleness.as_secs(),
            zscore_metrics: defaults.zscore_metrics,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ChannelsToml {
    snapshot_bus: usize,
    metrics_bus: usize,
    storage_bus: usize,
}

impl Default for ChannelsToml {
    fn default() -> Self {
        let defaults = ChannelCapacities::default();
        Self {
            snapshot_bus: defaults.snapshot_bus,
            metrics_bus: defaults.metrics_bus,
            storage_bus: defaults.storage_bus,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct HotStoreToml {
    buffer_capacity: usize,
    update_topic_capacity: usize,
    dedup_ttl_secs: u64,
}

impl Default for HotStoreToml {
    fn default() -> Self {
        let defaults = HotStoreConfig::default();
        Self {
            buffer_capacity: defaults.buffer_capacity,
            update_topic_capacity: defaults.update_topic_capacity,
            dedup_ttl_secs: defaults.dedup_ttl.as_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ColdStoreToml {
    url: String,
    database: String,
    batch_size: usize,
    flush_interval_ms: u64,
    retry_initial_delay_ms: u64,
    retry_max_attempts: u32,
    fallback_path: String,
}

impl Default for ColdStoreToml {
    fn default() -> Self {
        let defaults = ColdStoreConfig::default();
        Self {
            url: defaults.clickhouse.url,
            database: defaults.clickhouse.database,
            batch_size: defaults.batch_size,
            flush_interval_ms: defaults.flush_interval.as_millis() as u64,
            retry_initial_delay_ms: defaults.retry_initial_delay.as_millis() as u64,
            retry_max_attempts: defaults.retry_max_attempts,
            fallback_path: defaults.fallback_path.to_string_lossy().into_owned(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ShutdownToml {
    drain_deadline_secs: u64,
}

impl Default for ShutdownToml {
    fn default() -> Self {
        Self {
            drain_deadline_secs: ShutdownConfig::default().drain_deadline.as_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

fn parse_venue(s: &str) -> Result<Venue, ConfigError> {
    Venue::parse(s).ok_or_else(|| ConfigError::Invalid(format!("unknown venue: {}", s)))
}

fn parse_decimal(s: &str, what: &str) -> Result<Decimal, ConfigError> {
    s.parse()
        .map_err(|_| ConfigError::Invalid(format!("invalid decimal for {}: {}", what, s)))
}

/// Build ClickHouse config from TOML, then override with environment
/// variables.
fn build_clickhouse_config(toml: &ColdStoreToml) -> ClickHouseConfig {
    let mut url = toml.url.clone();
    let mut database = toml.database.clone();
    let mut user = None;
    let mut password = None;

    if let Ok(host) = std::env::var("CLICKHOUSE_URL") {
        let port = std::env::var("CLICKHOUSE_HTTP_PORT").unwrap_or_else(|_| "8123".to_string());
        url = format!("http://{}:{}", host, port);
    }
    if let Ok(db) = std::env::var("CLICKHOUSE_DATABASE") {
        database = db;
    }
    if let Ok(u) = std::env::var("CLICKHOUSE_USER") {
        user = Some(u);
    }
    if let Ok(p) = std::env::var("CLICKHOUSE_PASSWORD") {
        password = Some(p);
    }

    ClickHouseConfig {
        url,
        database,
        user,
        password,
        ..ClickHouseConfig::default()
    }
}

impl TryFrom<TomlFile> for Config {
    type Error = ConfigError;

    fn try_from(file: TomlFile) -> Result<Self, ConfigError> {
        let mut venues = Vec::with_capacity(file.venues.len());
        for v in &file.venues {
            venues.push(VenueConfig {
                venue: parse_venue(&v.name)?,
                ws_url: v.ws_url.clone(),
                rest_url: v.rest_url.clone(),
                ping_interval: Duration::from_secs(v.ping_interval_secs),
                pong_timeout: Duration::from_secs(v.pong_timeout_secs),
                connect_timeout: Duration::from_secs(v.connect_timeout_secs),
                backoff: BackoffConfig {
                    initial_delay: Duration::from_millis(v.initial_reconnect_delay_ms),
                    max_delay: Duration::from_millis(v.max_reconnect_delay_ms),
                    max_attempts: v.max_reconnect_attempts,
                },
                rate_limit_per_second: v.rate_limit_per_second,
                rest_poll_interval: Duration::from_millis(v.rest_poll_interval_ms),
            });
        }

        let mut instruments = Vec::with_capacity(file.instruments.len());
        for i in &file.instruments {
            let kind = match i.kind.to_lowercase().as_str() {
                "spot" => InstrumentKind::Spot,
                "perpetual" | "perp" => InstrumentKind::Perpetual,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "unknown instrument kind: {}",
                        other
                    )))
                }
            };
            let mut symbols = Vec::with_capacity(i.symbols.len());
            for s in &i.symbols {
                symbols.push(VenueSymbol {
                    venue: parse_venue(&s.venue)?,
                    symbol: s.symbol.clone(),
                    book_stream: s.book_stream.clone(),
                    ticker_stream: s.ticker_stream.clone(),
                    mark_price_stream: s.mark_price_stream.clone(),
                });
            }
            instruments.push(InstrumentConfig {
                id: i.id.clone(),
                kind,
                depth_levels: i.depth_levels.unwrap_or(20),
                enabled: i.enabled.unwrap_or(true),
                symbols,
            });
        }

        let mut basis_pairs = Vec::with_capacity(file.basis_pairs.len());
        for p in &file.basis_pairs {
            basis_pairs.push(BasisPair {
                venue: parse_venue(&p.venue)?,
                perp_instrument: p.perp.clone(),
                spot_instrument: p.spot.clone(),
            });
        }

        let mut cross_venue_pairs = Vec::with_capacity(file.cross_venue_pairs.len());
        for p in &file.cross_venue_pairs {
            cross_venue_pairs.push(CrossVenuePair {
                instrument: p.instrument.clone(),
                venue_a: parse_venue(&p.venue_a)?,
                venue_b: parse_venue(&p.venue_b)?,
            });
        }

        let mut definitions = HashMap::new();
        for d in &file.alerts.definitions {
            let priority = AlertPriority::parse(&d.priority).ok_or_else(|| {
                ConfigError::Invalid(format!("unknown priority: {}", d.priority))
            })?;
            let severity = AlertSeverity::parse(&d.severity).ok_or_else(|| {
                ConfigError::Invalid(format!("unknown severity: {}", d.severity))
            })?;
            let comparison = Comparison::parse(&d.comparison).ok_or_else(|| {
                ConfigError::Invalid(format!("unknown comparison: {}", d.comparison))
            })?;
            definitions.insert(
                d.alert_type.clone(),
                AlertDefinition {
                    alert_type: d.alert_type.clone(),
                    name: d.name.clone(),
                    metric_name: d.metric.clone(),
                    default_priority: priority,
                    default_severity: severity,
                    comparison,
                    requires_zscore: d.requires_zscore,
                    persistence_seconds: d.persistence_seconds,
                    throttle_seconds: d.throttle_seconds.unwrap_or(60),
                    escalation_seconds: d.escalation_seconds,
                    escalates_to: d.escalates_to.clone(),
                    enabled: d.enabled.unwrap_or(true),
                },
            );
        }

        let mut thresholds: HashMap<String, HashMap<String, ThresholdSpec>> = HashMap::new();
        for t in &file.alerts.thresholds {
            let threshold = parse_decimal(&t.threshold, "threshold")?;
            let zscore_threshold = t
                .zscore_threshold
                .as_deref()
                .map(|z| parse_decimal(z, "zscore_threshold"))
                .transpose()?;
            let priority_override = t
                .priority
                .as_deref()
                .map(|p| {
                    AlertPriority::parse(p)
                        .ok_or_else(|| ConfigError::Invalid(format!("unknown priority: {}", p)))
                })
                .transpose()?;
            thresholds.entry(t.instrument.clone()).or_default().insert(
                t.alert_type.clone(),
                ThresholdSpec {
                    threshold,
                    zscore_threshold,
                    priority_override,
                    enabled: t.enabled.unwrap_or(true),
                },
            );
        }

        let features = FeatureConfig {
            zscore_window: file.features.zscore_window,
            zscore_min_samples: file.features.zscore_min_samples,
            zscore_min_std: parse_decimal(&file.features.zscore_min_std, "zscore_min_std")?,
            warmup_log_interval: Duration::from_secs(file.features.warmup_log_interval_secs),
            reset_on_gap: Duration::from_secs(file.features.reset_on_gap_secs),
            silence_gap: Duration::from_secs(file.features.silence_gap_secs),
            depth_bps_levels: file.features.depth_bps_levels.clone(),
            pair_staleness: Duration::from_secs(file.features.pair_staleness_secs),
            zscore_metrics: file.features.zscore_metrics.clone(),
        };

        let log_level = std::env::var("LOG_LEVEL").unwrap_or(file.general.log_level);

        Ok(Config {
            log_level,
            venues,
            instruments,
            basis_pairs,
            cross_venue_pairs,
            alerts: AlertsConfig {
                definitions,
                thresholds,
            },
            features,
            channels: ChannelCapacities {
                snapshot_bus: file.channels.snapshot_bus,
                metrics_bus: file.channels.metrics_bus,
                storage_bus: file.channels.storage_bus,
            },
            hot_store: HotStoreConfig {
                buffer_capacity: file.hot_store.buffer_capacity,
                update_topic_capacity: file.hot_store.update_topic_capacity,
                dedup_ttl: Duration::from_secs(file.hot_store.dedup_ttl_secs),
            },
            cold_store: ColdStoreConfig {
                clickhouse: build_clickhouse_config(&file.cold_store),
                batch_size: file.cold_store.batch_size,
                flush_interval: Duration::from_millis(file.cold_store.flush_interval_ms),
                retry_initial_delay: Duration::from_millis(file.cold_store.retry_initial_delay_ms),
                retry_max_attempts: file.cold_store.retry_max_attempts,
                fallback_path: PathBuf::from(&file.cold_store.fallback_path),
            },
            shutdown: ShutdownConfig {
                drain_deadline: Duration::from_secs(file.shutdown.drain_deadline_secs),
            },
        })
    }
}
