//! Alert model: definitions, thresholds, evaluation results, and the alert
//! lifecycle (pending -> active -> escalated? -> resolved).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Venue;

/// Alert priority levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertPriority {
    /// Critical, immediate action required.
    P1,
    /// Warning, investigate soon; may escalate to P1.
    P2,
    /// Informational, no action required.
    P3,
}

impl AlertPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertPriority::P1 => "P1",
            AlertPriority::P2 => "P2",
            AlertPriority::P3 => "P3",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "P1" => Some(AlertPriority::P1),
            "P2" => Some(AlertPriority::P2),
            "P3" => Some(AlertPriority::P3),
            _ => None,
        }
    }

    pub fn is_critical(&self) -> bool {
        matches!(self, AlertPriority::P1)
    }

    pub fn is_actionable(&self) -> bool {
        matches!(self, AlertPriority::P1 | AlertPriority::P2)
    }
}

impl std::fmt::Display for AlertPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Alert severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Critical,
    Warning,
    Info,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Critical => "critical",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Info => "info",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "critical" => Some(AlertSeverity::Critical),
            "warning" => Some(AlertSeverity::Warning),
            "info" => Some(AlertSeverity::Info),
            _ => None,
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Comparison applied to the primary threshold.
///
/// All comparisons are strict. The absolute variants apply `abs()` to the
/// metric value before comparing, so `abs_gt` reads `|value| > threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gt,
    Lt,
    AbsGt,
    AbsLt,
}

impl Comparison {
    /// Evaluate `value` against `threshold` under this comparison.
    pub fn evaluate(&self, value: Decimal, threshold: Decimal) -> bool {
        match self {
            Comparison::Gt => value > threshold,
            Comparison::Lt => value < threshold,
            Comparison::AbsGt => value.abs() > threshold,
            Comparison::AbsLt => value.abs() < threshold,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Comparison::Gt => "gt",
            Comparison::Lt => "lt",
            Comparison::AbsGt => "abs_gt",
            Comparison::AbsLt => "abs_lt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gt" => Some(Comparison::Gt),
            "lt" => Some(Comparison::Lt),
            "abs_gt" => Some(Comparison::AbsGt),
            "abs_lt" => Some(Comparison::AbsLt),
            _ => None,
        }
    }

    /// Symbol used in human-readable trigger messages.
    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::Gt => ">",
            Comparison::Lt => "<",
            Comparison::AbsGt => "|x| >",
            Comparison::AbsLt => "|x| <",
        }
    }
}

impl std::fmt::Display for Comparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How an alert left the active state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionType {
    /// Condition evaluated false on a later sample.
    Auto,
    /// Stale-alert timeout policy.
    Timeout,
    /// Operator action.
    Manual,
}

impl ResolutionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionType::Auto => "auto",
            ResolutionType::Timeout => "timeout",
            ResolutionType::Manual => "manual",
        }
    }
}

/// Configuration for one alert type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertDefinition {
    /// Unique identifier for this alert type (e.g., "spread_warning").
    pub alert_type: String,
    /// Human-readable name.
    pub name: String,
    /// The metric this alert monitors (e.g., "spread_bps").
    pub metric_name: String,
    pub default_priority: AlertPriority,
    pub default_severity: AlertSeverity,
    pub comparison: Comparison,
    /// Whether the z-score threshold must also be met (dual condition).
    pub requires_zscore: bool,
    /// Seconds the condition must hold continuously before firing.
    pub persistence_seconds: Option<u64>,
    /// Minimum seconds between repeated alerts for the same condition key.
    pub throttle_seconds: u64,
    /// Seconds an alert may stay active before escalating.
    pub escalation_seconds: Option<u64>,
    /// Alert type name recorded on escalation.
    pub escalates_to: Option<String>,
    pub enabled: bool,
}

impl AlertDefinition {
    pub fn has_persistence(&self) -> bool {
        self.persistence_seconds.is_some_and(|s| s > 0)
    }

    pub fn can_escalate(&self) -> bool {
        self.escalation_seconds.is_some()
    }
}

/// Per-instrument threshold values for one alert type.
///
/// Resolution is exact instrument first, then the `*` wildcard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdSpec {
    /// Primary metric threshold.
    pub threshold: Decimal,
    /// Z-score threshold (required when the definition has requires_zscore).
    pub zscore_threshold: Option<Decimal>,
    /// Overrides the definition's default priority when set.
    pub priority_override: Option<AlertPriority>,
    pub enabled: bool,
}

/// Why an evaluation did not produce an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Definition or threshold is disabled.
    Disabled,
    /// requires_zscore is set but no z-score threshold is configured.
    ConfigError,
    /// Z-score unavailable (engine warming up or guarded).
    ZscoreWarmup,
    /// |z-score| below the configured z-score threshold.
    ZscoreBelow,
    /// Persistence window just opened on this evaluation.
    PersistenceStarting,
    /// Condition true but has not held long enough yet.
    PersistenceNotMet,
    /// A recently resolved alert for the same key is inside the throttle window.
    Throttled,
    /// Evaluation raised an error; suppressed, never promoted to an alert.
    EvaluationError,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Disabled => "disabled",
            SkipReason::ConfigError => "config_error",
            SkipReason::ZscoreWarmup => "zscore_warmup",
            SkipReason::ZscoreBelow => "zscore_below",
            SkipReason::PersistenceStarting => "persistence_starting",
            SkipReason::PersistenceNotMet => "persistence_not_met",
            SkipReason::Throttled => "throttled",
            SkipReason::EvaluationError => "evaluation_error",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of one alert evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub triggered: bool,
    pub skip: Option<SkipReason>,
}

impl Evaluation {
    pub fn triggered() -> Self {
        Self {
            triggered: true,
            skip: None,
        }
    }

    /// Condition simply not met; not a skip.
    pub fn not_met() -> Self {
        Self {
            triggered: false,
            skip: None,
        }
    }

    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            triggered: false,
            skip: Some(reason),
        }
    }

    pub fn was_skipped(&self) -> bool {
        !self.triggered && self.skip.is_some()
    }
}

/// Identity of one alert condition: (alert_type, venue, instrument).
///
/// Persistence cells, the throttle map, and active-alert deduplication are
/// all keyed by this tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConditionKey {
    pub alert_type: String,
    pub venue: Venue,
    pub instrument: String,
}

impl ConditionKey {
    pub fn new(alert_type: impl Into<String>, venue: Venue, instrument: impl Into<String>) -> Self {
        Self {
            alert_type: alert_type.into(),
            venue,
            instrument: instrument.into(),
        }
    }
}

impl std::fmt::Display for ConditionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.alert_type, self.venue, self.instrument)
    }
}

/// An alert instance with full lifecycle context.
///
/// The alert id is stable for the duration of one condition episode;
/// re-triggering after resolution mints a new id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: Uuid,
    pub alert_type: String,
    /// Current priority (changes on escalation).
    pub priority: AlertPriority,
    pub severity: AlertSeverity,
    pub venue: Venue,
    pub instrument: String,

    pub trigger_metric: String,
    pub trigger_value: Decimal,
    pub trigger_threshold: Decimal,
    pub comparison: Comparison,
    pub zscore_value: Option<Decimal>,
    pub zscore_threshold: Option<Decimal>,

    pub triggered_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Seconds between trigger and resolution; set on resolve.
    pub duration_seconds: Option<i64>,

    /// Worst value observed while active, under the comparison semantics.
    pub peak_value: Decimal,
    pub peak_at: DateTime<Utc>,

    pub escalated: bool,
    pub escalated_at: Option<DateTime<Utc>>,
    pub original_priority: Option<AlertPriority>,

    pub context: HashMap<String, String>,
    pub resolution_type: Option<ResolutionType>,
    pub resolution_value: Option<Decimal>,
}

impl Alert {
    /// Mint a new alert for a freshly triggered condition.
    #[allow(clippy::too_many_arguments)]
    pub fn trigger(
        definition: &AlertDefinition,
        priority: AlertPriority,
        venue: Venue,
        instrument: impl Into<String>,
        trigger_value: Decimal,
        trigger_threshold: Decimal,
        zscore_value: Option<Decimal>,
        zscore_threshold: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            alert_id: Uuid::new_v4(),
            alert_type: definition.alert_type.clone(),
            priority,
            severity: definition.default_severity,
            venue,
            instrument: instrument.into(),
            trigger_metric: definition.metric_name.clone(),
            trigger_value,
            trigger_threshold,
            comparison: definition.comparison,
            zscore_value,
            zscore_threshold,
            triggered_at: now,
            acknowledged_at: None,
            resolved_at: None,
            duration_seconds: None,
            peak_value: trigger_value,
            peak_at: now,
            escalated: false,
            escalated_at: None,
            original_priority: None,
            context: HashMap::new(),
            resolution_type: None,
            resolution_value: None,
        }
    }

    pub fn condition_key(&self) -> ConditionKey {
        ConditionKey::new(self.alert_type.clone(), self.venue, self.instrument.clone())
    }

    pub fn is_active(&self) -> bool {
        self.resolved_at.is_none()
    }

    /// Mark acknowledged.
    pub fn acknowledge(&mut self, now: DateTime<Utc>) {
        self.acknowledged_at = Some(now);
    }

    /// Resolve the alert and record duration and resolution context.
    pub fn resolve(
        &mut self,
        resolution_type: ResolutionType,
        resolution_value: Option<Decimal>,
        now: DateTime<Utc>,
    ) {
        self.resolved_at = Some(now);
        self.resolution_type = Some(resolution_type);
        self.resolution_value = resolution_value;
        self.duration_seconds = Some((now - self.triggered_at).num_seconds());
    }

    /// Escalate to a higher priority, retaining the original.
    pub fn escalate(&mut self, new_priority: AlertPriority, now: DateTime<Utc>) {
        self.original_priority = Some(self.priority);
        self.priority = new_priority;
        self.escalated = true;
        self.escalated_at = Some(now);
    }

    /// Update the peak if `value` is worse than the current peak under the
    /// alert's comparison. Returns true if the peak changed.
    pub fn update_peak(&mut self, value: Decimal, now: DateTime<Utc>) -> bool {
        let worse = match self.comparison {
            Comparison::Gt => value > self.peak_value,
            Comparison::Lt => value < self.peak_value,
            Comparison::AbsGt => value.abs() > self.peak_value.abs(),
            Comparison::AbsLt => value.abs() < self.peak_value.abs(),
        };
        if worse {
            self.peak_value = value;
            self.peak_at = now;
        }
        worse
    }
}

/// Lifecycle event kinds emitted to storage and the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertEventKind {
    Triggered,
    Escalated,
    Resolved,
}

impl AlertEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertEventKind::Triggered => "triggered",
            AlertEventKind::Escalated => "escalated",
            AlertEventKind::Resolved => "resolved",
        }
    }
}

/// An alert lifecycle event with the alert state at event time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub kind: AlertEventKind,
    pub alert: Alert,
    pub timestamp: DateTime<Utc>,
}
