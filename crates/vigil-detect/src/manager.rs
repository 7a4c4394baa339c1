//! Alert lifecycle management.
//!
//! The manager owns the active-alerts map, the persistence cells, and the
//! throttle map; it must run on a single task and is mutated only in
//! response to its input messages. Escalation uses one periodic scan over
//! active alerts rather than per-alert timers.
//!
//! Lifecycle: pending (persisting) -> active -> escalated? -> resolved.
//! At most one alert is active per (alert_type, venue, instrument) at any
//! instant; re-triggering after resolution mints a new alert id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vigil_common::alerts::{
    Alert, AlertDefinition, AlertEvent, AlertEventKind, AlertPriority, ConditionKey, Evaluation,
    ResolutionType, SkipReason,
};
use vigil_common::config::AlertsConfig;
use vigil_common::health::GapMarker;
use vigil_common::metrics::MetricSample;

use crate::evaluator::evaluate;
use crate::persistence::PersistenceTracker;

/// Orchestrates evaluation and the complete alert lifecycle.
pub struct AlertManager {
    config: AlertsConfig,
    /// Definitions indexed by the metric they monitor.
    defs_by_metric: HashMap<String, Vec<Arc<AlertDefinition>>>,
    /// Gaps at least this long clear persistence cells for the instrument.
    reset_on_gap: Duration,
    auto_resolve: bool,

    persistence: PersistenceTracker,
    active: HashMap<ConditionKey, Alert>,
    /// Throttle state: when each condition key last fired.
    last_fired: HashMap<ConditionKey, DateTime<Utc>>,
    /// Evaluation skip counters, by reason.
    skip_counts: HashMap<SkipReason, u64>,
}

impl AlertManager {
    pub fn new(config: AlertsConfig, reset_on_gap: Duration, auto_resolve: bool) -> Self {
        let mut defs_by_metric: HashMap<String, Vec<Arc<AlertDefinition>>> = HashMap::new();
        for definition in config.definitions.values() {
            defs_by_metric
                .entry(definition.metric_name.clone())
                .or_default()
                .push(Arc::new(definition.clone()));
        }
        // Deterministic evaluation order for replay equivalence.
        for definitions in defs_by_metric.values_mut() {
            definitions.sort_by(|a, b| a.alert_type.cmp(&b.alert_type));
        }

        info!(
            definitions = config.definitions.len(),
            metrics = defs_by_metric.len(),
            auto_resolve,
            "Alert manager initialized"
        );

        Self {
            config,
            defs_by_metric,
            reset_on_gap,
            auto_resolve,
            persistence: PersistenceTracker::new(),
            active: HashMap::new(),
            last_fired: HashMap::new(),
            skip_counts: HashMap::new(),
        }
    }

    /// Evaluate one metric sample against every applicable definition.
    ///
    /// Returns the lifecycle events produced (triggered and resolved);
    /// escalations come from [`AlertManager::check_escalations`].
    pub fn process_sample(&mut self, sample: &MetricSample, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let mut events = Vec::new();

        let Some(definitions) = self.defs_by_metric.get(&sample.metric).cloned() else {
            return events;
        };

        for definition in definitions {
            let key = ConditionKey::new(
                definition.alert_type.clone(),
                sample.venue,
                sample.instrument.clone(),
            );

            // An absent threshold for a monitored metric is an evaluation
            // error: suppressed, logged, never an alert.
            let Some(threshold) = self
                .config
                .resolve_threshold(&sample.instrument, &definition.alert_type)
                .cloned()
            else {
                debug!(
                    alert_type = %definition.alert_type,
                    instrument = %sample.instrument,
                    "No threshold resolves; suppressing evaluation"
                );
                self.record_skip(SkipReason::EvaluationError);
                continue;
            };

            let evaluation = evaluate(&definition, &threshold, sample.value, sample.zscore);

            if !evaluation.triggered {
                self.handle_not_triggered(&key, &evaluation, sample.value, now, &mut events);
                continue;
            }

            // Deduplication: one active alert per condition key; while it
            // is active, triggering evaluations only move the peak.
            if let Some(alert) = self.active.get_mut(&key) {
                if alert.update_peak(sample.value, now) {
                    debug!(alert_id = %alert.alert_id, peak = %alert.peak_value, "Peak updated");
                }
                continue;
            }

            // Persistence gate (stateful, so handled here not in the
            // evaluator).
            if let Some(required) = definition.persistence_seconds.filter(|s| *s > 0) {
                if !self.persistence.contains(&key) {
                    self.persistence.track(&key, true, now);
                    self.record_skip(SkipReason::PersistenceStarting);
                    debug!(condition = %key, required, "Persistence window opened");
                    continue;
                }
                if !self.persistence.is_met(&key, required, now) {
                    self.record_skip(SkipReason::PersistenceNotMet);
                    continue;
                }
            }

            // Throttle: the previous alert for this key was resolved; do
            // not re-fire inside the throttle window.
            if let Some(last) = self.last_fired.get(&key) {
                let elapsed = (now - *last).num_seconds();
                if elapsed < definition.throttle_seconds as i64 {
                    self.record_skip(SkipReason::Throttled);
                    debug!(condition = %key, elapsed, "Throttled");
                    continue;
                }
            }

            // Fire.
            let priority = threshold
                .priority_override
                .unwrap_or(definition.default_priority);
            let alert = Alert::trigger(
                &definition,
                priority,
                sample.venue,
                sample.instrument.clone(),
                sample.value,
                threshold.threshold,
                sample.zscore,
                threshold.zscore_threshold,
                now,
            );

            info!(
                alert_id = %alert.alert_id,
                alert_type = %alert.alert_type,
                priority = %alert.priority,
                value = %alert.trigger_value,
                threshold = %alert.trigger_threshold,
                "Alert triggered"
            );

            self.last_fired.insert(key.clone(), now);
            self.persistence.clear(&key);
            events.push(AlertEvent {
                kind: AlertEventKind::Triggered,
                alert: alert.clone(),
                timestamp: now,
            });
            self.active.insert(key, alert);
        }

        events
    }

    /// Apply the escalation rule to every active alert. Driven by a
    /// periodic tick (at least 1/s) from the pipeline.
    pub fn check_escalations(&mut self, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let mut events = Vec::new();

        for alert in self.active.values_mut() {
            if alert.escalated {
                continue;
            }
            let Some(definition) = self.config.definitions.get(&alert.alert_type) else {
                continue;
            };
            let Some(escalation_seconds) = definition.escalation_seconds else {
                continue;
            };
            let age = (now - alert.triggered_at).num_seconds();
            if age >= escalation_seconds as i64 {
                let from = alert.priority;
                alert.escalate(AlertPriority::P1, now);
                info!(
                    alert_id = %alert.alert_id,
                    from = %from,
                    to = %alert.priority,
                    age_seconds = age,
                    "Alert escalated"
                );
                events.push(AlertEvent {
                    kind: AlertEventKind::Escalated,
                    alert: alert.clone(),
                    timestamp: now,
                });
            }
        }

        self.prune_throttle_state(now);
        events
    }

    /// Resolve alerts that have been active longer than `max_age`
    /// (timeout policy for stale alerts).
    pub fn resolve_stale(&mut self, max_age: Duration, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let stale: Vec<ConditionKey> = self
            .active
            .iter()
            .filter(|(_, alert)| {
                (now - alert.triggered_at).num_seconds() >= max_age.as_secs() as i64
            })
            .map(|(key, _)| key.clone())
            .collect();

        stale
            .into_iter()
            .filter_map(|key| self.resolve_key(&key, ResolutionType::Timeout, None, now))
            .collect()
    }

    /// Operator-initiated resolution by alert id.
    pub fn resolve_manual(
        &mut self,
        alert_id: Uuid,
        resolution_value: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Option<AlertEvent> {
        let key = self
            .active
            .iter()
            .find(|(_, alert)| alert.alert_id == alert_id)
            .map(|(key, _)| key.clone())?;
        self.resolve_key(&key, ResolutionType::Manual, resolution_value, now)
    }

    /// React to a data gap: gaps at or above the reset threshold clear
    /// every pending persistence cell for the (venue, instrument).
    pub fn on_gap(&mut self, gap: &GapMarker) {
        if gap.exceeds_secs(self.reset_on_gap.as_secs()) {
            self.persistence.clear_for(gap.venue, &gap.instrument);
        }
    }

    /// Seed lifecycle state recovered from the hot store at startup.
    ///
    /// Loss of this state at most causes re-warmup of persistence windows;
    /// it never produces a spurious alert.
    pub fn seed_active(&mut self, alerts: Vec<Alert>) {
        for alert in alerts {
            if !alert.is_active() {
                continue;
            }
            let key = alert.condition_key();
            self.last_fired.insert(key.clone(), alert.triggered_at);
            self.active.insert(key, alert);
        }
        info!(recovered = self.active.len(), "Active alerts recovered");
    }

    pub fn active_alerts(&self) -> Vec<&Alert> {
        self.active.values().collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn persistence_cell_count(&self) -> usize {
        self.persistence.len()
    }

    pub fn has_persistence_cell(&self, key: &ConditionKey) -> bool {
        self.persistence.contains(key)
    }

    /// How many evaluations were skipped for a reason.
    pub fn skip_count(&self, reason: SkipReason) -> u64 {
        self.skip_counts.get(&reason).copied().unwrap_or(0)
    }

    fn handle_not_triggered(
        &mut self,
        key: &ConditionKey,
        evaluation: &Evaluation,
        value: Decimal,
        now: DateTime<Utc>,
        events: &mut Vec<AlertEvent>,
    ) {
        if let Some(reason) = evaluation.skip {
            self.record_skip(reason);
        }

        // Disabled definitions and configuration errors say nothing about
        // the market; they neither clear persistence nor resolve alerts.
        let condition_cleared = matches!(
            evaluation.skip,
            None | Some(SkipReason::ZscoreWarmup) | Some(SkipReason::ZscoreBelow)
        );
        if !condition_cleared {
            return;
        }

        self.persistence.track(key, false, now);

        if self.auto_resolve && self.active.contains_key(key) {
            if let Some(event) = self.resolve_key(key, ResolutionType::Auto, Some(value), now) {
                events.push(event);
            }
        }
    }

    fn resolve_key(
        &mut self,
        key: &ConditionKey,
        resolution_type: ResolutionType,
        resolution_value: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Option<AlertEvent> {
        let mut alert = self.active.remove(key)?;
        alert.resolve(resolution_type, resolution_value, now);
        info!(
            alert_id = %alert.alert_id,
            alert_type = %alert.alert_type,
            resolution = resolution_type.as_str(),
            duration_seconds = alert.duration_seconds.unwrap_or(0),
            peak = %alert.peak_value,
            "Alert resolved"
        );
        Some(AlertEvent {
            kind: AlertEventKind::Resolved,
            alert,
            timestamp: now,
        })
    }

    /// Drop throttle entries past their TTL
    /// (max of throttle and escalation windows per definition).
    fn prune_throttle_state(&mut self, now: DateTime<Utc>) {
        let definitions = &self.config.definitions;
        let active = &self.active;
        self.last_fired.retain(|key, fired_at| {
            if active.contains_key(key) {
                return true;
            }
            let ttl = definitions
                .get(&key.alert_type)
                .map(|d| d.throttle_seconds.max(d.escalation_seconds.unwrap_or(0)))
                .unwrap_or(0);
            (now - *fired_at).num_seconds() <= ttl as i64
        });
    }

    fn record_skip(&mut self, reason: SkipReason) {
        *self.skip_counts.entry(reason).or_insert(0) += 1;
        if reason == SkipReason::EvaluationError {
            warn!(reason = %reason, "Evaluation suppressed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use vigil_common::alerts::{AlertSeverity, Comparison, ThresholdSpec};
    use vigil_common::types::Venue;

    fn definition(
        alert_type: &str,
        metric: &str,
        requires_zscore: bool,
        persistence: Option<u64>,
        escalation: Option<u64>,
    ) -> AlertDefinition {
        AlertDefinition {
            alert_type: alert_type.to_string(),
            name: alert_type.to_string(),
            metric_name: metric.to_string(),
            default_priority: AlertPriority::P2,
            default_severity: AlertSeverity::Warning,
            comparison: Comparison::Gt,
            requires_zscore,
            persistence_seconds: persistence,
            throttle_seconds: 60,
            escalation_seconds: escalation,
            escalates_to: None,
            enabled: true,
        }
    }

    fn config(definitions: Vec<AlertDefinition>, zscore_threshold: Option<Decimal>) -> AlertsConfig {
        let mut defs = HashMap::new();
        let mut by_type = HashMap::new();
        for definition in definitions {
            by_type.insert(
                definition.alert_type.clone(),
                ThresholdSpec {
                    threshold: dec!(3.0),
                    zscore_threshold,
                    priority_override: None,
                    enabled: true,
                },
            );
            defs.insert(definition.alert_type.clone(), definition);
        }
        let mut thresholds = HashMap::new();
        thresholds.insert("*".to_string(), by_type);
        AlertsConfig {
            definitions: defs,
            thresholds,
        }
    }

    fn sample(value: Decimal, zscore: Option<Decimal>, at: DateTime<Utc>) -> MetricSample {
        MetricSample::new("spread_bps", Venue::Binance, "BTC-USDT-PERP", at, value, zscore)
    }

    fn manager(definitions: Vec<AlertDefinition>, zt: Option<Decimal>) -> AlertManager {
        AlertManager::new(config(definitions, zt), Duration::from_secs(5), true)
    }

    #[test]
    fn test_fire_and_dedup() {
        let mut mgr = manager(
            vec![definition("spread_warning", "spread_bps", false, None, None)],
            None,
        );
        let t0 = Utc::now();

        let events = mgr.process_sample(&sample(dec!(5), None, t0), t0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertEventKind::Triggered);
        assert_eq!(mgr.active_count(), 1);

        // Second triggering sample: no new alert, peak moves
        let t1 = t0 + chrono::Duration::seconds(5);
        let events = mgr.process_sample(&sample(dec!(7), None, t1), t1);
        assert!(events.is_empty());
        assert_eq!(mgr.active_count(), 1);
        assert_eq!(mgr.active_alerts()[0].peak_value, dec!(7));
    }

    #[test]
    fn test_at_most_one_active_per_key() {
        let mut mgr = manager(
            vec![definition("spread_warning", "spread_bps", false, None, None)],
            None,
        );
        let t0 = Utc::now();
        for i in 0..10 {
            let at = t0 + chrono::Duration::seconds(i);
            mgr.process_sample(&sample(dec!(5), None, at), at);
        }
        assert_eq!(mgr.active_count(), 1);
    }

    #[test]
    fn test_auto_resolution_with_duration_and_peak() {
        let mut mgr = manager(
            vec![definition("spread_warning", "spread_bps", false, None, None)],
            None,
        );
        let t0 = Utc::now();

        mgr.process_sample(&sample(dec!(5), None, t0), t0);
        let t1 = t0 + chrono::Duration::seconds(20);
        mgr.process_sample(&sample(dec!(8), None, t1), t1);

        let t2 = t0 + chrono::Duration::seconds(45);
        let events = mgr.process_sample(&sample(dec!(2), None, t2), t2);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertEventKind::Resolved);

        let alert = &events[0].alert;
        assert_eq!(alert.duration_seconds, Some(45));
        assert_eq!(alert.resolution_type, Some(ResolutionType::Auto));
        assert_eq!(alert.resolution_value, Some(dec!(2)));
        assert_eq!(alert.peak_value, dec!(8));
        assert_eq!(mgr.active_count(), 0);
    }

    #[test]
    fn test_throttle_suppresses_refire() {
        let mut mgr = manager(
            vec![definition("spread_warning", "spread_bps", false, None, None)],
            None,
        );
        let t0 = Utc::now();

        mgr.process_sample(&sample(dec!(5), None, t0), t0);
        // Resolve at t0+10
        let t1 = t0 + chrono::Duration::seconds(10);
        mgr.process_sample(&sample(dec!(2), None, t1), t1);

        // Condition returns at t0+30, inside the 60s throttle window
        let t2 = t0 + chrono::Duration::seconds(30);
        let events = mgr.process_sample(&sample(dec!(5), None, t2), t2);
        assert!(events.is_empty());
        assert_eq!(mgr.skip_count(SkipReason::Throttled), 1);

        // Past the throttle window a new alert (new id) fires
        let t3 = t0 + chrono::Duration::seconds(61);
        let events = mgr.process_sample(&sample(dec!(5), None, t3), t3);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertEventKind::Triggered);
    }

    #[test]
    fn test_new_episode_mints_new_id() {
        let mut mgr = manager(
            vec![definition("spread_warning", "spread_bps", false, None, None)],
            None,
        );
        let t0 = Utc::now();

        let first = mgr.process_sample(&sample(dec!(5), None, t0), t0)[0]
            .alert
            .alert_id;
        let t1 = t0 + chrono::Duration::seconds(10);
        mgr.process_sample(&sample(dec!(2), None, t1), t1);
        let t2 = t0 + chrono::Duration::seconds(120);
        let second = mgr.process_sample(&sample(dec!(5), None, t2), t2)[0]
            .alert
            .alert_id;

        assert_ne!(first, second);
    }

    #[test]
    fn test_zscore_warmup_suppresses() {
        let mut mgr = manager(
            vec![definition("spread_warning", "spread_bps", true, None, None)],
            Some(dec!(2.0)),
        );
        let t0 = Utc::now();

        for i in 0..10 {
            let at = t0 + chrono::Duration::seconds(i);
            let events = mgr.process_sample(&sample(dec!(5), None, at), at);
            assert!(events.is_empty());
        }
        assert_eq!(mgr.skip_count(SkipReason::ZscoreWarmup), 10);
        assert_eq!(mgr.active_count(), 0);
    }

    #[test]
    fn test_escalation_after_timeout() {
        let mut mgr = manager(
            vec![definition("spread_warning", "spread_bps", false, None, Some(300))],
            None,
        );
        let t0 = Utc::now();
        let alert_id = mgr.process_sample(&sample(dec!(5), None, t0), t0)[0]
            .alert
            .alert_id;

        // Just before the escalation deadline: nothing
        let t1 = t0 + chrono::Duration::seconds(299);
        assert!(mgr.check_escalations(t1).is_empty());

        // Past the deadline: escalated once, id unchanged
        let t2 = t0 + chrono::Duration::seconds(301);
        let events = mgr.check_escalations(t2);
        assert_eq!(events.len(), 1);
        let alert = &events[0].alert;
        assert_eq!(alert.alert_id, alert_id);
        assert!(alert.escalated);
        assert_eq!(alert.priority, AlertPriority::P1);
        assert_eq!(alert.original_priority, Some(AlertPriority::P2));

        // Not escalated twice
        let t3 = t0 + chrono::Duration::seconds(400);
        assert!(mgr.check_escalations(t3).is_empty());
    }

    #[test]
    fn test_persistence_gate() {
        let mut mgr = manager(
            vec![definition("basis_warning", "spread_bps", false, Some(120), None)],
            None,
        );
        let t0 = Utc::now();

        // First matching evaluation opens the window
        assert!(mgr.process_sample(&sample(dec!(5), None, t0), t0).is_empty());
        assert_eq!(mgr.skip_count(SkipReason::PersistenceStarting), 1);
        assert_eq!(mgr.persistence_cell_count(), 1);

        // Held but not long enough
        let t1 = t0 + chrono::Duration::seconds(119);
        assert!(mgr.process_sample(&sample(dec!(5), None, t1), t1).is_empty());
        assert_eq!(mgr.skip_count(SkipReason::PersistenceNotMet), 1);

        // At 120 seconds the alert fires and the cell clears
        let t2 = t0 + chrono::Duration::seconds(120);
        let events = mgr.process_sample(&sample(dec!(5), None, t2), t2);
        assert_eq!(events.len(), 1);
        assert_eq!(mgr.persistence_cell_count(), 0);
    }

    #[test]
    fn test_persistence_cell_cleared_on_false() {
        let mut mgr = manager(
            vec![definition("basis_warning", "spread_bps", false, Some(120), None)],
            None,
        );
        let t0 = Utc::now();

        mgr.process_sample(&sample(dec!(5), None, t0), t0);
        assert_eq!(mgr.persistence_cell_count(), 1);

        // Condition drops: cell cleared, window restarts from scratch
        let t1 = t0 + chrono::Duration::seconds(60);
        mgr.process_sample(&sample(dec!(2), None, t1), t1);
        assert_eq!(mgr.persistence_cell_count(), 0);

        let t2 = t0 + chrono::Duration::seconds(70);
        mgr.process_sample(&sample(dec!(5), None, t2), t2);
        let t3 = t2 + chrono::Duration::seconds(119);
        assert!(mgr.process_sample(&sample(dec!(5), None, t3), t3).is_empty());
    }

    #[test]
    fn test_gap_clears_persistence_cells() {
        let mut mgr = manager(
            vec![definition("basis_warning", "spread_bps", false, Some(120), None)],
            None,
        );
        let t0 = Utc::now();
        mgr.process_sample(&sample(dec!(5), None, t0), t0);
        assert_eq!(mgr.persistence_cell_count(), 1);

        let gap = GapMarker::new(
            Venue::Binance,
            "BTC-USDT-PERP",
            t0,
            t0 + chrono::Duration::seconds(10),
            vigil_common::health::GapReason::Disconnect,
            None,
            None,
        );
        mgr.on_gap(&gap);
        assert_eq!(mgr.persistence_cell_count(), 0);
    }

    #[test]
    fn test_short_gap_keeps_persistence_cells() {
        let mut mgr = manager(
            vec![definition("basis_warning", "spread_bps", false, Some(120), None)],
            None,
        );
        let t0 = Utc::now();
        mgr.process_sample(&sample(dec!(5), None, t0), t0);

        let gap = GapMarker::new(
            Venue::Binance,
            "BTC-USDT-PERP",
            t0,
            t0 + chrono::Duration::seconds(2),
            vigil_common::health::GapReason::Duplicate,
            Some(1),
            Some(1),
        );
        mgr.on_gap(&gap);
        assert_eq!(mgr.persistence_cell_count(), 1);
    }

    #[test]
    fn test_missing_threshold_is_evaluation_error() {
        let mut cfg = config(
            vec![definition("spread_warning", "spread_bps", false, None, None)],
            None,
        );
        cfg.thresholds.clear();
        let mut mgr = AlertManager::new(cfg, Duration::from_secs(5), true);

        let t0 = Utc::now();
        let events = mgr.process_sample(&sample(dec!(5), None, t0), t0);
        assert!(events.is_empty());
        assert_eq!(mgr.skip_count(SkipReason::EvaluationError), 1);
    }

    #[test]
    fn test_timeout_resolution() {
        let mut mgr = manager(
            vec![definition("spread_warning", "spread_bps", false, None, None)],
            None,
        );
        let t0 = Utc::now();
        mgr.process_sample(&sample(dec!(5), None, t0), t0);

        let t1 = t0 + chrono::Duration::seconds(3700);
        let events = mgr.resolve_stale(Duration::from_secs(3600), t1);
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].alert.resolution_type,
            Some(ResolutionType::Timeout)
        );
        assert_eq!(mgr.active_count(), 0);
    }

    #[test]
    fn test_manual_resolution() {
        let mut mgr = manager(
            vec![definition("spread_warning", "spread_bps", false, None, None)],
            None,
        );
        let t0 = Utc::now();
        let alert_id = mgr.process_sample(&sample(dec!(5), None, t0), t0)[0]
            .alert
            .alert_id;

        let t1 = t0 + chrono::Duration::seconds(30);
        let event = mgr.resolve_manual(alert_id, Some(dec!(4)), t1).unwrap();
        assert_eq!(event.alert.resolution_type, Some(ResolutionType::Manual));
        assert!(mgr.resolve_manual(alert_id, None, t1).is_none());
    }

    #[test]
    fn test_seed_active_recovers_state() {
        let mut mgr = manager(
            vec![definition("spread_warning", "spread_bps", false, None, None)],
            None,
        );
        let t0 = Utc::now();

        let mut donor = manager(
            vec![definition("spread_warning", "spread_bps", false, None, None)],
            None,
        );
        let alert = donor.process_sample(&sample(dec!(5), None, t0), t0)[0]
            .alert
            .clone();

        mgr.seed_active(vec![alert]);
        assert_eq!(mgr.active_count(), 1);

        // The recovered alert dedupes new fires for the same key
        let t1 = t0 + chrono::Duration::seconds(5);
        assert!(mgr.process_sample(&sample(dec!(6), None, t1), t1).is_empty());
    }

    #[test]
    fn test_replay_determinism() {
        let run = |samples: &[(i64, Decimal)]| -> Vec<(AlertEventKind, String)> {
            let mut mgr = manager(
                vec![
                    definition("spread_warning", "spread_bps", false, None, None),
                    definition("spread_critical", "spread_bps", false, None, None),
                ],
                None,
            );
            let t0 = chrono::DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc);
            let mut timeline = Vec::new();
            for (offset, value) in samples {
                let at = t0 + chrono::Duration::seconds(*offset);
                for event in mgr.process_sample(&sample(*value, None, at), at) {
                    timeline.push((event.kind, event.alert.alert_type.clone()));
                }
            }
            timeline
        };

        let samples = [
            (0, dec!(5)),
            (10, dec!(7)),
            (20, dec!(2)),
            (90, dec!(6)),
            (100, dec!(1)),
        ];
        let a = run(&samples);
        let b = run(&samples);
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }
}
