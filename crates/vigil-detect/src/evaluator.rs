//! Pure dual-condition alert evaluation.
//!
//! An alert condition is met only when ALL applicable gates pass:
//! 1. the primary threshold comparison (strict inequalities), and
//! 2. the z-score threshold, when the definition requires one.
//!
//! A missing z-score during warmup is a skip, not a failure; it is the
//! correct behavior that prevents alerting on an unestablished baseline.
//! Persistence and throttling are stateful and handled by the manager.

use rust_decimal::Decimal;
use tracing::{debug, warn};

use vigil_common::alerts::{AlertDefinition, Evaluation, SkipReason, ThresholdSpec};

/// Evaluate one sample against one definition and its thresholds.
pub fn evaluate(
    definition: &AlertDefinition,
    threshold: &ThresholdSpec,
    value: Decimal,
    zscore: Option<Decimal>,
) -> Evaluation {
    if !definition.enabled || !threshold.enabled {
        debug!(alert_type = %definition.alert_type, "Alert disabled");
        return Evaluation::skipped(SkipReason::Disabled);
    }

    // Gate 1: primary threshold.
    if !definition.comparison.evaluate(value, threshold.threshold) {
        return Evaluation::not_met();
    }

    // Gate 2: z-score, when required.
    if definition.requires_zscore {
        let Some(zscore) = zscore else {
            debug!(
                alert_type = %definition.alert_type,
                value = %value,
                "Skipped: z-score warming up"
            );
            return Evaluation::skipped(SkipReason::ZscoreWarmup);
        };

        let Some(zscore_threshold) = threshold.zscore_threshold else {
            warn!(
                alert_type = %definition.alert_type,
                "requires_zscore set but no z-score threshold configured"
            );
            return Evaluation::skipped(SkipReason::ConfigError);
        };

        // The z-score gate is always an absolute comparison.
        if zscore.abs() < zscore_threshold {
            debug!(
                alert_type = %definition.alert_type,
                zscore = %zscore,
                threshold = %zscore_threshold,
                "Skipped: z-score below threshold"
            );
            return Evaluation::skipped(SkipReason::ZscoreBelow);
        }
    }

    Evaluation::triggered()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use vigil_common::alerts::{AlertPriority, AlertSeverity, Comparison};

    fn definition(requires_zscore: bool) -> AlertDefinition {
        AlertDefinition {
            alert_type: "spread_warning".to_string(),
            name: "Spread Warning".to_string(),
            metric_name: "spread_bps".to_string(),
            default_priority: AlertPriority::P2,
            default_severity: AlertSeverity::Warning,
            comparison: Comparison::Gt,
            requires_zscore,
            persistence_seconds: None,
            throttle_seconds: 60,
            escalation_seconds: None,
            escalates_to: None,
            enabled: true,
        }
    }

    fn threshold(zscore_threshold: Option<Decimal>) -> ThresholdSpec {
        ThresholdSpec {
            threshold: dec!(3.0),
            zscore_threshold,
            priority_override: None,
            enabled: true,
        }
    }

    #[test]
    fn test_threshold_not_met() {
        let result = evaluate(&definition(false), &threshold(None), dec!(2.5), None);
        assert!(!result.triggered);
        assert!(result.skip.is_none());
    }

    #[test]
    fn test_threshold_met_without_zscore_requirement() {
        let result = evaluate(&definition(false), &threshold(None), dec!(3.5), None);
        assert!(result.triggered);
    }

    #[test]
    fn test_threshold_boundary_is_strict() {
        let result = evaluate(&definition(false), &threshold(None), dec!(3.0), None);
        assert!(!result.triggered);
    }

    #[test]
    fn test_zscore_warmup_skip() {
        let result = evaluate(
            &definition(true),
            &threshold(Some(dec!(2.0))),
            dec!(5.0),
            None,
        );
        assert!(!result.triggered);
        assert_eq!(result.skip, Some(SkipReason::ZscoreWarmup));
    }

    #[test]
    fn test_zscore_below_skip() {
        let result = evaluate(
            &definition(true),
            &threshold(Some(dec!(2.0))),
            dec!(5.0),
            Some(dec!(1.5)),
        );
        assert!(!result.triggered);
        assert_eq!(result.skip, Some(SkipReason::ZscoreBelow));
    }

    #[test]
    fn test_zscore_gate_is_absolute() {
        let result = evaluate(
            &definition(true),
            &threshold(Some(dec!(2.0))),
            dec!(5.0),
            Some(dec!(-3.0)),
        );
        assert!(result.triggered);
    }

    #[test]
    fn test_zscore_at_threshold_passes() {
        // The z gate passes at equality: |z| < threshold is the skip
        let result = evaluate(
            &definition(true),
            &threshold(Some(dec!(2.0))),
            dec!(5.0),
            Some(dec!(2.0)),
        );
        assert!(result.triggered);
    }

    #[test]
    fn test_dual_condition_fires() {
        let result = evaluate(
            &definition(true),
            &threshold(Some(dec!(2.0))),
            dec!(5.0),
            Some(dec!(6.0)),
        );
        assert!(result.triggered);
        assert!(result.skip.is_none());
    }

    #[test]
    fn test_missing_zscore_threshold_is_config_error() {
        let result = evaluate(&definition(true), &threshold(None), dec!(5.0), Some(dec!(6.0)));
        assert!(!result.triggered);
        assert_eq!(result.skip, Some(SkipReason::ConfigError));
    }

    #[test]
    fn test_disabled_definition_skips() {
        let mut def = definition(false);
        def.enabled = false;
        let result = evaluate(&def, &threshold(None), dec!(5.0), None);
        assert_eq!(result.skip, Some(SkipReason::Disabled));
    }

    #[test]
    fn test_disabled_threshold_skips() {
        let mut spec = threshold(None);
        spec.enabled = false;
        let result = evaluate(&definition(false), &spec, dec!(5.0), None);
        assert_eq!(result.skip, Some(SkipReason::Disabled));
    }

    #[test]
    fn test_lt_comparison() {
        let mut def = definition(false);
        def.comparison = Comparison::Lt;
        // depth below threshold fires
        let result = evaluate(&def, &threshold(None), dec!(2.0), None);
        assert!(result.triggered);
        let result = evaluate(&def, &threshold(None), dec!(3.5), None);
        assert!(!result.triggered);
    }

    #[test]
    fn test_abs_gt_comparison() {
        let mut def = definition(false);
        def.comparison = Comparison::AbsGt;
        let result = evaluate(&def, &threshold(None), dec!(-4.0), None);
        assert!(result.triggered);
        let result = evaluate(&def, &threshold(None), dec!(-2.0), None);
        assert!(!result.triggered);
    }
}
