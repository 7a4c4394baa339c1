//! Notification dispatch.
//!
//! The core knows channels only by string identifier ("console", "slack",
//! ...). Routing is by alert priority; transports that need I/O spawn
//! their own fire-and-forget tasks so dispatch never blocks the detector.

use std::collections::HashMap;

use tracing::{info, warn};

use vigil_common::alerts::{AlertEvent, AlertEventKind, AlertPriority};

/// A notification transport.
pub trait AlertChannel: Send + Sync {
    /// Channel identifier (e.g., "console").
    fn name(&self) -> &str;

    /// Deliver one lifecycle event. Must not block; transports with real
    /// I/O spawn their own tasks.
    fn deliver(&self, event: &AlertEvent);
}

/// Log-based channel; always available.
pub struct ConsoleChannel;

impl AlertChannel for ConsoleChannel {
    fn name(&self) -> &str {
        "console"
    }

    fn deliver(&self, event: &AlertEvent) {
        let alert = &event.alert;
        match event.kind {
            AlertEventKind::Triggered => info!(
                target: "vigil::alerts",
                alert_id = %alert.alert_id,
                priority = %alert.priority,
                venue = %alert.venue,
                instrument = %alert.instrument,
                "[{}] {}: {} {} {} (z: {})",
                alert.priority,
                alert.alert_type,
                alert.trigger_metric,
                alert.comparison.symbol(),
                alert.trigger_threshold,
                alert
                    .zscore_value
                    .map(|z| z.to_string())
                    .unwrap_or_else(|| "n/a".to_string()),
            ),
            AlertEventKind::Escalated => info!(
                target: "vigil::alerts",
                alert_id = %alert.alert_id,
                from = %alert.original_priority.map(|p| p.as_str()).unwrap_or("?"),
                to = %alert.priority,
                "[ESCALATED] {}",
                alert.alert_type,
            ),
            AlertEventKind::Resolved => info!(
                target: "vigil::alerts",
                alert_id = %alert.alert_id,
                duration_seconds = alert.duration_seconds.unwrap_or(0),
                resolution = alert
                    .resolution_type
                    .map(|r| r.as_str())
                    .unwrap_or("unknown"),
                "[RESOLVED] {}",
                alert.alert_type,
            ),
        }
    }
}

/// Routes lifecycle events to channels by alert priority.
pub struct ChannelDispatcher {
    channels: HashMap<String, Box<dyn AlertChannel>>,
    priority_channels: HashMap<AlertPriority, Vec<String>>,
}

impl ChannelDispatcher {
    pub fn new(
        channels: Vec<Box<dyn AlertChannel>>,
        priority_channels: HashMap<AlertPriority, Vec<String>>,
    ) -> Self {
        let channels = channels
            .into_iter()
            .map(|channel| (channel.name().to_string(), channel))
            .collect();
        Self {
            channels,
            priority_channels,
        }
    }

    /// Console-only dispatcher with every priority routed to it.
    pub fn console_only() -> Self {
        let mut priority_channels = HashMap::new();
        for priority in [AlertPriority::P1, AlertPriority::P2, AlertPriority::P3] {
            priority_channels.insert(priority, vec!["console".to_string()]);
        }
        Self::new(vec![Box::new(ConsoleChannel)], priority_channels)
    }

    /// Deliver an event to every channel configured for its priority.
    pub fn dispatch(&self, event: &AlertEvent) {
        let Some(names) = self.priority_channels.get(&event.alert.priority) else {
            return;
        };
        for name in names {
            match self.channels.get(name) {
                Some(channel) => channel.deliver(event),
                None => warn!(channel = %name, "Alert routed to unknown channel"),
            }
        }
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use vigil_common::alerts::{
        Alert, AlertDefinition, AlertSeverity, Comparison,
    };
    use vigil_common::types::Venue;

    struct CountingChannel {
        name: String,
        delivered: Arc<AtomicUsize>,
    }

    impl AlertChannel for CountingChannel {
        fn name(&self) -> &str {
            &self.name
        }

        fn deliver(&self, _event: &AlertEvent) {
            self.delivered.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn event(priority: AlertPriority) -> AlertEvent {
        let definition = AlertDefinition {
            alert_type: "spread_warning".to_string(),
            name: "Spread Warning".to_string(),
            metric_name: "spread_bps".to_string(),
            default_priority: priority,
            default_severity: AlertSeverity::Warning,
            comparison: Comparison::Gt,
            requires_zscore: false,
            persistence_seconds: None,
            throttle_seconds: 60,
            escalation_seconds: None,
            escalates_to: None,
            enabled: true,
        };
        let now = Utc::now();
        let alert = Alert::trigger(
            &definition,
            priority,
            Venue::Binance,
            "BTC-USDT-PERP",
            dec!(5),
            dec!(3),
            None,
            None,
            now,
        );
        AlertEvent {
            kind: AlertEventKind::Triggered,
            alert,
            timestamp: now,
        }
    }

    #[test]
    fn test_routing_by_priority() {
        let console_count = Arc::new(AtomicUsize::new(0));
        let pager_count = Arc::new(AtomicUsize::new(0));

        let mut priority_channels = HashMap::new();
        priority_channels.insert(
            AlertPriority::P1,
            vec!["console".to_string(), "pager".to_string()],
        );
        priority_channels.insert(AlertPriority::P3, vec!["console".to_string()]);

        let dispatcher = ChannelDispatcher::new(
            vec![
                Box::new(CountingChannel {
                    name: "console".to_string(),
                    delivered: Arc::clone(&console_count),
                }),
                Box::new(CountingChannel {
                    name: "pager".to_string(),
                    delivered: Arc::clone(&pager_count),
                }),
            ],
            priority_channels,
        );

        dispatcher.dispatch(&event(AlertPriority::P1));
        assert_eq!(console_count.load(Ordering::Relaxed), 1);
        assert_eq!(pager_count.load(Ordering::Relaxed), 1);

        dispatcher.dispatch(&event(AlertPriority::P3));
        assert_eq!(console_count.load(Ordering::Relaxed), 2);
        assert_eq!(pager_count.load(Ordering::Relaxed), 1);

        // P2 has no routing configured: dropped silently
        dispatcher.dispatch(&event(AlertPriority::P2));
        assert_eq!(console_count.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_unknown_channel_does_not_panic() {
        let mut priority_channels = HashMap::new();
        priority_channels.insert(AlertPriority::P1, vec!["slack".to_string()]);
        let dispatcher = ChannelDispatcher::new(vec![Box::new(ConsoleChannel)], priority_channels);
        dispatcher.dispatch(&event(AlertPriority::P1));
    }

    #[test]
    fn test_console_only_covers_all_priorities() {
        let dispatcher = ChannelDispatcher::console_only();
        assert_eq!(dispatcher.channel_names(), vec!["console"]);
        for priority in [AlertPriority::P1, AlertPriority::P2, AlertPriority::P3] {
            dispatcher.dispatch(&event(priority));
        }
    }
}
