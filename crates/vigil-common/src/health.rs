//! Health, connection status, and data-gap types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Venue;

/// Venue connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Degraded,
    Reconnecting,
    Disconnected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Degraded => "degraded",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Disconnected => "disconnected",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    /// True if data can still flow (streamed or REST-polled).
    pub fn is_usable(&self) -> bool {
        matches!(self, ConnectionStatus::Connected | ConnectionStatus::Degraded)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a data gap was recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapReason {
    /// Connection lost; gap spans last message to first post-reconnect message.
    Disconnect,
    /// Sequence id went backwards.
    SequenceRegression,
    /// Sequence id repeated (re-delivered frame).
    Duplicate,
    /// No message for the instrument within the silence threshold.
    Timeout,
    /// Venue-announced maintenance window.
    Maintenance,
}

impl GapReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            GapReason::Disconnect => "disconnect",
            GapReason::SequenceRegression => "sequence_regression",
            GapReason::Duplicate => "duplicate",
            GapReason::Timeout => "timeout",
            GapReason::Maintenance => "maintenance",
        }
    }
}

impl std::fmt::Display for GapReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Record of a period of missing data. Created once, never mutated; gap
/// periods are never backfilled with synthetic values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapMarker {
    pub venue: Venue,
    pub instrument: String,
    /// Timestamp of the last good data (UTC).
    pub gap_start: DateTime<Utc>,
    /// Timestamp when data resumed (UTC).
    pub gap_end: DateTime<Utc>,
    /// Gap duration in milliseconds, fixed at creation.
    pub duration_ms: i64,
    pub reason: GapReason,
    /// Last known sequence id before the gap.
    pub sequence_before: Option<u64>,
    /// First sequence id after the gap.
    pub sequence_after: Option<u64>,
}

impl GapMarker {
    pub fn new(
        venue: Venue,
        instrument: impl Into<String>,
        gap_start: DateTime<Utc>,
        gap_end: DateTime<Utc>,
        reason: GapReason,
        sequence_before: Option<u64>,
        sequence_after: Option<u64>,
    ) -> Self {
        Self {
            venue,
            instrument: instrument.into(),
            gap_start,
            gap_end,
            duration_ms: (gap_end - gap_start).num_milliseconds().max(0),
            reason,
            sequence_before,
            sequence_after,
        }
    }

    /// Duration in whole seconds.
    pub fn duration_secs(&self) -> i64 {
        self.duration_ms / 1000
    }

    /// True when the gap is long enough to invalidate rolling statistics.
    pub fn exceeds_secs(&self, threshold_secs: u64) -> bool {
        self.duration_ms >= (threshold_secs as i64) * 1000
    }

    /// Number of missed sequence ids, when both boundaries are known.
    pub fn sequence_gap_size(&self) -> Option<i64> {
        match (self.sequence_before, self.sequence_after) {
            (Some(before), Some(after)) => Some(after as i64 - before as i64 - 1),
            _ => None,
        }
    }
}

/// Per-venue connection health projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub venue: Venue,
    pub status: ConnectionStatus,
    pub last_message_at: Option<DateTime<Utc>>,
    /// Messages received in the current session.
    pub message_count: u64,
    /// Processing lag in milliseconds.
    pub lag_ms: u64,
    /// Reconnections in the current session.
    pub reconnect_count: u32,
    /// Data gaps recognized in the last hour.
    pub gaps_last_hour: u32,
}

impl HealthSnapshot {
    pub fn disconnected(venue: Venue) -> Self {
        Self {
            venue,
            status: ConnectionStatus::Disconnected,
            last_message_at: None,
            message_count: 0,
            lag_ms: 0,
            reconnect_count: 0,
            gaps_last_hour: 0,
        }
    }

    /// Connected, low lag, few gaps.
    pub fn is_healthy(&self) -> bool {
        self.status.is_healthy() && self.lag_ms < 1000 && self.gaps_last_hour < 5
    }

    /// Usable but lagging or gappy.
    pub fn is_degraded(&self) -> bool {
        self.status.is_usable() && (self.lag_ms >= 1000 || self.gaps_last_hour >= 5)
    }
}

/// Z-score warmup progress projection for the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZScoreStatus {
    pub metric: String,
    pub venue: Venue,
    pub instrument: String,
    pub warmed_up: bool,
    pub sample_count: usize,
    pub min_samples: usize,
    /// 0-100.
    pub progress_pct: Decimal,
}

impl ZScoreStatus {
    pub fn samples_remaining(&self) -> usize {
        self.min_samples.saturating_sub(self.sample_count)
    }

    pub fn display_text(&self) -> String {
        if self.warmed_up {
            "active".to_string()
        } else {
            format!("warming up ({}/{})", self.sample_count, self.min_samples)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_connection_status() {
        assert!(ConnectionStatus::Connected.is_healthy());
        assert!(!ConnectionStatus::Degraded.is_healthy());
        assert!(ConnectionStatus::Degraded.is_usable());
        assert!(!ConnectionStatus::Reconnecting.is_usable());
        assert_eq!(ConnectionStatus::Reconnecting.as_str(), "reconnecting");
    }

    #[test]
    fn test_gap_marker_duration() {
        let start = Utc::now();
        let end = start + chrono::Duration::milliseconds(10_500);
        let gap = GapMarker::new(
            Venue::Binance,
            "BTC-USDT-PERP",
            start,
            end,
            GapReason::Disconnect,
            Some(100),
            Some(150),
        );

        assert_eq!(gap.duration_ms, 10_500);
        assert_eq!(gap.duration_secs(), 10);
        assert!(gap.exceeds_secs(5));
        assert!(gap.exceeds_secs(10));
        assert!(!gap.exceeds_secs(11));
        assert_eq!(gap.sequence_gap_size(), Some(49));
    }

    #[test]
    fn test_gap_marker_zero_duration_duplicate() {
        let now = Utc::now();
        let gap = GapMarker::new(
            Venue::Okx,
            "BTC-USDT-PERP",
            now,
            now,
            GapReason::Duplicate,
            Some(42),
            Some(42),
        );
        assert_eq!(gap.duration_ms, 0);
        assert!(!gap.exceeds_secs(5));
        assert_eq!(gap.sequence_gap_size(), Some(-1));
        assert_eq!(gap.reason.as_str(), "duplicate");
    }

    #[test]
    fn test_health_snapshot_flags() {
        let mut health = HealthSnapshot {
            venue: Venue::Binance,
            status: ConnectionStatus::Connected,
            last_message_at: Some(Utc::now()),
            message_count: 1000,
            lag_ms: 20,
            reconnect_count: 0,
            gaps_last_hour: 0,
        };
        assert!(health.is_healthy());
        assert!(!health.is_degraded());

        health.lag_ms = 2500;
        assert!(!health.is_healthy());
        assert!(health.is_degraded());

        health.status = ConnectionStatus::Disconnected;
        assert!(!health.is_degraded());
    }

    #[test]
    fn test_zscore_status_display() {
        let status = ZScoreStatus {
            metric: "spread_bps".to_string(),
            venue: Venue::Binance,
            instrument: "BTC-USDT-PERP".to_string(),
            warmed_up: false,
            sample_count: 15,
            min_samples: 30,
            progress_pct: dec!(50),
        };
        assert_eq!(status.samples_remaining(), 15);
        assert_eq!(status.display_text(), "warming up (15/30)");

        let ready = ZScoreStatus {
            warmed_up: true,
            sample_count: 30,
            progress_pct: dec!(100),
            ..status
        };
        assert_eq!(ready.display_text(), "active");
        assert_eq!(ready.samples_remaining(), 0);
    }
}
