//! Persistence tracking for time-based alert conditions.
//!
//! A cell records when a condition first evaluated true. The cell is
//! cleared whenever the evaluation becomes false, when the alert fires, or
//! when a qualifying data gap invalidates the observation window.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use vigil_common::alerts::ConditionKey;
use vigil_common::types::Venue;

/// Tracks how long conditions have been continuously true.
#[derive(Debug, Default)]
pub struct PersistenceTracker {
    cells: HashMap<ConditionKey, DateTime<Utc>>,
}

impl PersistenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a condition state change.
    ///
    /// `is_met = true` starts tracking if not already tracking and returns
    /// the first-seen time. `is_met = false` clears any existing cell and
    /// returns None.
    pub fn track(
        &mut self,
        key: &ConditionKey,
        is_met: bool,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if is_met {
            let first_seen = *self.cells.entry(key.clone()).or_insert_with(|| {
                debug!(condition = %key, "Persistence tracking started");
                now
            });
            Some(first_seen)
        } else {
            if self.cells.remove(key).is_some() {
                debug!(condition = %key, "Persistence tracking cleared");
            }
            None
        }
    }

    /// Continuous duration for a tracked condition.
    pub fn duration(&self, key: &ConditionKey, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.cells.get(key).map(|first_seen| now - *first_seen)
    }

    /// True when the condition has held for at least `required_seconds`.
    pub fn is_met(&self, key: &ConditionKey, required_seconds: u64, now: DateTime<Utc>) -> bool {
        match self.duration(key, now) {
            Some(duration) => duration.num_seconds() >= required_seconds as i64,
            None => false,
        }
    }

    pub fn first_seen(&self, key: &ConditionKey) -> Option<DateTime<Utc>> {
        self.cells.get(key).copied()
    }

    /// Clear one cell (used when an alert fires).
    pub fn clear(&mut self, key: &ConditionKey) {
        self.cells.remove(key);
    }

    /// Clear every cell for a (venue, instrument), used on gap resets.
    pub fn clear_for(&mut self, venue: Venue, instrument: &str) {
        let before = self.cells.len();
        self.cells
            .retain(|key, _| !(key.venue == venue && key.instrument == instrument));
        let cleared = before - self.cells.len();
        if cleared > 0 {
            debug!(venue = %venue, instrument, cleared, "Persistence cells cleared by gap");
        }
    }

    pub fn clear_all(&mut self) {
        self.cells.clear();
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn contains(&self, key: &ConditionKey) -> bool {
        self.cells.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ConditionKey {
        ConditionKey::new("basis_warning", Venue::Binance, "BTC-USDT-PERP")
    }

    #[test]
    fn test_track_starts_and_keeps_first_seen() {
        let mut tracker = PersistenceTracker::new();
        let t0 = Utc::now();

        let first = tracker.track(&key(), true, t0).unwrap();
        assert_eq!(first, t0);

        // Later true evaluations keep the original start
        let t1 = t0 + chrono::Duration::seconds(30);
        let first = tracker.track(&key(), true, t1).unwrap();
        assert_eq!(first, t0);
    }

    #[test]
    fn test_false_evaluation_clears() {
        let mut tracker = PersistenceTracker::new();
        let t0 = Utc::now();

        tracker.track(&key(), true, t0);
        assert!(tracker.contains(&key()));

        assert!(tracker.track(&key(), false, t0).is_none());
        assert!(!tracker.contains(&key()));
        assert!(tracker.duration(&key(), t0).is_none());
    }

    #[test]
    fn test_duration_and_is_met() {
        let mut tracker = PersistenceTracker::new();
        let t0 = Utc::now();
        tracker.track(&key(), true, t0);

        let t1 = t0 + chrono::Duration::seconds(119);
        assert_eq!(tracker.duration(&key(), t1).unwrap().num_seconds(), 119);
        assert!(!tracker.is_met(&key(), 120, t1));

        let t2 = t0 + chrono::Duration::seconds(120);
        assert!(tracker.is_met(&key(), 120, t2));
    }

    #[test]
    fn test_is_met_false_when_untracked() {
        let tracker = PersistenceTracker::new();
        assert!(!tracker.is_met(&key(), 0, Utc::now()));
    }

    #[test]
    fn test_clear_for_scoped_to_venue_instrument() {
        let mut tracker = PersistenceTracker::new();
        let now = Utc::now();
        let btc = key();
        let eth = ConditionKey::new("basis_warning", Venue::Binance, "ETH-USDT-PERP");
        let okx = ConditionKey::new("basis_warning", Venue::Okx, "BTC-USDT-PERP");

        tracker.track(&btc, true, now);
        tracker.track(&eth, true, now);
        tracker.track(&okx, true, now);
        assert_eq!(tracker.len(), 3);

        tracker.clear_for(Venue::Binance, "BTC-USDT-PERP");
        assert_eq!(tracker.len(), 2);
        assert!(!tracker.contains(&btc));
        assert!(tracker.contains(&eth));
        assert!(tracker.contains(&okx));
    }
}
