//! Rolling-window z-score with warmup and flat-market guards.
//!
//! The calculator never emits during warmup, never divides by near-zero
//! variance, and is reset by the pipeline when a data gap long enough to
//! invalidate the prior distribution arrives. Absence of a z-score is a
//! guard state, not an error.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, MathematicalOps};
use tracing::{debug, info};

/// Rolling z-score calculator for one (metric, venue, instrument) series.
#[derive(Debug)]
pub struct ZScoreCalculator {
    /// Identity for logging only.
    name: String,
    window_size: usize,
    min_samples: usize,
    min_std: Decimal,
    warmup_log_interval: Duration,

    buffer: VecDeque<Decimal>,
    warmed_up: bool,
    last_warmup_log: Option<DateTime<Utc>>,
}

impl ZScoreCalculator {
    pub fn new(
        name: impl Into<String>,
        window_size: usize,
        min_samples: usize,
        min_std: Decimal,
        warmup_log_interval: Duration,
    ) -> Self {
        debug_assert!(window_size >= min_samples);
        Self {
            name: name.into(),
            window_size,
            min_samples,
            min_std,
            warmup_log_interval,
            buffer: VecDeque::with_capacity(window_size),
            warmed_up: false,
            last_warmup_log: None,
        }
    }

    /// Append a sample and compute the z-score over the window.
    ///
    /// Returns `None` while fewer than `min_samples` samples are buffered
    /// (warmup) or when the sample standard deviation is below `min_std`
    /// (flat market). The result is rounded to four decimal places.
    pub fn add_sample(&mut self, value: Decimal, timestamp: DateTime<Utc>) -> Option<Decimal> {
        if self.buffer.len() == self.window_size {
            self.buffer.pop_front();
        }
        self.buffer.push_back(value);

        if self.buffer.len() < self.min_samples {
            self.log_warmup_progress(timestamp);
            return None;
        }

        let mean = self.mean();
        let std = self.sample_std(mean);

        if std < self.min_std {
            return None;
        }

        if !self.warmed_up {
            self.warmed_up = true;
            info!(
                series = %self.name,
                samples = self.buffer.len(),
                "Z-score warmed up"
            );
        }

        Some(((value - mean) / std).round_dp(4))
    }

    /// Empty the window and clear the warmed-up state.
    ///
    /// Called when a gap marker with duration at or above the reset
    /// threshold arrives for the corresponding (venue, instrument).
    pub fn reset(&mut self, reason: &str) {
        info!(
            series = %self.name,
            samples_dropped = self.buffer.len(),
            reason,
            "Z-score state reset"
        );
        self.buffer.clear();
        self.warmed_up = false;
        self.last_warmup_log = None;
    }

    pub fn sample_count(&self) -> usize {
        self.buffer.len()
    }

    pub fn min_samples(&self) -> usize {
        self.min_samples
    }

    pub fn is_warmed_up(&self) -> bool {
        self.warmed_up
    }

    /// Warmup progress in percent, capped at 100.
    pub fn progress_pct(&self) -> Decimal {
        if self.min_samples == 0 {
            return Decimal::from(100);
        }
        let pct = Decimal::from(self.buffer.len() * 100) / Decimal::from(self.min_samples);
        pct.min(Decimal::from(100))
    }

    fn mean(&self) -> Decimal {
        let sum: Decimal = self.buffer.iter().copied().sum();
        sum / Decimal::from(self.buffer.len() as u64)
    }

    /// Sample standard deviation (n - 1 denominator).
    fn sample_std(&self, mean: Decimal) -> Decimal {
        let n = self.buffer.len();
        if n <= 1 {
            return Decimal::ZERO;
        }
        let variance_sum: Decimal = self
            .buffer
            .iter()
            .map(|value| {
                let diff = *value - mean;
                diff * diff
            })
            .sum();
        let variance = variance_sum / Decimal::from((n - 1) as u64);
        variance.sqrt().unwrap_or(Decimal::ZERO)
    }

    /// Log warmup progress at most once per interval.
    fn log_warmup_progress(&mut self, timestamp: DateTime<Utc>) {
        let should_log = match self.last_warmup_log {
            None => true,
            Some(last) => {
                let elapsed = (timestamp - last).num_milliseconds().max(0) as u128;
                elapsed >= self.warmup_log_interval.as_millis()
            }
        };
        if should_log {
            debug!(
                series = %self.name,
                samples = self.buffer.len(),
                required = self.min_samples,
                "Z-score warming up"
            );
            self.last_warmup_log = Some(timestamp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn calculator(window: usize, min_samples: usize) -> ZScoreCalculator {
        ZScoreCalculator::new(
            "spread_bps:binance:BTC-USDT-PERP",
            window,
            min_samples,
            dec!(0.0001),
            Duration::from_secs(30),
        )
    }

    #[test]
    fn test_warmup_returns_none() {
        let mut calc = calculator(100, 30);
        let now = Utc::now();

        // Invariant: any sequence shorter than min_samples is all None
        for i in 0..29 {
            assert!(
                calc.add_sample(Decimal::from(i), now).is_none(),
                "sample {i} should be absent"
            );
        }
        assert!(!calc.is_warmed_up());

        // The 30th sample with real variance produces a value
        assert!(calc.add_sample(dec!(100), now).is_some());
        assert!(calc.is_warmed_up());
    }

    #[test]
    fn test_flat_market_guard() {
        let mut calc = calculator(100, 30);
        let now = Utc::now();

        // Identical samples: std is zero, always absent
        for _ in 0..50 {
            assert!(calc.add_sample(dec!(2.0), now).is_none());
        }
        assert!(!calc.is_warmed_up());
    }

    #[test]
    fn test_zscore_value() {
        let mut calc = calculator(100, 3);
        let now = Utc::now();

        calc.add_sample(dec!(1), now);
        calc.add_sample(dec!(2), now);
        let z = calc.add_sample(dec!(3), now).unwrap();

        // window [1,2,3]: mean 2, sample std 1, z = (3-2)/1 = 1
        assert_eq!(z, dec!(1.0000));
    }

    #[test]
    fn test_zscore_rounded_to_four_places() {
        let mut calc = calculator(100, 3);
        let now = Utc::now();

        calc.add_sample(dec!(1), now);
        calc.add_sample(dec!(2), now);
        calc.add_sample(dec!(4), now);
        let z = calc.add_sample(dec!(7), now).unwrap();

        assert_eq!(z, z.round_dp(4));
        assert!(z.scale() <= 4);
    }

    #[test]
    fn test_window_eviction() {
        let mut calc = calculator(5, 3);
        let now = Utc::now();

        for i in 0..20 {
            calc.add_sample(Decimal::from(i), now);
        }
        assert_eq!(calc.sample_count(), 5);
    }

    #[test]
    fn test_reset_restarts_warmup() {
        let mut calc = calculator(100, 5);
        let now = Utc::now();

        for i in 0..10 {
            calc.add_sample(Decimal::from(i), now);
        }
        assert!(calc.is_warmed_up());

        calc.reset("gap");
        assert_eq!(calc.sample_count(), 0);
        assert!(!calc.is_warmed_up());

        // Invariant: first min_samples - 1 calls after reset are absent
        for i in 0..4 {
            assert!(calc.add_sample(Decimal::from(i * 3), now).is_none());
        }
        assert!(calc.add_sample(dec!(100), now).is_some());
    }

    #[test]
    fn test_progress_pct() {
        let mut calc = calculator(100, 30);
        let now = Utc::now();

        assert_eq!(calc.progress_pct(), dec!(0));
        for i in 0..15 {
            calc.add_sample(Decimal::from(i), now);
        }
        assert_eq!(calc.progress_pct(), dec!(50));
        for i in 0..30 {
            calc.add_sample(Decimal::from(i), now);
        }
        assert_eq!(calc.progress_pct(), dec!(100));
    }

    #[test]
    fn test_absence_distinguishable_from_zero() {
        let mut calc = calculator(100, 3);
        let now = Utc::now();

        calc.add_sample(dec!(1), now);
        calc.add_sample(dec!(3), now);
        // Sample equal to the running mean gives z = 0, not None
        let z = calc.add_sample(dec!(2), now);
        assert_eq!(z, Some(dec!(0.0000)));
    }
}
