// src/stats/hashrate.rs
//! Rolling hash-rate estimate
//!
//! Nonces processed are recorded as timestamped samples; the rate is the sum
//! of samples inside the window divided by the time covered.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding-window hash-rate meter
#[derive(Debug, Clone)]
pub struct HashrateMeter {
    window: Duration,
    started: Instant,
    samples: VecDeque<(Instant, u64)>,
}

impl HashrateMeter {
    /// Creates a meter averaging over `window`
    pub fn new(window: Duration) -> Self {
        Self::starting_at(window, Instant::now())
    }

    /// Creates a meter whose clock starts at `started`
    pub fn starting_at(window: Duration, started: Instant) -> Self {
        HashrateMeter {
            window,
            started,
            samples: VecDeque::new(),
        }
    }

    /// Records `hashes` nonces finished now
    pub fn record(&mut self, hashes: u64) {
        self.record_at(Instant::now(), hashes);
    }

    /// Records `hashes` nonces finished at `at`
    pub fn record_at(&mut self, at: Instant, hashes: u64) {
        self.samples.push_back((at, hashes));
        self.prune(at);
    }

    /// Hashes per second over the window ending now
    pub fn rate(&mut self) -> f64 {
        self.rate_at(Instant::now())
    }

    /// Hashes per second over the window ending at `now`
    pub fn rate_at(&mut self, now: Instant) -> f64 {
        self.prune(now);
        let covered = now.saturating_duration_since(self.started).min(self.window);
        if covered.is_zero() {
            return 0.0;
        }
        let total: u64 = self.samples.iter().map(|(_, n)| n).sum();
        total as f64 / covered.as_secs_f64()
    }

    /// Forgets every sample
    pub fn reset(&mut self) {
        self.samples.clear();
        self.started = Instant::now();
    }

    fn prune(&mut self, now: Instant) {
        let Some(horizon) = now.checked_sub(self.window) else {
            return;
        };
        while self.samples.front().is_some_and(|(at, _)| *at < horizon) {
            self.samples.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_is_sum_over_elapsed_time() {
        let t0 = Instant::now();
        let mut meter = HashrateMeter::starting_at(Duration::from_secs(60), t0);
        meter.record_at(t0 + Duration::from_secs(1), 1_000);
        meter.record_at(t0 + Duration::from_secs(2), 3_000);

        let rate = meter.rate_at(t0 + Duration::from_secs(4));
        assert!((rate - 1_000.0).abs() < 1e-6, "rate was {}", rate);
    }

    #[test]
    fn old_samples_leave_the_window() {
        let t0 = Instant::now();
        let mut meter = HashrateMeter::starting_at(Duration::from_secs(10), t0);
        meter.record_at(t0 + Duration::from_secs(1), 50_000);
        meter.record_at(t0 + Duration::from_secs(15), 2_000);

        let rate = meter.rate_at(t0 + Duration::from_secs(20));
        assert!((rate - 200.0).abs() < 1e-6, "rate was {}", rate);
    }

    #[test]
    fn empty_meter_reports_zero() {
        let t0 = Instant::now();
        let mut meter = HashrateMeter::starting_at(Duration::from_secs(10), t0);
        assert_eq!(meter.rate_at(t0), 0.0);
        assert_eq!(meter.rate_at(t0 + Duration::from_secs(3)), 0.0);
    }
}
