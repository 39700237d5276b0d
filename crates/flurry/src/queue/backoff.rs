use rand::Rng;
use std::time::Duration;

/// Delay strategy for idle queues.
///
/// Each consecutive empty poll roughly doubles the delay, randomized by
/// +/-20%, capped at `max`. A poll that finds work resets it to `min`.
#[derive(Debug, Clone)]
pub struct RandomizedExponentialBackoff {
    min: Duration,
    max: Duration,
    failures: u32,
    current: Duration,
}

impl RandomizedExponentialBackoff {
    const RANDOMIZATION: f64 = 0.2;

    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            failures: 0,
            current: min,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Record a poll outcome and return the delay before the next poll.
    pub fn next_delay(&mut self, found_work: bool) -> Duration {
        if found_work {
            self.failures = 0;
            self.current = self.min;
            return self.current;
        }

        self.failures = self.failures.saturating_add(1);
        let exponent = self.failures.saturating_sub(1).min(31) as i32;
        let factor = rand::rng().random_range((1.0 - Self::RANDOMIZATION)..=(1.0 + Self::RANDOMIZATION));
        let secs = self.min.as_secs_f64() * 2f64.powi(exponent) * factor;
        self.current = Duration::from_secs_f64(secs.min(self.max.as_secs_f64())).max(self.min);
        self.current
    }
}
