//! Reconnect delay schedule with multiplicative jitter.

use std::time::Duration;

use rand::Rng;

/// Base delays for successive reconnect attempts.
pub const DEFAULT_SCHEDULE: [Duration; 5] = [
    Duration::from_secs(30),
    Duration::from_secs(60),
    Duration::from_secs(120),
    Duration::from_secs(240),
    Duration::from_secs(480),
];

pub const DEFAULT_JITTER: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    schedule: Vec<Duration>,
    jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEDULE.to_vec(), DEFAULT_JITTER)
    }
}

impl Backoff {
    /// `jitter` is clamped to `[0, 1]`.
    pub fn new(schedule: Vec<Duration>, jitter: f64) -> Self {
        let jitter = if jitter.is_finite() { jitter.clamp(0.0, 1.0) } else { 0.0 };
        Self { schedule, jitter }
    }

    pub fn max_attempts(&self) -> usize {
        self.schedule.len()
    }

    /// Delay before attempt `attempt` (zero-based), drawn uniformly from
    /// `[base * (1 - jitter), base * (1 + jitter))`. `None` once the
    /// schedule is exhausted.
    pub fn delay_for(&self, attempt: usize) -> Option<Duration> {
        let base = *self.schedule.get(attempt)?;
        if self.jitter == 0.0 {
            return Some(base);
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..(1.0 + self.jitter));
        Some(base.mul_f64(factor))
    }
}
