//! Exponential backoff with jitter for retry loops.

use std::time::Duration;

use rand::Rng;

/// Default first retry delay.
pub const DEFAULT_MIN_BACKOFF: Duration = Duration::from_millis(10);

/// Default retry delay cap.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(1);

const BACKOFF_MULTIPLIER: u32 = 2;

/// Doubling delay sequence capped at `max`, with up to +50% jitter so that
/// waiters released together do not retry in lockstep.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
        }
    }

    /// Returns the next delay and advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * BACKOFF_MULTIPLIER).min(self.max);

        let jitter_range = base.as_millis() as u64 / 2;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..=jitter_range)
        } else {
            0
        };
        (base + Duration::from_millis(jitter)).min(self.max + self.max / 2)
    }

    /// Restarts the sequence at the minimum delay.
    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_BACKOFF, DEFAULT_MAX_BACKOFF)
    }
}
