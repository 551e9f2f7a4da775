//! Delay schedule between retry attempts

use rand::Rng;
use std::time::Duration;

/// Geometric backoff: `initial * multiplier^(attempt - 1)`, capped at `max`.
///
/// A multiplier of 1.0 gives a fixed delay.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    initial: Duration,
    multiplier: f64,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial: delay,
            multiplier: 1.0,
            max: delay,
            jitter: false,
        }
    }

    /// Grow each delay by `multiplier`, never beyond `max`
    pub fn growing(initial: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            initial,
            multiplier: multiplier.max(1.0),
            max: max.max(initial),
            jitter: false,
        }
    }

    /// Spread each delay by up to 20% either way
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay after the given failed attempt (1-indexed)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = if exponent == 0 || self.multiplier == 1.0 {
            self.initial.min(self.max)
        } else if scaled.is_finite() {
            Duration::from_secs_f64(scaled.min(self.max.as_secs_f64()))
        } else {
            self.max
        };

        if self.jitter {
            capped.mul_f64(rand::thread_rng().gen_range(0.8..1.2))
        } else {
            capped
        }
    }
}
