use std::time::Duration;

use rand::{Rng, SeedableRng, rngs::SmallRng};

use super::types::ReconnectStrategy;

/// Capped exponential backoff between reconnect attempts.
///
/// Policy lives here rather than in the connection actor so hosts can pick base/max/factor for
/// their push endpoint. Delays grow by `factor` per consecutive failure and never exceed `max`.
#[derive(Clone, Debug)]
pub struct BackoffReconnect {
    base: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
    jitter: bool,
    retry: bool,
}

impl BackoffReconnect {
    pub fn new(base: Duration, max: Duration, factor: f64) -> Self {
        let factor = if factor.is_finite() && factor > 1.0 {
            factor
        } else {
            1.5
        };
        let max = max.max(base);
        Self {
            base,
            max,
            factor,
            current: base,
            jitter: false,
            retry: true,
        }
    }

    /// Randomise each delay into `[delay / 2, delay]` so many clients do not reconnect in lockstep.
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Stop retrying altogether; the connection stays in `Error` after the next failure.
    pub fn abort(mut self) -> Self {
        self.retry = false;
        self
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}

impl Default for BackoffReconnect {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), 1.5)
    }
}

impl ReconnectStrategy for BackoffReconnect {
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let next = (self.current.as_secs_f64() * self.factor).min(self.max.as_secs_f64());
        // Near `Duration::MAX` the f64 round trip can overshoot the representable range.
        self.current = Duration::try_from_secs_f64(next).map_or(self.max, |d| d.min(self.max));
        if self.jitter {
            jitter_delay(delay)
        } else {
            delay
        }
    }

    fn reset(&mut self) {
        self.current = self.base;
    }

    fn should_retry(&self) -> bool {
        self.retry
    }
}

pub fn jitter_delay(base: Duration) -> Duration {
    if base.is_zero() {
        return base;
    }

    let mut rng = SmallRng::from_entropy();
    let jitter: f64 = rng.gen_range(0.5..=1.0);
    let nanos = (base.as_nanos() as f64 * jitter) as u128;
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}
