use std::time::Duration;

use rand::{thread_rng, Rng};

/// Exponential backoff with full jitter, pacing retries of failed chain
/// RPC work.
pub struct ExponentialBackoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
    jitter: bool,
}

impl ExponentialBackoff {
    pub fn new(base: Duration) -> Self {
        ExponentialBackoff {
            base,
            cap: base.saturating_mul(32),
            attempt: 0,
            jitter: true,
        }
    }

    pub fn with_cap(mut self, cap: Duration) -> Self {
        self.cap = cap;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// The next pause: doubles per failure until the cap, drawn uniformly
    /// from `0..pause` when jitter is on.
    pub fn next_sleep(&mut self) -> Duration {
        let factor = 1u32 << self.attempt.min(31);
        let pause = self.base.saturating_mul(factor).min(self.cap);
        if pause < self.cap {
            self.attempt += 1;
        }
        if self.jitter {
            thread_rng().gen_range(Duration::ZERO..pause.max(Duration::from_nanos(1)))
        } else {
            pause
        }
    }

    /// Back to the base pause after a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_the_cap_and_resets() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(1))
            .with_cap(Duration::from_secs(8))
            .with_jitter(false);
        assert_eq!(backoff.next_sleep(), Duration::from_secs(1));
        assert_eq!(backoff.next_sleep(), Duration::from_secs(2));
        assert_eq!(backoff.next_sleep(), Duration::from_secs(4));
        assert_eq!(backoff.next_sleep(), Duration::from_secs(8));
        assert_eq!(backoff.next_sleep(), Duration::from_secs(8));
        backoff.reset();
        assert_eq!(backoff.next_sleep(), Duration::from_secs(1));
    }

    #[test]
    fn jittered_pause_stays_below_the_cap() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(1));
        for _ in 0..40 {
            assert!(backoff.next_sleep() < Duration::from_secs(32));
        }
    }
}
