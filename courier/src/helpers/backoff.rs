//! Exponential backoff with jitter

use rand::Rng;
use std::{iter::Iterator, time::Duration};

/// Exponential backoff iterator
///
/// Each element is the previous delay multiplied by the `multiplier`, capped at `max`.
/// Unlike a plain exponential series it never runs dry, callers that should give up at
/// some point have to [`take`](Iterator::take) from it. Every yielded delay carries equal
/// jitter, it lies within `[delay / 2, delay]` so that consumers retrying against the same
/// broker do not synchronise.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: u32,
    current: Option<Duration>,
    jitter: bool,
}

impl Backoff {
    /// Creates a new instance starting at `initial` which never exceeds `max`
    pub fn new(initial: Duration, max: Duration, multiplier: u32) -> Self {
        Self {
            initial,
            max: max.max(initial),
            multiplier: multiplier.max(1),
            current: None,
            jitter: true,
        }
    }

    /// Disables the jitter, yielding the plain exponential series
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Starts over at the initial delay
    pub fn reset(&mut self) {
        self.current = None;
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }

        let half = delay / 2;
        let spread = (delay - half).as_millis() as u64;
        let offset = rand::thread_rng().gen_range(0..=spread);

        half + Duration::from_millis(offset)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(10), 2)
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let delay = match self.current {
            None => self.initial,
            Some(current) => current
                .checked_mul(self.multiplier)
                .unwrap_or(self.max)
                .min(self.max),
        };

        self.current = Some(delay);
        Some(self.apply_jitter(delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_monotonically_increasing_until_capped() {
        let mut backoff =
            Backoff::new(Duration::from_millis(25), Duration::from_secs(1), 2).without_jitter();
        let mut previous = Duration::default();

        for _ in 0..6 {
            let duration = backoff.next().unwrap();
            assert!(previous < duration);
            previous = duration;
        }

        for _ in 0..10 {
            assert_eq!(backoff.next(), Some(Duration::from_secs(1)));
        }
    }

    #[test]
    fn backoff_starts_over_after_reset() {
        let mut backoff =
            Backoff::new(Duration::from_millis(10), Duration::from_secs(1), 3).without_jitter();

        assert_eq!(backoff.next(), Some(Duration::from_millis(10)));
        assert_eq!(backoff.next(), Some(Duration::from_millis(30)));

        backoff.reset();
        assert_eq!(backoff.next(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(800), 2);
        let expected = [100, 200, 400, 800, 800];

        for upper in expected.iter().map(|ms| Duration::from_millis(*ms)) {
            let duration = backoff.next().unwrap();
            assert!(duration >= upper / 2, "{:?} below {:?}", duration, upper / 2);
            assert!(duration <= upper, "{:?} above {:?}", duration, upper);
        }
    }
}
