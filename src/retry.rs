//! Exponential backoff with jitter, as a pure, immutable strategy value.

use std::time::Duration;

use rand::Rng;

/// The outcome of applying a [`RetryDelayStrategy`] once: the delay to wait
/// before the next connect attempt, and the strategy to use next time.
pub struct RetryDelay {
    pub delay: Duration,
    pub next: Box<dyn RetryDelayStrategy + Send + Sync>,
}

/// A pure function `(base_delay) -> (delay, next_strategy)`.
///
/// Implementations must not mutate shared state; carrying state forward
/// happens entirely through the returned `next` value, which lets a
/// supervisor reset to a known-good strategy just by keeping a clone of the
/// original around (see [`ExponentialBackoff::initial`]).
pub trait RetryDelayStrategy: Send + Sync {
    fn apply(&self, base_delay: Duration) -> RetryDelay;

    /// A descendant of this strategy reset to its starting state. Used when
    /// a connection stays `Open` past `backoff_reset_threshold`.
    fn reset(&self) -> Box<dyn RetryDelayStrategy + Send + Sync>;
}

/// The default exponential-backoff-with-jitter strategy.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    backoff_multiplier: f64,
    jitter_multiplier: f64,
    max_delay: Option<Duration>,
    last_base: Option<Duration>,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self {
            backoff_multiplier: 2.0,
            jitter_multiplier: 0.5,
            max_delay: Some(Duration::from_secs(30)),
            last_base: None,
        }
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = if multiplier == 0.0 { 1.0 } else { multiplier };
        self
    }

    pub fn with_jitter_multiplier(mut self, multiplier: f64) -> Self {
        self.jitter_multiplier = multiplier;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Option<Duration>) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// The strategy reset to its starting (no prior attempts) state.
    pub fn initial(&self) -> Self {
        Self {
            last_base: None,
            ..self.clone()
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryDelayStrategy for ExponentialBackoff {
    fn apply(&self, base_delay: Duration) -> RetryDelay {
        let mut current_base = match self.last_base {
            Some(prev) => prev.mul_f64(self.backoff_multiplier),
            None => base_delay,
        };
        if let Some(max) = self.max_delay {
            current_base = current_base.min(max);
        }

        let actual = if self.jitter_multiplier > 0.0 {
            let jitter_window = current_base.mul_f64(self.jitter_multiplier);
            let drawn = rand::thread_rng().gen_range(0.0..1.0);
            current_base
                .checked_sub(jitter_window.mul_f64(drawn))
                .unwrap_or(Duration::ZERO)
        } else {
            current_base
        };

        let next = Self {
            last_base: Some(current_base),
            ..self.clone()
        };

        RetryDelay {
            delay: actual,
            next: Box::new(next),
        }
    }

    fn reset(&self) -> Box<dyn RetryDelayStrategy + Send + Sync> {
        Box::new(self.initial())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_uses_base_delay_minus_jitter() {
        let strategy = ExponentialBackoff::new().with_jitter_multiplier(0.0);
        let result = strategy.apply(Duration::from_secs(1));
        assert_eq!(result.delay, Duration::from_secs(1));
    }

    #[test]
    fn successive_attempts_increase_without_jitter() {
        let strategy = ExponentialBackoff::new().with_jitter_multiplier(0.0);
        let first = strategy.apply(Duration::from_millis(100));
        let second = first.next.apply(Duration::from_millis(100));
        let third = second.next.apply(Duration::from_millis(100));

        assert_eq!(first.delay, Duration::from_millis(100));
        assert_eq!(second.delay, Duration::from_millis(200));
        assert_eq!(third.delay, Duration::from_millis(400));
    }

    #[test]
    fn delay_is_capped_at_max_delay() {
        let strategy = ExponentialBackoff::new()
            .with_jitter_multiplier(0.0)
            .with_max_delay(Some(Duration::from_millis(250)));

        let mut current = strategy.apply(Duration::from_millis(100));
        for _ in 0..10 {
            current = current.next.apply(Duration::from_millis(100));
        }
        assert_eq!(current.delay, Duration::from_millis(250));
    }

    #[test]
    fn jitter_never_produces_a_negative_delay() {
        let strategy = ExponentialBackoff::new().with_jitter_multiplier(0.5);
        for _ in 0..100 {
            let result = strategy.apply(Duration::from_millis(10));
            assert!(result.delay <= Duration::from_millis(10));
        }
    }

    #[test]
    fn zero_backoff_multiplier_is_treated_as_one() {
        let strategy = ExponentialBackoff::new()
            .with_backoff_multiplier(0.0)
            .with_jitter_multiplier(0.0);
        let first = strategy.apply(Duration::from_millis(100));
        let second = first.next.apply(Duration::from_millis(100));
        assert_eq!(second.delay, Duration::from_millis(100));
    }

    #[test]
    fn reset_forgets_prior_attempts() {
        let strategy = ExponentialBackoff::new().with_jitter_multiplier(0.0);
        let advanced = strategy.apply(Duration::from_millis(100));
        let advanced = advanced.next.apply(Duration::from_millis(100));
        assert_eq!(advanced.delay, Duration::from_millis(200));

        let reset = advanced.next.reset();
        let after_reset = reset.apply(Duration::from_millis(100));
        assert_eq!(after_reset.delay, Duration::from_millis(100));
    }
}
