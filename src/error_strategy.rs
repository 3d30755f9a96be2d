//! Policy for whether a connection error should be raised to the caller or
//! swallowed so the supervisor keeps reconnecting.
//!
//! Mirrors [`crate::retry::RetryDelayStrategy`]'s shape: a pure, immutable
//! `apply(error) -> (decision, next_strategy)` rather than a mutable
//! `&mut self` method, so the supervisor can reset to a known-good policy
//! just by keeping a reference to the original value (see
//! [`crate::event_source::EventSource`]'s use of `Config::error_strategy`).

use std::time::{Duration, Instant};

use crate::error::Error;

/// What an [`ErrorStrategy`] decided to do with a given error.
#[derive(Debug, Eq, PartialEq)]
pub enum ErrorDecision {
    /// Propagate the error to the caller and stop reconnecting.
    Throw,
    /// Swallow the error and let the supervisor reconnect.
    Continue,
}

/// The outcome of applying an [`ErrorStrategy`] once: the decision for this
/// error, and the strategy to use for the next one.
pub struct ErrorOutcome {
    pub decision: ErrorDecision,
    pub next: Box<dyn ErrorStrategy + Send + Sync>,
}

/// Decides, for each connection error, whether the supervisor should give up
/// or keep retrying. Fatal protocol errors (see
/// [`Error::is_fatal_protocol_error`]) always throw regardless of policy.
///
/// Implementations must not mutate shared state; a strategy that needs to
/// count attempts or track elapsed time carries that state forward in the
/// returned `next` value, the same way [`crate::retry::RetryDelayStrategy`]
/// does.
pub trait ErrorStrategy: Send + Sync {
    fn apply(&self, error: &Error) -> ErrorOutcome;
}

/// Always propagates every error.
#[derive(Debug, Default)]
pub struct AlwaysThrow;

impl ErrorStrategy for AlwaysThrow {
    fn apply(&self, _error: &Error) -> ErrorOutcome {
        ErrorOutcome {
            decision: ErrorDecision::Throw,
            next: Box::new(Self),
        }
    }
}

/// Never propagates an error; the supervisor retries forever.
#[derive(Debug, Default)]
pub struct AlwaysContinue;

impl ErrorStrategy for AlwaysContinue {
    fn apply(&self, _error: &Error) -> ErrorOutcome {
        ErrorOutcome {
            decision: ErrorDecision::Continue,
            next: Box::new(Self),
        }
    }
}

/// Continues reconnecting until `max_attempts` consecutive errors have been
/// seen, then throws.
#[derive(Debug, Clone)]
pub struct ContinueWithMaxAttempts {
    max_attempts: u32,
    attempts_so_far: u32,
}

impl ContinueWithMaxAttempts {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            attempts_so_far: 0,
        }
    }
}

impl ErrorStrategy for ContinueWithMaxAttempts {
    fn apply(&self, _error: &Error) -> ErrorOutcome {
        let attempt = self.attempts_so_far + 1;
        let decision = if attempt >= self.max_attempts {
            ErrorDecision::Throw
        } else {
            ErrorDecision::Continue
        };
        let next = Self {
            max_attempts: self.max_attempts,
            attempts_so_far: attempt,
        };
        ErrorOutcome {
            decision,
            next: Box::new(next),
        }
    }
}

/// Continues reconnecting until the first error in the current run of
/// consecutive errors is more than `limit` old, then throws.
#[derive(Debug, Clone)]
pub struct ContinueWithTimeLimit {
    limit: Duration,
    first_error_at: Option<Instant>,
}

impl ContinueWithTimeLimit {
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            first_error_at: None,
        }
    }
}

impl ErrorStrategy for ContinueWithTimeLimit {
    fn apply(&self, _error: &Error) -> ErrorOutcome {
        let first_error_at = self.first_error_at.unwrap_or_else(Instant::now);
        let elapsed = first_error_at.elapsed();
        let decision = if elapsed > self.limit {
            ErrorDecision::Throw
        } else {
            ErrorDecision::Continue
        };
        let next = Self {
            limit: self.limit,
            first_error_at: Some(first_error_at),
        };
        ErrorOutcome {
            decision,
            next: Box::new(next),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_error() -> Error {
        Error::StreamClosedByServer
    }

    #[test]
    fn always_throw_throws_on_first_attempt() {
        let s = AlwaysThrow;
        assert_eq!(s.apply(&sample_error()).decision, ErrorDecision::Throw);
    }

    #[test]
    fn always_continue_never_throws() {
        let s: Box<dyn ErrorStrategy + Send + Sync> = Box::new(AlwaysContinue);
        let mut current = s;
        for _ in 0..1000 {
            let outcome = current.apply(&sample_error());
            assert_eq!(outcome.decision, ErrorDecision::Continue);
            current = outcome.next;
        }
    }

    #[test]
    fn max_attempts_throws_once_reached() {
        let strategy = ContinueWithMaxAttempts::new(3);
        let first = strategy.apply(&sample_error());
        assert_eq!(first.decision, ErrorDecision::Continue);

        let second = first.next.apply(&sample_error());
        assert_eq!(second.decision, ErrorDecision::Continue);

        let third = second.next.apply(&sample_error());
        assert_eq!(third.decision, ErrorDecision::Throw);
    }

    #[test]
    fn time_limit_continues_within_window() {
        let strategy = ContinueWithTimeLimit::new(Duration::from_secs(60));
        let first = strategy.apply(&sample_error());
        assert_eq!(first.decision, ErrorDecision::Continue);

        let second = first.next.apply(&sample_error());
        assert_eq!(second.decision, ErrorDecision::Continue);
    }

    #[test]
    fn time_limit_throws_once_elapsed_exceeds_limit() {
        let strategy = ContinueWithTimeLimit::new(Duration::from_nanos(1));
        let first = strategy.apply(&sample_error());
        assert_eq!(first.decision, ErrorDecision::Continue);

        std::thread::sleep(Duration::from_millis(5));
        let second = first.next.apply(&sample_error());
        assert_eq!(second.decision, ErrorDecision::Throw);
    }
}
