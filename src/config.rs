//! Frozen configuration for an [`crate::event_source::EventSource`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::connect::{ConnectStrategy, HttpConnectStrategy};
use crate::error::{Error, Result};
use crate::error_strategy::{AlwaysThrow, ErrorStrategy};
use crate::parser::ExpectField;
use crate::retry::{ExponentialBackoff, RetryDelayStrategy};

/// Immutable, validated configuration produced by [`ConfigBuilder::build`].
///
/// `EventSource` never mutates a `Config` after construction; a call to
/// `restart` or a reconnect uses the same `Config` every time.
pub struct Config {
    pub(crate) url: String,
    pub(crate) initial_retry_delay: Duration,
    pub(crate) max_retry_delay: Duration,
    pub(crate) backoff_reset_threshold: Duration,
    pub(crate) read_timeout: Option<Duration>,
    pub(crate) last_event_id: Option<String>,
    pub(crate) expect_fields: HashSet<ExpectField>,
    pub(crate) stream_event_data: bool,
    pub(crate) error_strategy: Arc<dyn ErrorStrategy + Send + Sync>,
    pub(crate) retry_delay_strategy: Box<dyn RetryDelayStrategy + Send + Sync>,
    pub(crate) connect_strategy: Arc<dyn ConnectStrategy + Send + Sync>,
}

impl Config {
    pub fn builder(url: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(url)
    }
}

/// Builds a [`Config`], applying the same defaults `ebeans` applies to its
/// own connection settings: sane out of the box, everything overridable.
pub struct ConfigBuilder {
    url: String,
    initial_retry_delay: Duration,
    max_retry_delay: Duration,
    backoff_reset_threshold: Duration,
    read_timeout: Option<Duration>,
    last_event_id: Option<String>,
    expect_fields: HashSet<ExpectField>,
    stream_event_data: bool,
    error_strategy: Box<dyn ErrorStrategy + Send + Sync>,
    retry_delay_strategy: Box<dyn RetryDelayStrategy + Send + Sync>,
    connect_strategy: Option<Arc<dyn ConnectStrategy + Send + Sync>>,
}

impl ConfigBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            initial_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
            backoff_reset_threshold: Duration::from_secs(60),
            read_timeout: Some(Duration::from_secs(300)),
            last_event_id: None,
            expect_fields: HashSet::new(),
            stream_event_data: false,
            error_strategy: Box::new(AlwaysThrow),
            retry_delay_strategy: Box::new(ExponentialBackoff::new()),
            connect_strategy: None,
        }
    }

    pub fn initial_retry_delay(mut self, delay: Duration) -> Self {
        self.initial_retry_delay = delay;
        self
    }

    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    pub fn backoff_reset_threshold(mut self, threshold: Duration) -> Self {
        self.backoff_reset_threshold = threshold;
        self
    }

    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn last_event_id(mut self, id: impl Into<String>) -> Self {
        self.last_event_id = Some(id.into());
        self
    }

    /// Enables streaming `data:` delivery once every field in `fields` has
    /// been seen in the current message (see
    /// [`crate::parser::EventParser::enable_streaming`]).
    pub fn stream_event_data(mut self, expect_fields: HashSet<ExpectField>) -> Self {
        self.stream_event_data = true;
        self.expect_fields = expect_fields;
        self
    }

    pub fn error_strategy(mut self, strategy: impl ErrorStrategy + 'static) -> Self {
        self.error_strategy = Box::new(strategy);
        self
    }

    pub fn retry_delay_strategy(mut self, strategy: impl RetryDelayStrategy + 'static) -> Self {
        self.retry_delay_strategy = Box::new(strategy);
        self
    }

    pub fn connect_strategy(mut self, strategy: impl ConnectStrategy + 'static) -> Self {
        self.connect_strategy = Some(Arc::new(strategy));
        self
    }

    pub fn build(self) -> Result<Config> {
        if self.url.trim().is_empty() {
            return Err(Error::Configuration("url must not be empty".into()));
        }
        if self.initial_retry_delay.is_zero() {
            return Err(Error::Configuration(
                "initial_retry_delay must be greater than zero".into(),
            ));
        }
        if self.max_retry_delay < self.initial_retry_delay {
            return Err(Error::Configuration(
                "max_retry_delay must be >= initial_retry_delay".into(),
            ));
        }

        let connect_strategy = self
            .connect_strategy
            .unwrap_or_else(|| Arc::new(HttpConnectStrategy::new()));

        Ok(Config {
            url: self.url,
            initial_retry_delay: self.initial_retry_delay,
            max_retry_delay: self.max_retry_delay,
            backoff_reset_threshold: self.backoff_reset_threshold,
            read_timeout: self.read_timeout,
            last_event_id: self.last_event_id,
            expect_fields: self.expect_fields,
            stream_event_data: self.stream_event_data,
            error_strategy: Arc::from(self.error_strategy),
            retry_delay_strategy: self.retry_delay_strategy,
            connect_strategy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_url_is_rejected() {
        let result = Config::builder("   ").build();
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn zero_initial_retry_delay_is_rejected() {
        let result = Config::builder("https://example.test/events")
            .initial_retry_delay(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn max_below_initial_is_rejected() {
        let result = Config::builder("https://example.test/events")
            .initial_retry_delay(Duration::from_secs(10))
            .max_retry_delay(Duration::from_secs(1))
            .build();
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn defaults_produce_a_valid_config() {
        let config = Config::builder("https://example.test/events").build();
        assert!(config.is_ok());
    }
}
