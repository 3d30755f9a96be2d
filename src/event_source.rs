//! The reconnecting supervisor: owns the connection lifecycle, backoff, and
//! error policy around a [`crate::parser::EventParser`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncRead;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::config::Config;
use crate::connect::into_async_read;
use crate::error::{Error, Result};
use crate::error_strategy::{ErrorDecision, ErrorStrategy};
use crate::line_scanner::LineScanner;
use crate::parser::{self, EventParser};
use crate::retry::RetryDelayStrategy;

/// The body stream, behind a single concrete type so the public API doesn't
/// leak the `T: AsyncRead` parameter the parser is generic over.
pub type StreamBody = std::pin::Pin<Box<dyn AsyncRead + Send + Unpin>>;

pub type MessageEvent<'a> = parser::MessageEvent<'a, StreamBody>;
pub type MessageData<'a> = parser::MessageData<'a, StreamBody>;
pub type DataReader<'a> = parser::DataReader<'a, StreamBody>;

/// An event produced by [`EventSource::read_any_event`].
///
/// `Started`, `Faulted`, and `Closed` are lifecycle events synthesized by the
/// supervisor itself (never by the parser): `Started` on every successful
/// connect, `Faulted` + `Closed` whenever a connect/read error is swallowed
/// by the configured [`crate::error_strategy::ErrorStrategy`] and the
/// supervisor is about to retry.
pub enum Event<'a> {
    Started,
    Message(MessageEvent<'a>),
    Comment(parser::CommentEvent),
    SetRetryDelay(parser::SetRetryDelayEvent),
    Faulted(Error),
    Closed,
}

/// A lifecycle event queued for delivery, owned (no borrow into the parser)
/// so it can sit in [`EventSource::pending`] across calls.
enum PendingEvent {
    Started,
    Faulted(Error),
    Closed,
}

impl PendingEvent {
    fn into_event<'a>(self) -> Event<'a> {
        match self {
            PendingEvent::Started => Event::Started,
            PendingEvent::Faulted(error) => Event::Faulted(error),
            PendingEvent::Closed => Event::Closed,
        }
    }
}

/// Mirrors the WHATWG `EventSource.readyState` states, plus a terminal
/// `Shutdown` state this crate adds for caller-initiated close and fatal
/// protocol errors (the spec's `CLOSED` conflates both "about to reconnect"
/// and "never reconnecting again").
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadyState {
    /// Never connected.
    Raw,
    /// A connection attempt is in flight.
    Connecting,
    /// Connected and able to receive events.
    Open,
    /// The connection dropped and a reconnect attempt is pending.
    Closed,
    /// Will never reconnect: the caller closed it, or the server asked us
    /// (via a fatal protocol error) to stop.
    Shutdown,
}

/// A reconnecting Server-Sent Events client.
///
/// Owns exactly one logical reader: there is no internal locking, and
/// `read_any_event`/`read_message` are not meant to be called concurrently
/// from two tasks (use [`crate::background`] for a push-style API that
/// handles this for you).
pub struct EventSource {
    config: Arc<Config>,
    state: ReadyState,
    parser: Option<EventParser<StreamBody>>,
    cancel: CancellationToken,
    retry_strategy: Box<dyn RetryDelayStrategy + Send + Sync>,
    /// The base delay fed into `retry_strategy.apply(...)`. Seeded from
    /// `config.initial_retry_delay` and overwritten whenever the server
    /// sends a `retry:` field (§4.5 step 6).
    base_retry_delay: Duration,
    last_open_at: Option<Instant>,
    /// The current link in the error-handling successor chain, reset to
    /// `config.error_strategy` whenever the backoff itself resets (see
    /// [`EventSource::restart`] and [`EventSource::connect_with_backoff`]).
    error_strategy: Arc<dyn ErrorStrategy + Send + Sync>,
    last_event_id: Option<String>,
    /// Lifecycle events (`Started`/`Faulted`/`Closed`) queued for delivery,
    /// drained one per [`EventSource::read_any_event`] call before any new
    /// connect/read work happens.
    pending: VecDeque<PendingEvent>,
}

impl EventSource {
    pub fn new(config: Config) -> Self {
        Self::with_cancellation(config, CancellationToken::new())
    }

    /// Uses an externally owned [`CancellationToken`], so a caller can
    /// cancel several `EventSource`s (or other work) together.
    pub fn with_cancellation(config: Config, cancel: CancellationToken) -> Self {
        let retry_strategy = config.retry_delay_strategy.reset();
        let base_retry_delay = config.initial_retry_delay;
        let error_strategy = config.error_strategy.clone();
        let last_event_id = config.last_event_id.clone();
        Self {
            config: Arc::new(config),
            state: ReadyState::Raw,
            parser: None,
            cancel,
            retry_strategy,
            base_retry_delay,
            last_open_at: None,
            error_strategy,
            last_event_id,
            pending: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ReadyState {
        self.state
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Returns a token that cancels when this `EventSource`'s owner should
    /// stop work that depends on it (cancelled by [`EventSource::close`]).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Permanently stops the supervisor. Any in-flight or subsequent read
    /// resolves to [`Error::StreamClosedByCaller`]. Idempotent: a second
    /// call is a no-op.
    pub fn close(&mut self) {
        if self.state == ReadyState::Shutdown {
            return;
        }
        self.state = ReadyState::Shutdown;
        self.parser = None;
        self.pending.clear();
        self.cancel.cancel();
    }

    /// Forces a fresh connection on the next read, discarding the current
    /// one. The next read transitions through `Closed -> Connecting ->
    /// Open` with a delay, same as any other reconnect. When
    /// `reset_backoff` is true, the retry delay strategy is reset to its
    /// initial state as though no errors had occurred.
    pub fn restart(&mut self, reset_backoff: bool) {
        if self.state == ReadyState::Shutdown {
            return;
        }
        if self.parser.is_some() {
            self.parser = None;
            self.pending.push_back(PendingEvent::Closed);
        }
        self.state = ReadyState::Closed;
        if reset_backoff {
            self.retry_strategy = self.config.retry_delay_strategy.reset();
            self.base_retry_delay = self.config.initial_retry_delay;
            self.error_strategy = self.config.error_strategy.clone();
        }
    }

    /// Reads the next event off the stream, connecting or reconnecting as
    /// needed. Lifecycle events (`Started`/`Faulted`/`Closed`), comments,
    /// and `retry:` updates are all surfaced rather than swallowed; callers
    /// that only care about messages should use
    /// [`EventSource::read_message`].
    #[instrument(skip(self), fields(state = ?self.state))]
    pub async fn read_any_event(&mut self) -> Result<Event<'_>> {
        loop {
            if let Some(pending) = self.pending.pop_front() {
                return Ok(pending.into_event());
            }

            if self.state == ReadyState::Shutdown {
                return Err(Error::StreamClosedByCaller);
            }

            if self.parser.is_none() {
                self.connect_with_backoff().await?;
                continue;
            }

            let read_timeout = self.config.read_timeout;
            let parser = self.parser.as_mut().expect("connected above");

            let outcome = match read_timeout {
                Some(d) => match tokio::time::timeout(d, parser.next_event()).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::ReadTimeout(d)),
                },
                None => parser.next_event().await,
            };

            match outcome {
                Ok(parser::ParserEvent::Message(msg)) => {
                    if let Some(id) = &msg.last_event_id {
                        self.last_event_id = Some(id.clone());
                    }
                    return Ok(Event::Message(msg));
                },
                Ok(parser::ParserEvent::Comment(c)) => return Ok(Event::Comment(c)),
                Ok(parser::ParserEvent::SetRetryDelay(ev)) => {
                    self.base_retry_delay = Duration::from_millis(ev.delay_ms);
                    return Ok(Event::SetRetryDelay(ev));
                },
                Err(error) => self.handle_read_error(error).await?,
            }
        }
    }

    /// Like [`EventSource::read_any_event`], but loops past every event that
    /// isn't a `Message` (lifecycle events, comments, `retry:` updates)
    /// until one arrives.
    pub async fn read_message(&mut self) -> Result<MessageEvent<'_>> {
        loop {
            match self.read_any_event().await? {
                Event::Message(msg) => return Ok(msg),
                Event::Started
                | Event::Comment(_)
                | Event::SetRetryDelay(_)
                | Event::Faulted(_)
                | Event::Closed => continue,
            }
        }
    }

    /// Returns `true` once `backoff_reset_threshold` has elapsed since the
    /// connection most recently reached `Open`.
    fn should_reset_backoff(&self) -> bool {
        match self.last_open_at {
            Some(at) => at.elapsed() >= self.config.backoff_reset_threshold,
            None => false,
        }
    }

    async fn connect_with_backoff(&mut self) -> Result<()> {
        self.state = ReadyState::Connecting;

        if self.should_reset_backoff() {
            self.retry_strategy = self.config.retry_delay_strategy.reset();
            self.error_strategy = self.config.error_strategy.clone();
        }

        let url = self.config.url.clone();
        let last_event_id = self.last_event_id.clone();

        let stream = tokio::select! {
            result = self.config.connect_strategy.connect(&url, last_event_id.as_deref()) => result,
            _ = self.cancel.cancelled() => return Err(Error::StreamClosedByCaller),
        };

        let stream = match stream {
            Ok(stream) => stream,
            Err(error) => return self.handle_connect_error(error).await,
        };

        let reader: StreamBody = Box::pin(into_async_read(stream));
        let scanner = LineScanner::new(reader);
        let mut parser = EventParser::new(scanner);
        parser.set_last_event_id(last_event_id);
        parser.set_origin(self.config.url.clone());
        if self.config.stream_event_data {
            parser.enable_streaming(self.config.expect_fields.clone());
        }

        self.parser = Some(parser);
        self.state = ReadyState::Open;
        self.last_open_at = Some(Instant::now());
        self.error_strategy = self.config.error_strategy.clone();
        self.pending.push_back(PendingEvent::Started);
        debug!(url = %self.config.url, "connected");
        Ok(())
    }

    /// A connect attempt failed before any connection was ever `Open`; per
    /// the state table this falls back to `Connecting` directly rather than
    /// passing through `Closed`.
    async fn handle_connect_error(&mut self, error: Error) -> Result<()> {
        self.handle_error_generic(error, false).await
    }

    /// A read failed (or timed out) against an already-`Open` connection;
    /// per the state table this passes through `Closed` before the next
    /// `Connecting`.
    async fn handle_read_error(&mut self, error: Error) -> Result<()> {
        self.parser = None;
        self.handle_error_generic(error, true).await
    }

    async fn handle_error_generic(&mut self, error: Error, was_open: bool) -> Result<()> {
        if error.is_fatal_protocol_error() {
            warn!(%error, "fatal protocol error, giving up");
            self.close();
            return Err(error);
        }

        let outcome = self.error_strategy.apply(&error);
        self.error_strategy = Arc::from(outcome.next);

        match outcome.decision {
            ErrorDecision::Throw => {
                warn!(%error, "error strategy gave up reconnecting");
                self.close();
                Err(error)
            },
            ErrorDecision::Continue => {
                trace!(%error, "reconnecting after error");
                self.state = if was_open {
                    ReadyState::Closed
                } else {
                    ReadyState::Connecting
                };
                self.pending.push_back(PendingEvent::Faulted(error));
                self.pending.push_back(PendingEvent::Closed);

                let outcome = self.retry_strategy.apply(self.base_retry_delay);
                self.retry_strategy = outcome.next;
                let delay = outcome.delay.min(self.config.max_retry_delay);

                tokio::select! {
                    _ = sleep(delay) => Ok(()),
                    _ = self.cancel.cancelled() => Err(Error::StreamClosedByCaller),
                }
            },
        }
    }
}
