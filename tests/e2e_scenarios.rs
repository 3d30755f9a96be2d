//! Scenario-level tests driving `EventSource` against a scripted, in-memory
//! `ConnectStrategy` instead of a real HTTP server.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use sse_client::connect::{BoxByteStream, ConnectStrategy};
use sse_client::error::Error;
use sse_client::event_source::{Event, MessageData};
use sse_client::parser::ExpectField;
use sse_client::Config;
use sse_client::EventSource;

/// One scripted connection attempt: either a body (split into chunks, as a
/// real stream would arrive in pieces) or a connection-level failure.
enum Attempt {
    Body(Vec<&'static [u8]>),
    /// Yields `chunks`, then never closes and never yields more — simulates
    /// a server that goes idle mid-stream rather than disconnecting.
    BodyThenIdle(Vec<&'static [u8]>),
    Fail(fn() -> Error),
}

struct ScriptedConnect {
    attempts: Mutex<Vec<Attempt>>,
    seen_last_event_ids: Mutex<Vec<Option<String>>>,
}

impl ScriptedConnect {
    fn new(mut attempts: Vec<Attempt>) -> Self {
        attempts.reverse(); // pop() takes from the end; we want script order.
        Self {
            attempts: Mutex::new(attempts),
            seen_last_event_ids: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ConnectStrategy for ScriptedConnect {
    async fn connect(&self, _url: &str, last_event_id: Option<&str>) -> sse_client::Result<BoxByteStream> {
        self.seen_last_event_ids
            .lock()
            .unwrap()
            .push(last_event_id.map(str::to_owned));

        let attempt = self
            .attempts
            .lock()
            .unwrap()
            .pop()
            .unwrap_or(Attempt::Fail(|| Error::StreamClosedByServer));

        match attempt {
            Attempt::Body(chunks) => {
                let items: Vec<sse_client::Result<Bytes>> = chunks
                    .into_iter()
                    .map(|c| Ok(Bytes::from_static(c)))
                    .collect();
                Ok(Box::pin(stream::iter(items)))
            },
            Attempt::BodyThenIdle(chunks) => {
                let items: Vec<sse_client::Result<Bytes>> = chunks
                    .into_iter()
                    .map(|c| Ok(Bytes::from_static(c)))
                    .collect();
                Ok(Box::pin(stream::iter(items).chain(stream::pending())))
            },
            Attempt::Fail(make_err) => Err(make_err()),
        }
    }
}

fn test_config(connect: ScriptedConnect) -> Config {
    Config::builder("https://example.test/events")
        .initial_retry_delay(Duration::from_millis(1))
        .max_retry_delay(Duration::from_millis(5))
        .connect_strategy(connect)
        .build()
        .unwrap()
}

#[tokio::test]
async fn reads_a_simple_buffered_message() {
    let connect = ScriptedConnect::new(vec![Attempt::Body(vec![b"data: hello\n\n"])]);
    let mut source = EventSource::new(test_config(connect));

    let event = source.read_any_event().await.unwrap();
    match event {
        Event::Message(msg) => {
            assert_eq!(msg.name, "message");
            match msg.data {
                MessageData::Buffered(data) => assert_eq!(data, "hello"),
                MessageData::Streaming(_) => panic!("expected buffered data"),
            }
        },
        _ => panic!("expected a message"),
    }
}

#[tokio::test]
async fn named_event_and_multi_line_data_are_joined_with_newlines() {
    let connect = ScriptedConnect::new(vec![Attempt::Body(vec![
        b"event: update\ndata: line one\ndata: line two\n\n",
    ])]);
    let mut source = EventSource::new(test_config(connect));

    let event = source.read_any_event().await.unwrap();
    match event {
        Event::Message(msg) => {
            assert_eq!(msg.name, "update");
            match msg.data {
                MessageData::Buffered(data) => assert_eq!(data, "line one\nline two"),
                MessageData::Streaming(_) => panic!("expected buffered data"),
            }
        },
        _ => panic!("expected a message"),
    }
}

#[tokio::test]
async fn comment_lines_surface_as_comment_events() {
    let connect = ScriptedConnect::new(vec![Attempt::Body(vec![b": keep-alive\n"])]);
    let mut source = EventSource::new(test_config(connect));

    match source.read_any_event().await.unwrap() {
        Event::Comment(c) => assert_eq!(c.text, "keep-alive"),
        _ => panic!("expected a comment"),
    }
}

#[tokio::test]
async fn retry_field_is_surfaced_and_read_message_skips_it() {
    let connect = ScriptedConnect::new(vec![Attempt::Body(vec![
        b"retry: 2000\ndata: after retry\n\n",
    ])]);
    let mut source = EventSource::new(test_config(connect));

    let msg = source.read_message().await.unwrap();
    match msg.data {
        MessageData::Buffered(data) => assert_eq!(data, "after retry"),
        MessageData::Streaming(_) => panic!("expected buffered data"),
    }
}

#[tokio::test]
async fn reconnects_after_a_transient_connect_failure() {
    let connect = ScriptedConnect::new(vec![
        Attempt::Fail(|| Error::Io(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))),
        Attempt::Body(vec![b"data: recovered\n\n"]),
    ]);
    let config = Config::builder("https://example.test/events")
        .initial_retry_delay(Duration::from_millis(1))
        .max_retry_delay(Duration::from_millis(5))
        .error_strategy(sse_client::error_strategy::AlwaysContinue)
        .connect_strategy(connect)
        .build()
        .unwrap();
    let mut source = EventSource::new(config);

    let msg = source.read_message().await.unwrap();
    match msg.data {
        MessageData::Buffered(data) => assert_eq!(data, "recovered"),
        MessageData::Streaming(_) => panic!("expected buffered data"),
    }
}

#[tokio::test]
async fn a_fatal_http_status_stops_reconnecting() {
    let connect = ScriptedConnect::new(vec![Attempt::Fail(|| Error::StreamHttpError { status: 204 })]);
    let mut source = EventSource::new(test_config(connect));

    let err = source.read_any_event().await.unwrap_err();
    assert!(err.is_fatal_protocol_error());
    assert_eq!(source.state(), sse_client::ReadyState::Shutdown);
}

#[tokio::test]
async fn last_event_id_is_sent_on_reconnect() {
    let connect = ScriptedConnect::new(vec![
        Attempt::Body(vec![b"id: abc\ndata: first\n\n"]),
        Attempt::Body(vec![b"data: second\n\n"]),
    ]);
    let connect = std::sync::Arc::new(connect);
    let config = Config::builder("https://example.test/events")
        .initial_retry_delay(Duration::from_millis(1))
        .connect_strategy(ScriptedConnectProxy(connect.clone()))
        .build()
        .unwrap();
    let mut source = EventSource::new(config);

    let first = source.read_message().await.unwrap();
    assert_eq!(first.last_event_id.as_deref(), Some("abc"));
    drop(first);

    // Force a reconnect so the second attempt happens.
    source.restart(false);
    let _second = source.read_message().await.unwrap();

    let seen = connect.seen_last_event_ids.lock().unwrap().clone();
    assert_eq!(seen, vec![None, Some("abc".to_string())]);
}

/// `ConnectStrategy` isn't obviously `Clone`-through-`Arc` friendly since the
/// trait object itself is wrapped internally; this proxy lets the test hold
/// its own `Arc` to the scripted connector to inspect it after the run.
struct ScriptedConnectProxy(std::sync::Arc<ScriptedConnect>);

#[async_trait]
impl ConnectStrategy for ScriptedConnectProxy {
    async fn connect(&self, url: &str, last_event_id: Option<&str>) -> sse_client::Result<BoxByteStream> {
        self.0.connect(url, last_event_id).await
    }
}

#[tokio::test]
async fn streaming_data_mode_yields_fragments_without_buffering() {
    let connect = ScriptedConnect::new(vec![Attempt::Body(vec![
        b"event: chunked\n",
        b"data: part-one",
        b"\ndata: part-two\n\n",
    ])]);
    let config = Config::builder("https://example.test/events")
        .initial_retry_delay(Duration::from_millis(1))
        .stream_event_data(HashSet::from([ExpectField::Event]))
        .connect_strategy(connect)
        .build()
        .unwrap();
    let mut source = EventSource::new(config);

    let msg = source.read_message().await.unwrap();
    assert_eq!(msg.name, "chunked");
    match msg.data {
        MessageData::Streaming(reader) => {
            let data = reader.read_to_string().await.unwrap();
            assert_eq!(data, "part-one\npart-two");
        },
        MessageData::Buffered(_) => panic!("expected streaming data"),
    }
}

#[tokio::test]
async fn every_successful_connect_emits_a_started_event_before_any_message() {
    let connect = ScriptedConnect::new(vec![Attempt::Body(vec![b"data: hello\n\n"])]);
    let mut source = EventSource::new(test_config(connect));

    assert!(matches!(source.read_any_event().await.unwrap(), Event::Started));
    match source.read_any_event().await.unwrap() {
        Event::Message(_) => {},
        _ => panic!("expected a message after Started"),
    }
}

/// S5: a connection that goes idle mid-message (rather than closing) must
/// surface a `Faulted(ReadTimeout)` followed by `Closed`, without ever
/// reporting the half-written second message.
#[tokio::test]
async fn s5_inactivity_timeout_faults_then_closes() {
    let connect = ScriptedConnect::new(vec![Attempt::BodyThenIdle(vec![b"data: event1\n\ndata: e"])]);
    let config = Config::builder("https://example.test/events")
        .initial_retry_delay(Duration::from_millis(1))
        .read_timeout(Some(Duration::from_millis(20)))
        .error_strategy(sse_client::error_strategy::AlwaysContinue)
        .connect_strategy(connect)
        .build()
        .unwrap();
    let mut source = EventSource::new(config);

    assert!(matches!(source.read_any_event().await.unwrap(), Event::Started));

    match source.read_any_event().await.unwrap() {
        Event::Message(msg) => match msg.data {
            MessageData::Buffered(data) => assert_eq!(data, "event1"),
            MessageData::Streaming(_) => panic!("expected buffered data"),
        },
        _ => panic!("expected the first message"),
    }

    match source.read_any_event().await.unwrap() {
        Event::Faulted(Error::ReadTimeout(_)) => {},
        _ => panic!("expected Faulted(ReadTimeout)"),
    }

    assert!(matches!(source.read_any_event().await.unwrap(), Event::Closed));
}

/// S6: two failed connect attempts followed by a successful one, with
/// `ErrorStrategy = AlwaysContinue` (explicitly configured, since
/// `AlwaysThrow` is the library default): the observable sequence is
/// `Faulted(400), Closed, Faulted(500), Closed, Started, Message`, and the
/// backoff delay between the second and third attempts is strictly larger
/// than between the first and second.
#[tokio::test]
async fn s6_two_faults_then_recovery_with_increasing_backoff() {
    let connect = ScriptedConnect::new(vec![
        Attempt::Fail(|| Error::StreamHttpError { status: 400 }),
        Attempt::Fail(|| Error::StreamHttpError { status: 500 }),
        Attempt::Body(vec![b"event: put\ndata: hello\n\n"]),
    ]);
    let config = Config::builder("https://example.test/events")
        .initial_retry_delay(Duration::from_millis(5))
        .max_retry_delay(Duration::from_millis(200))
        .retry_delay_strategy(
            sse_client::retry::ExponentialBackoff::new().with_jitter_multiplier(0.0),
        )
        .error_strategy(sse_client::error_strategy::AlwaysContinue)
        .connect_strategy(connect)
        .build()
        .unwrap();
    let mut source = EventSource::new(config);

    let start = std::time::Instant::now();

    match source.read_any_event().await.unwrap() {
        Event::Faulted(Error::StreamHttpError { status }) => assert_eq!(status, 400),
        _ => panic!("expected Faulted(400)"),
    }
    let after_first_fault = start.elapsed();
    assert!(matches!(source.read_any_event().await.unwrap(), Event::Closed));

    match source.read_any_event().await.unwrap() {
        Event::Faulted(Error::StreamHttpError { status }) => assert_eq!(status, 500),
        _ => panic!("expected Faulted(500)"),
    }
    let after_second_fault = start.elapsed();
    assert!(matches!(source.read_any_event().await.unwrap(), Event::Closed));

    assert!(matches!(source.read_any_event().await.unwrap(), Event::Started));

    match source.read_any_event().await.unwrap() {
        Event::Message(msg) => {
            assert_eq!(msg.name, "put");
            match msg.data {
                MessageData::Buffered(data) => assert_eq!(data, "hello"),
                MessageData::Streaming(_) => panic!("expected buffered data"),
            }
        },
        _ => panic!("expected the recovered message"),
    }

    let second_gap = after_second_fault - after_first_fault;
    assert!(
        second_gap > after_first_fault,
        "second backoff delay ({second_gap:?}) should exceed the first ({after_first_fault:?})"
    );
}
