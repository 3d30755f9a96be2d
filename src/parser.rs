//! Assembles [`crate::line_scanner::LineScanner`] chunks into SSE events.
//!
//! Implements the field-state machine from the SSE wire format: `data:`,
//! `event:`, `id:`, `retry:`, and comment (`:`) lines accumulate into a
//! `Message`/`Comment`/`SetRetryDelay` event, emitted on the blank line that
//! terminates it.

use std::collections::HashSet;

use tokio::io::AsyncRead;

use crate::error::{Error, Result};
use crate::line_scanner::LineScanner;

/// Fields whose presence before the first `data:` line a caller may require
/// in order to use streaming data mode for a given message (§4.2.1).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ExpectField {
    Event,
    Id,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum FieldKind {
    Comment,
    Data,
    Event,
    Id,
    Retry,
    Other,
}

fn field_kind(name: &[u8]) -> FieldKind {
    match name {
        b"" => FieldKind::Comment,
        b"data" => FieldKind::Data,
        b"event" => FieldKind::Event,
        b"id" => FieldKind::Id,
        b"retry" => FieldKind::Retry,
        _ => FieldKind::Other,
    }
}

/// What the parser is currently accumulating a value for, on the current
/// (possibly multi-chunk) line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum CurrentField {
    Data,
    Named(FieldKind),
}

#[derive(Debug)]
pub struct CommentEvent {
    pub text: String,
}

#[derive(Debug)]
pub struct SetRetryDelayEvent {
    pub delay_ms: u64,
}

/// A parsed message, still attached to the parser that produced it when
/// `data` is [`MessageData::Streaming`].
#[derive(Debug)]
pub struct MessageEvent<'a, T> {
    pub name: String,
    pub data: MessageData<'a, T>,
    pub last_event_id: Option<String>,
    /// The URI identity of the connection this message arrived on; defaults
    /// to the request URI (see [`EventParser::set_origin`]).
    pub origin: String,
}

#[derive(Debug)]
pub enum MessageData<'a, T> {
    Buffered(String),
    Streaming(DataReader<'a, T>),
}

pub enum ParserEvent<'a, T> {
    Comment(CommentEvent),
    Message(MessageEvent<'a, T>),
    SetRetryDelay(SetRetryDelayEvent),
}

/// Consumes [`LineScanner`] chunks and assembles SSE events.
pub struct EventParser<T> {
    scanner: LineScanner<T>,

    event_name: Option<String>,
    last_event_id: Option<String>,

    data_buffer: Vec<u8>,
    have_data: bool,
    data_line_ended: bool,

    value_buffer: Vec<u8>,
    current_field: Option<CurrentField>,
    /// Set by `apply_named_field` when a valid `retry:` value was just
    /// parsed, so `next_event` can emit a `SetRetryDelay` event for it.
    pending_retry: Option<u64>,

    /// True when the next chunk begins a fresh line (as opposed to
    /// continuing a partial line from the previous chunk).
    line_is_fresh: bool,
    skip_rest_of_line: bool,
    /// Set when a [`DataReader`] was dropped before reaching the end of its
    /// message; the parser discards remaining lines of that message.
    skip_rest_of_message: bool,

    stream_event_data: bool,
    expect_fields: HashSet<ExpectField>,
    seen_fields: HashSet<ExpectField>,

    /// The URI every [`MessageEvent`] reports itself as having arrived from.
    origin: String,
}

impl<T: AsyncRead + Unpin> EventParser<T> {
    pub fn new(scanner: LineScanner<T>) -> Self {
        Self {
            scanner,
            event_name: None,
            last_event_id: None,
            data_buffer: Vec::new(),
            have_data: false,
            data_line_ended: false,
            value_buffer: Vec::new(),
            current_field: None,
            pending_retry: None,
            line_is_fresh: true,
            skip_rest_of_line: false,
            skip_rest_of_message: false,
            stream_event_data: false,
            expect_fields: HashSet::new(),
            seen_fields: HashSet::new(),
            origin: String::new(),
        }
    }

    /// Seeds the parser's notion of `Last-Event-ID` from a previous
    /// connection, so messages that don't repeat `id:` still report it.
    pub fn set_last_event_id(&mut self, id: Option<String>) {
        self.last_event_id = id;
    }

    /// Sets the URI every [`MessageEvent`] produced from here on reports as
    /// its `origin`. Called once per connection, with the URI the
    /// [`crate::connect::ConnectStrategy`] actually connected to.
    pub fn set_origin(&mut self, origin: String) {
        self.origin = origin;
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Enables streaming `data:` delivery, subject to `expect_fields`
    /// being satisfied before the first `data:` line of a message (§4.2.1).
    pub fn enable_streaming(&mut self, expect_fields: HashSet<ExpectField>) {
        self.stream_event_data = true;
        self.expect_fields = expect_fields;
    }

    fn reset_message(&mut self) {
        self.event_name = None;
        self.data_buffer.clear();
        self.have_data = false;
        self.data_line_ended = false;
        self.value_buffer.clear();
        self.current_field = None;
        self.skip_rest_of_message = false;
        self.seen_fields.clear();
    }

    fn accumulate_data(&mut self, value: &[u8], end_of_line: bool) {
        if self.data_line_ended {
            self.data_buffer.push(b'\n');
            self.data_line_ended = false;
        }
        self.data_buffer.extend_from_slice(value);
        self.have_data = true;
        if end_of_line {
            self.data_line_ended = true;
            self.current_field = None;
        } else {
            self.current_field = Some(CurrentField::Data);
        }
    }

    fn apply_named_field(&mut self, kind: FieldKind, value: &[u8]) {
        match kind {
            FieldKind::Event => {
                self.event_name = Some(String::from_utf8_lossy(value).into_owned());
                self.seen_fields.insert(ExpectField::Event);
            },
            FieldKind::Id => {
                if value.contains(&0u8) {
                    return;
                }
                self.last_event_id = Some(String::from_utf8_lossy(value).into_owned());
                self.seen_fields.insert(ExpectField::Id);
            },
            FieldKind::Retry => {
                if let Ok(text) = std::str::from_utf8(value) {
                    if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
                        if let Ok(ms) = text.parse::<u64>() {
                            self.pending_retry = Some(ms);
                        }
                    }
                }
            },
            FieldKind::Data | FieldKind::Comment => unreachable!(),
            FieldKind::Other => {},
        }
    }

    /// Returns the streaming-mode eligibility for the message currently
    /// being parsed, i.e. whether every declared `expect_fields` entry has
    /// already been observed.
    fn streaming_eligible(&self) -> bool {
        self.stream_event_data
            && self
                .expect_fields
                .iter()
                .all(|f| self.seen_fields.contains(f))
    }

    /// Reads and assembles the next event. Not cancel-safe across a
    /// streaming [`DataReader`]: borrowing `self` mutably for the duration
    /// of the returned value is what prevents calling `next_event` again
    /// before a streaming reader is consumed or dropped.
    pub async fn next_event(&mut self) -> Result<ParserEvent<'_, T>> {
        self.pending_retry = None;
        loop {
            if self.skip_rest_of_message {
                self.skip_message_to_boundary().await?;
            }

            let chunk = self.scanner.read().await?;
            let end_of_line = chunk.end_of_line;
            let bytes = chunk.span.as_bytes().to_vec();
            drop(chunk);

            if self.line_is_fresh {
                if end_of_line && bytes.is_empty() {
                    // Blank line.
                    if self.have_data {
                        let ev = self.finish_message();
                        return Ok(ParserEvent::Message(ev));
                    }
                    self.reset_message();
                    self.line_is_fresh = true;
                    continue;
                }

                if let Some(colon) = bytes.iter().position(|&b| b == b':') {
                    let name = &bytes[..colon];
                    let mut value = &bytes[colon + 1..];
                    if value.first() == Some(&b' ') {
                        value = &value[1..];
                    }
                    let kind = field_kind(name);

                    if kind == FieldKind::Comment {
                        if end_of_line {
                            return Ok(ParserEvent::Comment(CommentEvent {
                                text: String::from_utf8_lossy(value).into_owned(),
                            }));
                        }
                        self.value_buffer.clear();
                        self.value_buffer.extend_from_slice(value);
                        self.current_field = Some(CurrentField::Named(kind));
                    } else if kind == FieldKind::Data {
                        if !self.have_data && self.streaming_eligible() {
                            let name = self.event_name.clone().unwrap_or_else(|| "message".into());
                            let last_event_id = self.last_event_id.clone();
                            self.have_data = true;
                            self.accumulate_streaming_start(value, end_of_line);
                            let origin = self.origin.clone();
                            return Ok(ParserEvent::Message(MessageEvent {
                                name,
                                last_event_id,
                                origin,
                                data: MessageData::Streaming(DataReader {
                                    parser: self,
                                    finished: false,
                                }),
                            }));
                        }
                        self.accumulate_data(value, end_of_line);
                    } else if end_of_line {
                        self.apply_named_field(kind, value);
                        if let Some(ms) = self.pending_retry.take() {
                            self.line_is_fresh = true;
                            return Ok(ParserEvent::SetRetryDelay(SetRetryDelayEvent {
                                delay_ms: ms,
                            }));
                        }
                    } else {
                        self.value_buffer.clear();
                        self.value_buffer.extend_from_slice(value);
                        self.current_field = Some(CurrentField::Named(kind));
                    }
                } else if end_of_line {
                    // Whole line is the field name; value is empty.
                    let kind = field_kind(&bytes);
                    match kind {
                        FieldKind::Comment => {
                            return Ok(ParserEvent::Comment(CommentEvent {
                                text: String::new(),
                            }));
                        },
                        FieldKind::Data => {
                            self.accumulate_data(b"", true);
                        },
                        _ => self.apply_named_field(kind, b""),
                    }
                } else {
                    // No colon, line not yet terminated, buffer filled: the
                    // field name exceeds any legal SSE field name length.
                    self.skip_rest_of_line = true;
                }
            } else if self.skip_rest_of_line {
                // Discard continuation bytes of an overlong field name.
            } else {
                match self.current_field {
                    Some(CurrentField::Data) => self.accumulate_data(&bytes, end_of_line),
                    Some(CurrentField::Named(kind)) => {
                        self.value_buffer.extend_from_slice(&bytes);
                        if end_of_line {
                            let value = std::mem::take(&mut self.value_buffer);
                            if kind == FieldKind::Comment {
                                let text = String::from_utf8_lossy(&value).into_owned();
                                self.current_field = None;
                                self.line_is_fresh = true;
                                return Ok(ParserEvent::Comment(CommentEvent { text }));
                            }
                            self.apply_named_field(kind, &value);
                            self.current_field = None;
                            if let Some(ms) = self.pending_retry.take() {
                                self.line_is_fresh = true;
                                return Ok(ParserEvent::SetRetryDelay(SetRetryDelayEvent {
                                    delay_ms: ms,
                                }));
                            }
                        }
                    },
                    None => {},
                }
            }

            if end_of_line {
                self.skip_rest_of_line = false;
            }
            self.line_is_fresh = end_of_line;
        }
    }

    fn finish_message(&mut self) -> MessageEvent<'_, T> {
        let name = self.event_name.clone().unwrap_or_else(|| "message".into());
        let data = String::from_utf8_lossy(&self.data_buffer).into_owned();
        let last_event_id = self.last_event_id.clone();
        let origin = self.origin.clone();
        self.reset_message();
        self.line_is_fresh = true;
        MessageEvent {
            name,
            data: MessageData::Buffered(data),
            last_event_id,
            origin,
        }
    }

    fn accumulate_streaming_start(&mut self, value: &[u8], end_of_line: bool) {
        self.data_buffer.clear();
        self.data_buffer.extend_from_slice(value);
        self.data_line_ended = end_of_line;
        self.current_field = if end_of_line {
            None
        } else {
            Some(CurrentField::Data)
        };
        self.line_is_fresh = end_of_line;
        self.skip_rest_of_line = false;
    }

    /// Reads and discards lines until the message-terminating blank line,
    /// used after a streaming reader is abandoned mid-message.
    async fn skip_message_to_boundary(&mut self) -> Result<()> {
        loop {
            let chunk = self.scanner.read().await?;
            let end_of_line = chunk.end_of_line;
            let is_blank = self.line_is_fresh && end_of_line && chunk.span.is_empty();
            drop(chunk);
            self.line_is_fresh = end_of_line;
            if is_blank {
                self.skip_rest_of_message = false;
                self.reset_message();
                self.line_is_fresh = true;
                return Ok(());
            }
        }
    }
}

/// An incremental reader over one message's `data:` payload.
///
/// Dropping this before it reaches EOF causes the parser to discard the
/// remainder of the message instead of emitting it.
pub struct DataReader<'a, T> {
    parser: &'a mut EventParser<T>,
    finished: bool,
}

impl<'a, T: AsyncRead + Unpin> DataReader<'a, T> {
    /// Returns the next fragment of the `data:` payload, or `None` at the
    /// blank line terminating the message. Fragments from successive
    /// `data:` lines are separated by a single `\n`; fragments from the
    /// same (buffer-split) `data:` line are not.
    pub async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if self.finished {
            return Ok(None);
        }

        // A pending fragment from the line that opened streaming mode.
        if !self.parser.data_buffer.is_empty() {
            let pending = std::mem::take(&mut self.parser.data_buffer);
            return Ok(Some(pending));
        }

        loop {
            let chunk = self.parser.scanner.read().await.map_err(|e| match e {
                Error::StreamClosedByServer => Error::StreamClosedWithIncompleteMessage,
                other => other,
            })?;
            let end_of_line = chunk.end_of_line;
            let bytes = chunk.span.as_bytes().to_vec();
            drop(chunk);

            if self.parser.line_is_fresh {
                if end_of_line && bytes.is_empty() {
                    self.finished = true;
                    self.parser.line_is_fresh = true;
                    self.parser.reset_message();
                    return Ok(None);
                }

                if let Some(colon) = bytes.iter().position(|&b| b == b':') {
                    let name = &bytes[..colon];
                    let mut value = &bytes[colon + 1..];
                    if value.first() == Some(&b' ') {
                        value = &value[1..];
                    }
                    let kind = field_kind(name);
                    self.parser.line_is_fresh = end_of_line;
                    if kind == FieldKind::Data {
                        let sep = self.parser.data_line_ended;
                        self.parser.data_line_ended = end_of_line;
                        self.parser.current_field =
                            if end_of_line { None } else { Some(CurrentField::Data) };
                        let mut out = Vec::with_capacity(value.len() + 1);
                        if sep {
                            out.push(b'\n');
                        }
                        out.extend_from_slice(value);
                        return Ok(Some(out));
                    } else {
                        // Field after data has started: too late to apply.
                        self.parser.current_field =
                            if end_of_line { None } else { Some(CurrentField::Named(kind)) };
                        if end_of_line {
                            continue;
                        }
                    }
                } else if end_of_line {
                    self.parser.line_is_fresh = true;
                    if field_kind(&bytes) == FieldKind::Data {
                        let sep = self.parser.data_line_ended;
                        self.parser.data_line_ended = true;
                        return Ok(Some(if sep { vec![b'\n'] } else { Vec::new() }));
                    }
                    // Whole line is some other field name; ignore.
                    continue;
                } else {
                    self.parser.skip_rest_of_line = true;
                    self.parser.line_is_fresh = false;
                }
            } else if self.parser.skip_rest_of_line {
                if end_of_line {
                    self.parser.skip_rest_of_line = false;
                }
                self.parser.line_is_fresh = end_of_line;
            } else {
                match self.parser.current_field {
                    Some(CurrentField::Data) => {
                        self.parser.data_line_ended = end_of_line;
                        if end_of_line {
                            self.parser.current_field = None;
                        }
                        self.parser.line_is_fresh = end_of_line;
                        return Ok(Some(bytes));
                    },
                    _ => {
                        if end_of_line {
                            self.parser.current_field = None;
                        }
                        self.parser.line_is_fresh = end_of_line;
                    },
                }
            }
        }
    }

    /// Reads the entire remaining payload into a `String`.
    pub async fn read_to_string(mut self) -> Result<String> {
        let mut out = Vec::new();
        while let Some(chunk) = self.read_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        self.finished = true;
        String::from_utf8(out)
            .map_err(|e| Error::Configuration(format!("non-UTF-8 streamed data: {e}")))
    }
}

impl<'a, T> Drop for DataReader<'a, T> {
    fn drop(&mut self) {
        if !self.finished {
            self.parser.skip_rest_of_message = true;
            self.parser.current_field = None;
        }
    }
}
