//! Error taxonomy for the SSE client.

use std::time::Duration;

use thiserror::Error;

/// Errors produced while connecting to, reading from, or parsing a
/// Server-Sent Events stream.
#[derive(Debug, Error)]
pub enum Error {
    /// No bytes were read from the stream within the configured inactivity
    /// window.
    #[error("no data received within the read timeout of {0:?}")]
    ReadTimeout(Duration),

    /// The server closed the connection cleanly mid-stream.
    #[error("stream closed by server")]
    StreamClosedByServer,

    /// The caller cancelled or closed the `EventSource`.
    #[error("stream closed by caller")]
    StreamClosedByCaller,

    /// The stream ended while a streaming `data:` reader was still open.
    #[error("stream closed with an incomplete message")]
    StreamClosedWithIncompleteMessage,

    /// The response's content type or character encoding is not acceptable.
    #[error("unacceptable stream content (content-type={content_type:?}, encoding={encoding:?})")]
    StreamContentError {
        content_type: Option<String>,
        encoding: Option<String>,
    },

    /// The server responded with a non-2xx status (204 is included: the SSE
    /// spec treats it as a request to stop reconnecting).
    #[error("HTTP error, status {status}")]
    StreamHttpError { status: u16 },

    /// An illegal configuration value was supplied at build time.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// An I/O error occurred while reading the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The default `reqwest`-backed `ConnectStrategy` failed to send or
    /// complete a request.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl Error {
    /// True for errors that represent the server/stream asking us,
    /// unambiguously, to stop (as opposed to a transient failure).
    pub fn is_fatal_protocol_error(&self) -> bool {
        matches!(
            self,
            Error::StreamHttpError { status: 204 } | Error::StreamContentError { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
