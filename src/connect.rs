//! Pluggable transport: how an [`crate::event_source::EventSource`] turns a
//! URL and a `Last-Event-ID` into a byte stream.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use futures_util::TryStreamExt;
use reqwest::{Client, Method, StatusCode};
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::error::{Error, Result};

/// A boxed, owned byte stream as produced by a [`ConnectStrategy`].
pub type BoxByteStream = std::pin::Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Wraps the body stream in an `AsyncRead` adapter the line scanner can
/// read directly.
pub fn into_async_read(stream: BoxByteStream) -> impl AsyncRead + Unpin + Send {
    StreamReader::new(stream.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)))
}

/// A connection attempt, external to the core state machine so that tests
/// (and alternative transports) can substitute their own.
#[async_trait]
pub trait ConnectStrategy: Send + Sync {
    /// Opens a connection to `url`, sending `last_event_id` as the
    /// `Last-Event-ID` header when present, and returns the response body
    /// as a stream of byte chunks.
    ///
    /// Must validate the response before returning: a non-2xx status, an
    /// unacceptable `Content-Type`, or a non-UTF-8 charset should surface as
    /// an `Err` rather than a stream that fails on first read.
    async fn connect(&self, url: &str, last_event_id: Option<&str>) -> Result<BoxByteStream>;
}

/// The default `reqwest`-backed [`ConnectStrategy`].
///
/// Validates the response per the WHATWG EventSource "Establish the event
/// source connection" algorithm: the status must be 2xx (204 is reported as
/// a fatal [`Error::StreamHttpError`] so the supervisor stops, matching "no
/// further attempt should be made to reconnect"), the MIME type must be
/// `text/event-stream`, and any character encoding must be absent or UTF-8.
pub struct HttpConnectStrategy {
    client: Client,
    method: Method,
    body: Option<Arc<dyn Fn() -> Bytes + Send + Sync>>,
}

impl HttpConnectStrategy {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            method: Method::GET,
            body: None,
        }
    }

    /// Reuses a caller-supplied client (for shared connection pools, custom
    /// TLS config, proxies, and so on) instead of building a private one.
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            ..Self::new()
        }
    }

    /// Overrides the request method (default `GET`).
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Supplies a body factory re-invoked on every connect attempt (so a
    /// reconnect sends a fresh body rather than a consumed one).
    pub fn body_factory<F>(mut self, factory: F) -> Self
    where F: Fn() -> Bytes + Send + Sync + 'static {
        self.body = Some(Arc::new(factory));
        self
    }
}

impl Default for HttpConnectStrategy {
    fn default() -> Self {
        Self::new()
    }
}

fn content_type_is_acceptable(response: &reqwest::Response) -> std::result::Result<(), Error> {
    let header = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let mime = header
        .as_deref()
        .and_then(|h| h.split(';').next())
        .map(str::trim)
        .map(str::to_ascii_lowercase);

    let charset = header.as_deref().and_then(|h| {
        h.split(';')
            .skip(1)
            .find_map(|param| param.trim().strip_prefix("charset="))
            .map(|c| c.trim_matches('"').to_ascii_lowercase())
    });

    let mime_ok = mime.as_deref() == Some("text/event-stream");
    let charset_ok = charset.is_none() || charset.as_deref() == Some("utf-8");

    if mime_ok && charset_ok {
        Ok(())
    } else {
        Err(Error::StreamContentError {
            content_type: mime,
            encoding: charset,
        })
    }
}

#[async_trait]
impl ConnectStrategy for HttpConnectStrategy {
    async fn connect(&self, url: &str, last_event_id: Option<&str>) -> Result<BoxByteStream> {
        let mut request = self
            .client
            .request(self.method.clone(), url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::CACHE_CONTROL, "no-cache");

        if let Some(id) = last_event_id {
            request = request.header("Last-Event-ID", id);
        }

        if let Some(factory) = &self.body {
            request = request.body(factory());
        }

        let response = request.send().await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Err(Error::StreamHttpError { status: 204 });
        }
        if !response.status().is_success() {
            return Err(Error::StreamHttpError {
                status: response.status().as_u16(),
            });
        }

        content_type_is_acceptable(&response)?;

        let stream = response.bytes_stream().map_err(Error::from);

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_parsing_accepts_bare_event_stream() {
        let header = "text/event-stream";
        let mime = header.split(';').next().map(str::trim).unwrap();
        assert_eq!(mime.to_ascii_lowercase(), "text/event-stream");
    }

    #[test]
    fn content_type_parsing_extracts_charset_parameter() {
        let header = "text/event-stream; charset=UTF-8";
        let charset = header
            .split(';')
            .skip(1)
            .find_map(|p| p.trim().strip_prefix("charset="))
            .map(|c| c.trim_matches('"').to_ascii_lowercase());
        assert_eq!(charset.as_deref(), Some("utf-8"));
    }
}
