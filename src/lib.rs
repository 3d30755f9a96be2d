//! A reconnecting Server-Sent Events (SSE) client.
//!
//! The core pieces, from the wire up:
//!
//! - [`line_scanner`] splits a byte stream into lines using a single
//!   fixed-capacity buffer.
//! - [`parser`] assembles those lines into SSE events, optionally streaming
//!   `data:` payloads to the caller instead of buffering them.
//! - [`event_source`] supervises a [`connect::ConnectStrategy`], reconnecting
//!   with backoff ([`retry`]) according to an [`error_strategy::ErrorStrategy`].
//! - [`background`] drives an [`event_source::EventSource`] on its own task
//!   for callers that prefer a push/callback API over pulling events.
//!
//! HTTP transport, logging configuration, and the choice of synchronous vs.
//! callback-driven consumption are all left to the caller or to pluggable
//! collaborators; this crate owns only the wire protocol and the
//! reconnect/backoff state machine.

pub mod background;
pub mod byte_span;
pub mod config;
pub mod connect;
pub mod error;
pub mod error_strategy;
pub mod event_source;
pub mod line_scanner;
pub mod parser;
pub mod retry;

pub use config::{Config, ConfigBuilder};
pub use error::{Error, Result};
pub use event_source::{Event, EventSource, ReadyState};
