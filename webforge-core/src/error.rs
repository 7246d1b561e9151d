//! Error types and result handling for WebForge.
//!
//! This module provides a unified error type covering every failure mode in
//! the framework, from transport-level WebSocket errors to the routing
//! pipeline's sentinel conditions.
//!
//! # Overview
//!
//! Errors fall into a few categories:
//!
//! - **Transport**: WebSocket protocol and I/O errors, converted
//!   automatically via `From`.
//! - **Pipeline sentinels**: [`Error::FileNotFound`] and [`Error::Io`] are
//!   produced by the file cache and mapped by the request handler to 404
//!   and 500 responses respectively. They never escape a request.
//! - **Contract violations**: [`Error::AlreadyResponded`] is returned when
//!   an action tries to choose a second outcome for the same request.
//! - **Application errors**: [`Error::Custom`] for anything user code wants
//!   to signal from an action or event handler.
//!
//! # Examples
//!
//! ```
//! use webforge_core::prelude::*;
//!
//! async fn submit(ctx: Context) -> Result<()> {
//!     let Some(name) = ctx.form_field("name") else {
//!         return Err(Error::custom("missing form field: name"));
//!     };
//!     ctx.send_raw(format!("hello, {name}"))
//! }
//! ```

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for WebForge operations.
///
/// Uses [`thiserror`](https://docs.rs/thiserror) to implement
/// `std::error::Error` and provide readable messages. Transport and
/// serialization errors convert automatically through `#[from]`, so `?`
/// works throughout handler code.
#[derive(Debug, Error)]
pub enum Error {
    /// WebSocket protocol error from the underlying transport.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// I/O error from file or network operations.
    ///
    /// When produced by the file cache this maps to a 500 response.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error, e.g. from [`Context::send_json`].
    ///
    /// [`Context::send_json`]: crate::context::Context::send_json
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A requested file does not exist in its backing directory.
    ///
    /// The request handler maps this to a canned 404 response.
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    /// An action called a second outcome method for the same request.
    ///
    /// Exactly one of render / redirect / send-raw / http-error may be
    /// chosen per action invocation.
    #[error("an outcome was already chosen for this request")]
    AlreadyResponded,

    /// Template processing fault (malformed placeholder, oversized output).
    ///
    /// The rendering pipeline never surfaces this to the client; it falls
    /// open and serves the unsubstituted template instead.
    #[error("template error: {0}")]
    Template(String),

    /// An inbound WebSocket event frame could not be parsed.
    ///
    /// The receive loop logs this and drops the message; the connection
    /// stays open.
    #[error("invalid event frame: {0}")]
    InvalidFrame(String),

    /// A send was attempted on a connection whose write half has shut down.
    #[error("connection {0} is closed")]
    ConnectionClosed(u64),

    /// Configuration file fault.
    #[error("config error: {0}")]
    Config(String),

    /// Application-defined error raised from an action or event handler.
    #[error("{0}")]
    Custom(String),
}

/// A type alias for `Result<T, Error>` used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a custom application error from anything displayable.
    ///
    /// # Examples
    ///
    /// ```
    /// use webforge_core::error::Error;
    ///
    /// let err = Error::custom("rate limit exceeded");
    /// assert_eq!(err.to_string(), "rate limit exceeded");
    /// ```
    pub fn custom<T: fmt::Display>(msg: T) -> Self {
        Error::Custom(msg.to_string())
    }

    /// Creates a template-processing error.
    pub fn template<T: fmt::Display>(msg: T) -> Self {
        Error::Template(msg.to_string())
    }

    /// Creates an event-frame parse error.
    pub fn frame<T: fmt::Display>(msg: T) -> Self {
        Error::InvalidFrame(msg.to_string())
    }
}
