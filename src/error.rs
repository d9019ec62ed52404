//! S5B error types.
//!
//! Two kinds of failure exist in this crate:
//!
//! - [`S5bError`] is returned from API calls that fail synchronously
//!   (bad configuration, writing to a session without a socket, opening a
//!   session twice, a transport refusing to send).
//! - [`StreamError`](crate::stream::StreamError) is *recorded* on a session
//!   when negotiation or relay fails. It is never returned from a callback;
//!   callers observe it through `StreamSession::error()` after the session
//!   reaches `Closed`.

use thiserror::Error;

use crate::stream::StreamState;

/// S5B errors.
#[derive(Error, Debug)]
pub enum S5bError {
    /// Protocol-level error (malformed SOCKS5 exchange, bad payload).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// SOCKS5 server replied with a non-zero status.
    #[error("SOCKS5 request rejected with reply code {0:#04x}")]
    Rejected(u8),

    /// Operation is not valid in the current session state.
    #[error("Invalid session state: {0:?}")]
    InvalidState(StreamState),

    /// Session has no live socket to buffer data for.
    #[error("Session not connected")]
    NotConnected,

    /// Socket was torn down and every buffered byte has been read.
    #[error("End of stream")]
    EndOfStream,

    /// Write would grow the buffer past its hard cap.
    #[error("Buffer full: {requested} bytes requested, {available} available")]
    BufferFull {
        /// Bytes the caller tried to append.
        requested: usize,
        /// Bytes that still fit under the cap.
        available: usize,
    },

    /// The external stanza transport could not send.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation did not finish in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// No async runtime to run the session on.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for S5B operations
pub type Result<T> = std::result::Result<T, S5bError>;

impl From<toml::de::Error> for S5bError {
    fn from(err: toml::de::Error) -> Self {
        S5bError::Config(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for S5bError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        S5bError::Timeout(err.to_string())
    }
}
