//! SOCKS5 bytestream sessions.
//!
//! A [`StreamSession`] negotiates a TCP data channel with a peer and then
//! exposes it as a buffered duplex byte stream.
//!
//! ## State Machine
//!
//! | State     | Description                              | Valid Transitions |
//! |-----------|------------------------------------------|-------------------|
//! | `Closed`  | Not negotiating, no socket               | → Opening         |
//! | `Opening` | Negotiation in progress                  | → Opened, Closed  |
//! | `Opened`  | Socket bound, data flows                 | → Closing, Closed |
//! | `Closing` | Flushing writes, disconnecting           | → Closed          |
//!
//! ## Negotiation
//!
//! ```text
//! Initiator                                     Target
//!   open()                                        open()
//!   │ proxy queries (concurrent, joined)          │ listen for host offer
//!   │ offer hosts ─────────────────────────────►  │
//!   │                                             │ connect to each host in
//!   │                                             │ order until a SOCKS5
//!   │                                             │ handshake succeeds
//!   │  ◄──────────────────────────── host used ── │ ─► Opened
//!   │ self? use accepted local socket             │
//!   │ relay? connect + activate                   │
//!   ▼ Opened                                      │
//! ```
//!
//! Every failure is recorded as a [`StreamError`] and forces `Closed`;
//! nothing is returned to the caller of the failing step.

mod error;
pub mod hosts;
mod negotiator;
mod session;
mod settings;

pub use error::{ErrorCondition, StreamError};
pub use session::{SessionParams, StreamSession};
pub use settings::StreamSettings;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeout of the host offer request (peer must pick a host within it)
pub const HOST_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout of each proxy address query
pub const PROXY_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout of the relay activation request
pub const ACTIVATE_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default per-candidate connect timeout
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Connect timeouts at or below this are refused
pub const MIN_CONNECT_TIMEOUT_MS: u64 = 100;

/// Growth step of the session buffers
pub const BUFFER_INCREMENT_SIZE: usize = 5120;

/// Hard cap of the write buffer and soft cap of socket reads
pub const MAX_BUFFER_SIZE: usize = 51200;

/// Side of the negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamRole {
    /// Offers candidates
    Initiator,
    /// Picks a candidate
    Target,
}

/// Public session state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    /// Idle or finished
    #[default]
    Closed,
    /// Negotiating
    Opening,
    /// Ready for data
    Opened,
    /// Gracefully shutting down
    Closing,
}

/// Notifications published by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// State changed
    StateChanged(StreamState),
    /// New bytes landed in the read buffer
    ReadyRead,
    /// Bytes left the write buffer for the socket
    BytesWritten(usize),
    /// `close()` is about to flush and disconnect
    AboutToClose,
    /// No more data will arrive
    ReadChannelFinished,
    /// A property setter changed a value
    PropertiesChanged,
}
