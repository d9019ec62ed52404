//! # S5B - SOCKS5 Bytestream Negotiation
//!
//! Negotiation engine for XEP-0065 style SOCKS5 bytestreams: two peers that
//! share a request/reply signaling channel agree on a TCP data channel,
//! either directly or through a relay, and then exchange raw bytes over it.
//!
//! ## Features
//!
//! - **Candidate negotiation**: initiator offers hosts, target tries them in order
//! - **Relay discovery**: concurrent proxy queries joined before the offer
//! - **Direct connections**: local SOCKS5 listener matched by connect key
//! - **Buffered I/O**: bounded write buffer, blocking waits and async events
//! - **Network proxy**: candidate connections tunneled through an upstream SOCKS5 proxy
//!
//! ## Protocol Overview
//!
//! ```text
//! Initiator                 Relay                   Target
//!    |                        |                        |
//!    |--- proxy query ------->|                        |
//!    |<-- stream host --------|                        |
//!    |                        |                        |
//!    |--- hosts (sid, dstaddr, [self, relay]) -------->|
//!    |                        |<====== SOCKS5 =========|
//!    |<-- host used (relay) ---------------------------|
//!    |====== SOCKS5 ========> |                        |
//!    |--- activate ---------->|                        |
//!    |<-- ack ----------------|                        |
//!    |<=========== data ======|========== data =======>|
//! ```
//!
//! The signaling channel itself is outside this crate: the host application
//! implements [`StanzaTransport`] and feeds replies back into the session.
//!
//! ### State Machine
//!
//! ```text
//!               open()
//!     [Closed] ───────> [Opening] ──── failure ───> [Closed]
//!        ^                  │
//!        │                  │ handshake + activation
//!        │                  v
//!        │             [Opened] ──── close() ───> [Closing]
//!        │                                           │
//!        └───────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use s5b::{Jid, LocalConnectionRegistry, SessionParams, StreamRole, StreamSession};
//!
//! let registry = LocalConnectionRegistry::new();
//! let params = SessionParams::generate(
//!     Jid::new("alice@example.org/desktop"),
//!     Jid::new("bob@example.org/phone"),
//!     StreamRole::Initiator,
//! );
//! let session = StreamSession::spawn(params, transport, registry)?;
//! session.open()?;
//!
//! let mut states = session.state_changes();
//! states.wait_for(|s| *s == s5b::StreamState::Opened).await?;
//! session.write(b"hello")?;
//! ```
//!
//! ## Modules
//!
//! - [`stream`]: Sessions and the negotiation state machine
//! - [`protocol`]: Negotiation payloads and identities
//! - [`transport`]: Signaling boundary and the SOCKS5 handshake
//! - [`registry`]: Local connection registry and accept listener
//! - [`buffer`]: Growable byte buffers
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod buffer;
pub mod config;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod stream;
pub mod transport;

// Re-exports for convenience
pub use buffer::RingBuffer;
pub use config::{Config, ListenerConfig};
pub use error::{Result, S5bError};
pub use protocol::{
    Activation, HostCandidate, HostUsed, HostsOffer, Jid, ListenerFilter, ListenerId, Payload,
    Reply, RequestId, StanzaError, StanzaErrorCondition, StreamMode,
};
pub use registry::{connection_key, LocalConnectionRegistry, LocalListener};
pub use stream::{
    ErrorCondition, SessionEvent, SessionParams, StreamError, StreamRole, StreamSession,
    StreamSettings, StreamState,
};
pub use transport::{NetworkProxy, StanzaTransport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
