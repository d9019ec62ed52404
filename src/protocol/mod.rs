//! SOCKS5 Bytestreams protocol vocabulary.
//!
//! Identities, host candidates and the payloads that travel over the
//! external stanza transport during negotiation.
//!
//! # Message Flow
//!
//! ```text
//! Initiator                 Proxy                     Target
//!    |                        |                          |
//!    |---- ProxyQuery ------->|                          |
//!    |<--- StreamHost --------|                          |
//!    |                        |                          |
//!    |---------------- Hosts (candidates, dstaddr) ----->|
//!    |                        |<==== SOCKS5 connect =====|  (or to initiator)
//!    |<--------------- HostUsed (jid) -------------------|
//!    |                        |                          |
//!    |==== SOCKS5 connect ===>|                          |  (relay only)
//!    |---- Activate --------->|                          |
//!    |<--- Ack ---------------|                          |
//!    |                        |                          |
//!    |<======================= data ====================>|
//! ```
//!
//! When the target cannot reach any candidate it answers the host offer
//! with an `item-not-found` error instead of `HostUsed`.

mod jid;
mod message;

pub use jid::Jid;
pub use message::{
    Activation, HostCandidate, HostUsed, HostsOffer, ListenerFilter, ListenerId, Payload, Reply,
    RequestId, StanzaError, StanzaErrorCondition, StreamMode,
};

/// Namespace of the SOCKS5 Bytestreams extension
pub const NS_SOCKS5_BYTESTREAMS: &str = "http://jabber.org/protocol/bytestreams";
