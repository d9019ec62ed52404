//! Transport boundary of the negotiation engine.
//!
//! Two very different transports meet here:
//!
//! - **Stanza transport** ([`StanzaTransport`]): the external request/reply
//!   channel (an XMPP stream in practice) that carries negotiation payloads.
//!   It is implemented by the host application; replies, timeouts and
//!   inbound offers are routed back to the owning session through
//!   `StreamSession::on_reply`, `on_timeout` and `on_incoming`.
//! - **Raw TCP** ([`socks5`]): candidate connections and the SOCKS5 handshake
//!   that binds them to a session, optionally tunneled through a
//!   [`NetworkProxy`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │             StreamSession               │
//! └─────────┬─────────────────────┬─────────┘
//!           │ payloads            │ bytes
//!           ▼                     ▼
//! ┌───────────────────┐ ┌───────────────────┐
//! │  StanzaTransport  │ │  socks5 / TCP     │
//! │  (host app)       │ │  (NetworkProxy)   │
//! └───────────────────┘ └───────────────────┘
//! ```

pub mod socks5;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, S5bError};
use crate::protocol::{Jid, ListenerFilter, ListenerId, Payload, RequestId};

/// Request/reply channel used for negotiation.
///
/// Implementations must not block: `send_*` queue the payload and return.
/// For every id returned by [`send_request`](Self::send_request) the host
/// application reports exactly one reply or timeout back to the session.
pub trait StanzaTransport: Send + Sync {
    /// Send a request expecting a reply within `timeout`.
    fn send_request(
        &self,
        session_id: &str,
        to: &Jid,
        payload: Payload,
        timeout: Duration,
    ) -> Result<RequestId>;

    /// Send a payload that expects no reply.
    fn send_notice(&self, session_id: &str, to: &Jid, payload: Payload) -> Result<()>;

    /// Start delivering inbound payloads matching `filter`.
    fn register_listener(&self, filter: ListenerFilter) -> Result<ListenerId>;

    /// Stop delivering to `listener`. Unknown ids are ignored.
    fn unregister_listener(&self, listener: ListenerId);
}

/// How candidate connections reach the network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NetworkProxy {
    /// Connect directly (default)
    #[default]
    Direct,
    /// Tunnel through an upstream SOCKS5 proxy
    Socks5 {
        /// Proxy host
        host: String,
        /// Proxy port
        port: u16,
        /// Username for RFC 1929 authentication
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        /// Password for RFC 1929 authentication
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
}

impl NetworkProxy {
    /// Username/password pair, when both are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match self {
            Self::Socks5 {
                username: Some(user),
                password: Some(pass),
                ..
            } => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }
}

impl fmt::Display for NetworkProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Socks5 {
                host,
                port,
                username,
                ..
            } => match username {
                Some(user) => write!(f, "socks5://{}@{}:{}", user, host, port),
                None => write!(f, "socks5://{}:{}", host, port),
            },
        }
    }
}

impl FromStr for NetworkProxy {
    type Err = S5bError;

    /// Accepts `direct`, `none`, or `socks5://[user:pass@]host:port`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        if lower.is_empty() || lower == "direct" || lower == "none" {
            return Ok(Self::Direct);
        }

        let rest = s
            .trim()
            .strip_prefix("socks5://")
            .ok_or_else(|| S5bError::Config(format!("Unknown network proxy: {}", s)))?;

        let (auth, addr) = match rest.rsplit_once('@') {
            Some((auth, addr)) => (Some(auth), addr),
            None => (None, rest),
        };
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| S5bError::Config(format!("Network proxy needs a port: {}", s)))?;
        let port: u16 = port
            .parse()
            .map_err(|_| S5bError::Config(format!("Invalid network proxy port: {}", s)))?;

        let (username, password) = match auth.map(|a| a.split_once(':')) {
            Some(Some((user, pass))) => (Some(user.to_string()), Some(pass.to_string())),
            Some(None) => (auth.map(str::to_string), None),
            None => (None, None),
        };

        Ok(Self::Socks5 {
            host: host.to_string(),
            port,
            username,
            password,
        })
    }
}
