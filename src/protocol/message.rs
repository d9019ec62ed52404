//! Payloads exchanged with the external stanza transport.
//!
//! The transport owns serialization; these types only shape what goes into
//! and comes out of each request, reply and notice. They derive serde so a
//! transport (or a test harness) can move them as JSON.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Jid;

/// Transport-assigned identifier of an outbound request or inbound stanza.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    /// Wrap a transport id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle of an inbound listener installed on the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerId(pub u64);

/// Selects the inbound payloads a listener wants: host offers for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerFilter {
    /// Session id the offer must carry.
    pub session_id: String,
}

impl ListenerFilter {
    /// Does `payload` belong to this listener?
    pub fn matches(&self, payload: &Payload) -> bool {
        match payload {
            Payload::Hosts(offer) => offer.sid == self.session_id,
            _ => false,
        }
    }
}

/// One reachable endpoint: the identity answering for it plus its address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostCandidate {
    /// Identity of the host (peer itself or a relay).
    pub jid: Jid,
    /// Hostname or IP literal.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl HostCandidate {
    /// Create a candidate.
    pub fn new(jid: Jid, host: impl Into<String>, port: u16) -> Self {
        Self {
            jid,
            host: host.into(),
            port,
        }
    }

    /// Advertised candidates are only usable with a valid identity, a host and a port.
    pub fn is_valid(&self) -> bool {
        self.jid.is_valid() && !self.host.is_empty() && self.port > 0
    }
}

impl fmt::Display for HostCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.jid, self.host, self.port)
    }
}

/// Bytestream transport mode requested in a host offer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Reliable TCP streams (the only supported mode)
    #[default]
    Tcp,
    /// Datagram relay
    Udp,
}

/// Candidate list sent by the initiator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostsOffer {
    /// Session id
    pub sid: String,
    /// Requested mode
    #[serde(default)]
    pub mode: StreamMode,
    /// Connect key the target must present (`dstaddr`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dstaddr: Option<String>,
    /// Candidates in preference order
    pub hosts: Vec<HostCandidate>,
}

/// Target's answer naming the candidate it connected through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostUsed {
    /// Id of the host offer being answered
    pub in_reply_to: RequestId,
    /// Session id
    pub sid: String,
    /// Identity of the chosen candidate
    pub jid: Jid,
}

/// Activation request sent by the initiator to a relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activation {
    /// Session id
    pub sid: String,
    /// Peer the relay should pair with
    pub target: Jid,
}

/// Stanza error conditions used by the negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StanzaErrorCondition {
    /// No candidate could be reached
    ItemNotFound,
    /// Requested mode not supported
    NotAcceptable,
    /// Malformed request
    BadRequest,
    /// Peer or relay refuses the request
    Forbidden,
    /// Service is not available
    ServiceUnavailable,
    /// Request timed out in transit
    RemoteServerTimeout,
    /// Anything else
    UndefinedCondition,
}

impl StanzaErrorCondition {
    /// Legacy numeric error code.
    pub fn code(&self) -> u16 {
        match self {
            Self::ItemNotFound => 404,
            Self::NotAcceptable => 406,
            Self::BadRequest => 400,
            Self::Forbidden => 403,
            Self::ServiceUnavailable => 503,
            Self::RemoteServerTimeout => 504,
            Self::UndefinedCondition => 500,
        }
    }

    /// Condition name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ItemNotFound => "item-not-found",
            Self::NotAcceptable => "not-acceptable",
            Self::BadRequest => "bad-request",
            Self::Forbidden => "forbidden",
            Self::ServiceUnavailable => "service-unavailable",
            Self::RemoteServerTimeout => "remote-server-timeout",
            Self::UndefinedCondition => "undefined-condition",
        }
    }
}

/// Error carried by an error reply or notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StanzaError {
    /// Condition
    pub condition: StanzaErrorCondition,
    /// Optional human-readable text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl StanzaError {
    /// Error without text.
    pub fn new(condition: StanzaErrorCondition) -> Self {
        Self {
            condition,
            text: None,
        }
    }

    /// Attach text.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

impl fmt::Display for StanzaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.text {
            Some(text) => write!(f, "{}: {}", self.condition.name(), text),
            None => f.write_str(self.condition.name()),
        }
    }
}

/// Every payload the engine sends or expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Ask a proxy for its stream host address
    ProxyQuery,
    /// Proxy's answer to [`Payload::ProxyQuery`]
    StreamHost(HostCandidate),
    /// Initiator's candidate list
    Hosts(HostsOffer),
    /// Target's chosen candidate
    HostUsed(HostUsed),
    /// Initiator asks a relay to start forwarding
    Activate(Activation),
    /// Empty success reply
    Ack,
    /// Error notice answering a request
    Error {
        /// Id of the request being refused
        #[serde(skip_serializing_if = "Option::is_none")]
        in_reply_to: Option<RequestId>,
        /// What went wrong
        error: StanzaError,
    },
}

impl Payload {
    /// Error notice answering `request`.
    pub fn error_reply(request: Option<RequestId>, condition: StanzaErrorCondition) -> Self {
        Self::Error {
            in_reply_to: request,
            error: StanzaError::new(condition),
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Outcome of a request as delivered by the transport.
pub type Reply = std::result::Result<Payload, StanzaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_validity() {
        let jid = Jid::new("proxy.example.org");
        assert!(HostCandidate::new(jid.clone(), "10.0.0.1", 7777).is_valid());
        assert!(!HostCandidate::new(jid.clone(), "", 7777).is_valid());
        assert!(!HostCandidate::new(jid, "10.0.0.1", 0).is_valid());
        assert!(!HostCandidate::new(Jid::new(""), "10.0.0.1", 7777).is_valid());
    }

    #[test]
    fn test_listener_filter() {
        let filter = ListenerFilter {
            session_id: "s1".to_string(),
        };
        let offer = |sid: &str| {
            Payload::Hosts(HostsOffer {
                sid: sid.to_string(),
                mode: StreamMode::Tcp,
                dstaddr: None,
                hosts: Vec::new(),
            })
        };
        assert!(filter.matches(&offer("s1")));
        assert!(!filter.matches(&offer("s2")));
        assert!(!filter.matches(&Payload::Ack));
    }

    #[test]
    fn test_hosts_offer_json_shape() {
        let payload = Payload::Hosts(HostsOffer {
            sid: "s1".to_string(),
            mode: StreamMode::Tcp,
            dstaddr: Some("abc".to_string()),
            hosts: vec![HostCandidate::new(
                Jid::new("alice@example.org/res"),
                "192.168.1.10",
                8010,
            )],
        });

        let value: serde_json::Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "hosts");
        assert_eq!(value["mode"], "tcp");
        assert_eq!(value["hosts"][0]["port"], 8010);

        let parsed = Payload::from_json(&payload.to_json().unwrap()).unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn test_error_reply() {
        let payload = Payload::error_reply(
            Some(RequestId::new("r1")),
            StanzaErrorCondition::ItemNotFound,
        );
        match payload {
            Payload::Error { in_reply_to, error } => {
                assert_eq!(in_reply_to, Some(RequestId::new("r1")));
                assert_eq!(error.condition.code(), 404);
                assert_eq!(error.to_string(), "item-not-found");
            },
            _ => panic!("expected error payload"),
        }
    }
}
