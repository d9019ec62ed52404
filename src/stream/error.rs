//! Error record attached to a session when negotiation or relay fails.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a session was forced to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCondition {
    /// Peer requested an unsupported transport mode
    InvalidMode,
    /// Local candidate list could not be sent
    HostsNotCreated,
    /// Peer rejected the candidate list
    HostsRejected,
    /// Chosen candidate is not one we offered
    InvalidHost,
    /// Chosen candidate has an unusable address
    InvalidHostAddress,
    /// Peer chose us but never connected
    NoDirectConnection,
    /// Every candidate failed
    HostsUnreachable,
    /// Relay activation failed
    NotActivated,
    /// Connection to the chosen relay failed
    HostNotConnected,
    /// Bound socket failed with an error
    HostDisconnected,
    /// Buffered data could not be written to the socket
    DataNotSent,
    /// Session dropped while still open
    StreamDestroyed,
    /// Inbound listener for host offers could not be installed
    ListenerNotRegistered,
}

impl ErrorCondition {
    /// Stable condition name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidMode => "invalid-mode",
            Self::HostsNotCreated => "hosts-not-created",
            Self::HostsRejected => "hosts-rejected",
            Self::InvalidHost => "invalid-host",
            Self::InvalidHostAddress => "invalid-host-address",
            Self::NoDirectConnection => "no-direct-connection",
            Self::HostsUnreachable => "hosts-unreachable",
            Self::NotActivated => "not-activated",
            Self::HostNotConnected => "host-not-connected",
            Self::HostDisconnected => "host-disconnected",
            Self::DataNotSent => "data-not-sent",
            Self::StreamDestroyed => "stream-destroyed",
            Self::ListenerNotRegistered => "listener-not-registered",
        }
    }

    /// Human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidMode => "Unsupported stream mode",
            Self::HostsNotCreated => "Failed to create stream hosts",
            Self::HostsRejected => "Remote client cannot connect to any offered host",
            Self::InvalidHost => "Invalid stream host",
            Self::InvalidHostAddress => "Invalid stream host address",
            Self::NoDirectConnection => "Direct connection not established",
            Self::HostsUnreachable => "Failed to connect to stream hosts",
            Self::NotActivated => "Failed to activate stream",
            Self::HostNotConnected => "Failed to connect to stream host",
            Self::HostDisconnected => "Stream host disconnected",
            Self::DataNotSent => "Failed to send data to socket",
            Self::StreamDestroyed => "Stream destroyed",
            Self::ListenerNotRegistered => "Failed to listen for stream hosts",
        }
    }
}

impl fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Condition plus optional detail.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{condition}{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
pub struct StreamError {
    /// What failed
    pub condition: ErrorCondition,
    /// Detail, such as the socket error text
    pub message: Option<String>,
}

impl StreamError {
    /// Error without detail.
    pub fn new(condition: ErrorCondition) -> Self {
        Self {
            condition,
            message: None,
        }
    }

    /// Error with detail.
    pub fn with_message(condition: ErrorCondition, message: impl Into<String>) -> Self {
        Self {
            condition,
            message: Some(message.into()),
        }
    }
}

impl From<ErrorCondition> for StreamError {
    fn from(condition: ErrorCondition) -> Self {
        Self::new(condition)
    }
}
