//! Per-session connection properties.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{DEFAULT_CONNECT_TIMEOUT_MS, MIN_CONNECT_TIMEOUT_MS};
use crate::protocol::Jid;
use crate::transport::NetworkProxy;

/// Properties a session negotiates with, seeded from [`Config`](crate::Config)
/// and adjustable through the session's setters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// TCP connect (and handshake) timeout per candidate, in milliseconds
    pub connect_timeout_ms: u64,

    /// Never offer ourselves as a direct candidate
    pub direct_connections_disabled: bool,

    /// Externally reachable host to advertise instead of interface addresses
    pub forward_host: String,

    /// Port paired with `forward_host`
    pub forward_port: u16,

    /// Relays to query for stream host addresses
    pub proxies: Vec<Jid>,

    /// How outbound candidate connections reach the network
    pub network_proxy: NetworkProxy,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            direct_connections_disabled: false,
            forward_host: String::new(),
            forward_port: 0,
            proxies: Vec::new(),
            network_proxy: NetworkProxy::Direct,
        }
    }
}

impl StreamSettings {
    /// Connect timeout as a duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Forward address, when both host and port are set.
    pub fn forward_address(&self) -> Option<(&str, u16)> {
        if !self.forward_host.is_empty() && self.forward_port > 0 {
            Some((self.forward_host.as_str(), self.forward_port))
        } else {
            None
        }
    }

    /// Is `timeout_ms` acceptable as a connect timeout?
    pub fn is_valid_connect_timeout(timeout_ms: u64) -> bool {
        timeout_ms > MIN_CONNECT_TIMEOUT_MS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = StreamSettings::default();
        assert_eq!(settings.connect_timeout(), Duration::from_secs(10));
        assert!(settings.forward_address().is_none());
        assert!(settings.proxies.is_empty());
    }

    #[test]
    fn test_forward_address_needs_both_parts() {
        let mut settings = StreamSettings {
            forward_host: "gw.example.org".to_string(),
            ..Default::default()
        };
        assert!(settings.forward_address().is_none());
        settings.forward_port = 7777;
        assert_eq!(settings.forward_address(), Some(("gw.example.org", 7777)));
    }

    #[test]
    fn test_connect_timeout_floor() {
        assert!(!StreamSettings::is_valid_connect_timeout(100));
        assert!(StreamSettings::is_valid_connect_timeout(101));
    }
}
