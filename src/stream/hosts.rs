//! Host candidate list construction.
//!
//! Order is significant. The initiator offers its own candidates first
//! (the forward address alone when configured, otherwise every IPv4
//! non-loopback interface address in enumeration order) followed by the
//! relays discovered through proxy queries, in reply order. The target
//! tries an offered list in received order.

use std::net::IpAddr;

use crate::protocol::{HostCandidate, HostsOffer, Jid};

use super::StreamSettings;

/// Addresses of the local network interfaces, unfiltered.
pub fn interface_addresses() -> Vec<IpAddr> {
    match get_if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces.into_iter().map(|iface| iface.ip()).collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate network interfaces: {}", e);
            Vec::new()
        },
    }
}

/// Candidates naming `local` as host.
///
/// A configured forward address replaces interface discovery entirely.
/// Interface addresses are paired with `listening_port` and skipped when
/// nothing listens (port 0).
pub fn local_candidates(
    local: &Jid,
    settings: &StreamSettings,
    interfaces: &[IpAddr],
    listening_port: u16,
) -> Vec<HostCandidate> {
    if let Some((host, port)) = settings.forward_address() {
        return vec![HostCandidate::new(local.clone(), host, port)];
    }

    if listening_port == 0 {
        tracing::debug!("No local listener, direct interface candidates skipped");
        return Vec::new();
    }

    interfaces
        .iter()
        .filter(|ip| ip.is_ipv4() && !ip.is_loopback())
        .map(|ip| HostCandidate::new(local.clone(), ip.to_string(), listening_port))
        .collect()
}

/// Full offer order: local candidates, then relay candidates.
pub fn assemble(local: Vec<HostCandidate>, relays: Vec<HostCandidate>) -> Vec<HostCandidate> {
    let mut hosts = local;
    hosts.extend(relays);
    hosts
}

/// Usable candidates of a received offer, in received order.
pub fn accept_offered(offer: &HostsOffer) -> Vec<HostCandidate> {
    offer
        .hosts
        .iter()
        .filter(|host| {
            let valid = host.is_valid();
            if !valid {
                tracing::warn!(
                    sid = %offer.sid,
                    "Skipping invalid stream host, jid={}, host={}, port={}",
                    host.jid,
                    host.host,
                    host.port
                );
            }
            valid
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StreamMode;
    use proptest::prelude::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn local() -> Jid {
        Jid::new("alice@example.org/res")
    }

    fn ifaces() -> Vec<IpAddr> {
        vec![
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
        ]
    }

    fn relay() -> HostCandidate {
        HostCandidate::new(Jid::new("proxy.example.org"), "203.0.113.9", 7777)
    }

    #[test]
    fn test_forward_address_first() {
        let settings = StreamSettings {
            forward_host: "gw.example.org".to_string(),
            forward_port: 9000,
            ..Default::default()
        };
        let hosts = assemble(
            local_candidates(&local(), &settings, &ifaces(), 8010),
            vec![relay()],
        );

        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].host, "gw.example.org");
        assert_eq!(hosts[0].port, 9000);
        assert_eq!(hosts[0].jid, local());
        assert_eq!(hosts[1], relay());
    }

    #[test]
    fn test_interfaces_in_order_without_forward() {
        let hosts = assemble(
            local_candidates(&local(), &StreamSettings::default(), &ifaces(), 8010),
            vec![relay()],
        );

        let addrs: Vec<_> = hosts.iter().map(|h| h.host.as_str()).collect();
        assert_eq!(addrs, vec!["192.168.1.10", "10.0.0.5", "203.0.113.9"]);
        assert!(hosts[..2].iter().all(|h| h.port == 8010 && h.jid == local()));
    }

    #[test]
    fn test_no_listener_no_interface_candidates() {
        let hosts = local_candidates(&local(), &StreamSettings::default(), &ifaces(), 0);
        assert!(hosts.is_empty());
    }

    #[test]
    fn test_accept_offered_drops_invalid() {
        let offer = HostsOffer {
            sid: "s1".to_string(),
            mode: StreamMode::Tcp,
            dstaddr: None,
            hosts: vec![
                HostCandidate::new(Jid::new(""), "10.0.0.1", 1),
                relay(),
                HostCandidate::new(Jid::new("bob@example.org/r"), "", 1),
                HostCandidate::new(Jid::new("bob@example.org/r"), "10.0.0.2", 0),
                HostCandidate::new(Jid::new("bob@example.org/r"), "10.0.0.3", 8010),
            ],
        };
        let hosts = accept_offered(&offer);
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0], relay());
        assert_eq!(hosts[1].host, "10.0.0.3");
    }

    proptest! {
        #[test]
        fn prop_local_candidates_exclude_ipv6_and_loopback(octets in proptest::collection::vec(any::<[u8; 4]>(), 0..16)) {
            let interfaces: Vec<IpAddr> = octets.iter().map(|o| IpAddr::V4(Ipv4Addr::from(*o))).collect();
            let hosts = local_candidates(&local(), &StreamSettings::default(), &interfaces, 8010);

            let expected: Vec<String> = interfaces
                .iter()
                .filter(|ip| !ip.is_loopback())
                .map(|ip| ip.to_string())
                .collect();
            let got: Vec<String> = hosts.into_iter().map(|h| h.host).collect();
            prop_assert_eq!(got, expected);
        }
    }
}
