//! Address-family strategy for ICMP echo probes.
//!
//! The family is resolved once when a checker is built; afterwards the probe
//! dispatches purely through the selected [`Protocol`].

use pnet::packet::ipv4::Ipv4Packet;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv6Addr, ToSocketAddrs};
use std::sync::Arc;

use crate::error::{AddressError, ValidationError};
use crate::probe::correlate::validate_reply;
use crate::probe::icmp::build_echo_request;
use crate::probe::socket::SocketConn;

pub const ICMPV4_ECHO_REQUEST: u8 = 8;
pub const ICMPV4_ECHO_REPLY: u8 = 0;
pub const ICMPV6_ECHO_REQUEST: u8 = 128;
pub const ICMPV6_ECHO_REPLY: u8 = 129;

/// Smallest legal IPv4 header (IHL = 5)
const IPV4_MIN_HEADER_LEN: usize = 20;

/// Family-specific behaviour of an echo probe
pub trait Protocol: fmt::Debug + Send + Sync {
    /// Network name of the listener ("ip4:icmp" or "ip6:ipv6-icmp")
    fn network(&self) -> &'static str;

    fn is_ipv6(&self) -> bool;

    /// ICMP type of an echo request in this family
    fn request_type(&self) -> u8;

    /// ICMP type an echo reply must carry
    fn reply_type(&self) -> u8;

    /// Slice the ICMP message out of a received datagram.
    ///
    /// `has_ip_header` is false for sockets that deliver the bare ICMP
    /// message (unprivileged DGRAM sockets, and every IPv6 socket).
    fn icmp_message<'a>(&self, datagram: &'a [u8], has_ip_header: bool) -> &'a [u8];

    /// Whether the plain RFC 1071 sum over the message verifies a reply.
    /// ICMPv6 checksums also cover a pseudo-header the socket never sees.
    fn verifies_checksum(&self) -> bool;

    /// Resolve `address` to an IP of this family
    fn resolve(&self, address: &str) -> Result<IpAddr, AddressError> {
        resolve_candidates(address)?
            .into_iter()
            .find(|ip| ip.is_ipv6() == self.is_ipv6())
            .ok_or_else(|| AddressError::NoAddresses(address.to_string()))
    }

    /// Open a packet listener on the wildcard address of this family
    fn listen_packet(&self) -> io::Result<SocketConn> {
        SocketConn::open(self.is_ipv6())
    }

    fn make_request(&self, identifier: u16, sequence: u16, payload: &[u8]) -> Vec<u8> {
        build_echo_request(self.request_type(), identifier, sequence, payload)
    }

    fn validate_reply(
        &self,
        datagram: &[u8],
        has_ip_header: bool,
        identifier: u16,
        sequence: u16,
        strict: bool,
    ) -> Result<(), ValidationError> {
        validate_reply(self, datagram, has_ip_header, identifier, sequence, strict)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ipv4EchoProtocol;

impl Protocol for Ipv4EchoProtocol {
    fn network(&self) -> &'static str {
        "ip4:icmp"
    }

    fn is_ipv6(&self) -> bool {
        false
    }

    fn request_type(&self) -> u8 {
        ICMPV4_ECHO_REQUEST
    }

    fn reply_type(&self) -> u8 {
        ICMPV4_ECHO_REPLY
    }

    fn icmp_message<'a>(&self, datagram: &'a [u8], has_ip_header: bool) -> &'a [u8] {
        if !has_ip_header {
            return datagram;
        }
        // Header length comes from the IHL field; anything shorter than a
        // minimal header leaves no ICMP message at all
        let Some(ip_packet) = Ipv4Packet::new(datagram) else {
            return &[];
        };
        let ip_header_len = ((ip_packet.get_header_length() as usize) * 4).max(IPV4_MIN_HEADER_LEN);
        datagram.get(ip_header_len..).unwrap_or_default()
    }

    fn verifies_checksum(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ipv6EchoProtocol;

impl Protocol for Ipv6EchoProtocol {
    fn network(&self) -> &'static str {
        "ip6:ipv6-icmp"
    }

    fn is_ipv6(&self) -> bool {
        true
    }

    fn request_type(&self) -> u8 {
        ICMPV6_ECHO_REQUEST
    }

    fn reply_type(&self) -> u8 {
        ICMPV6_ECHO_REPLY
    }

    fn icmp_message<'a>(&self, datagram: &'a [u8], _has_ip_header: bool) -> &'a [u8] {
        // Raw IPv6 sockets never pass the IPv6 header up
        datagram
    }

    fn verifies_checksum(&self) -> bool {
        false
    }
}

/// Pick the protocol matching the family `address` resolves to
pub fn select_protocol(address: &str) -> Result<Arc<dyn Protocol>, AddressError> {
    Ok(protocol_for(resolve_address(address)?))
}

pub fn protocol_for(ip: IpAddr) -> Arc<dyn Protocol> {
    match ip {
        IpAddr::V4(_) => Arc::new(Ipv4EchoProtocol),
        IpAddr::V6(_) => Arc::new(Ipv6EchoProtocol),
    }
}

/// Resolve an IP literal or hostname, preferring IPv4 when both exist
pub fn resolve_address(address: &str) -> Result<IpAddr, AddressError> {
    let candidates = resolve_candidates(address)?;
    candidates
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| candidates.first())
        .copied()
        .ok_or_else(|| AddressError::NoAddresses(address.to_string()))
}

fn resolve_candidates(address: &str) -> Result<Vec<IpAddr>, AddressError> {
    let host = address
        .strip_prefix('[')
        .and_then(|a| a.strip_suffix(']'))
        .unwrap_or(address);

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }

    // Zone-scoped IPv6 literal such as "fe80::1%eth0". The zone picks the
    // family only; requests go out without a scope id.
    if let Some((ip, zone)) = host.split_once('%') {
        return match ip.parse::<Ipv6Addr>() {
            Ok(ip) if !zone.is_empty() => Ok(vec![IpAddr::V6(ip)]),
            _ => Err(AddressError::Invalid(address.to_string())),
        };
    }

    if !looks_like_hostname(host) {
        return Err(AddressError::Invalid(address.to_string()));
    }

    let addrs: Vec<IpAddr> = (host, 0)
        .to_socket_addrs()
        .map_err(|source| AddressError::Unresolvable {
            host: host.to_string(),
            source,
        })?
        .map(|s| s.ip())
        .collect();

    if addrs.is_empty() {
        return Err(AddressError::NoAddresses(address.to_string()));
    }
    Ok(addrs)
}

/// A hostname's last label is never all digits. Rejecting those up front
/// also keeps the system resolver from accepting shorthand numeric forms
/// such as "127001" or "127.1".
fn looks_like_hostname(host: &str) -> bool {
    let trimmed = host.strip_suffix('.').unwrap_or(host);
    let Some(last_label) = trimmed.rsplit('.').next() else {
        return false;
    };

    !last_label.is_empty()
        && !last_label.bytes().all(|b| b.is_ascii_digit())
        && trimmed
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.' || b == b'_')
        && !trimmed.split('.').any(str::is_empty)
}
