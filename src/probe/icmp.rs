use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{IcmpCode, IcmpType};
use pnet::packet::{MutablePacket, Packet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, LazyLock};

use crate::probe::checksum::checksum;

/// ICMP header size (fixed)
pub const ICMP_HEADER_SIZE: usize = 8;
/// Largest payload that fits an IPv4 datagram on a 1500 byte MTU
pub const MAX_PAYLOAD_SIZE: usize = 1472;

/// Get process identifier for ICMP identification field
pub fn get_identifier() -> u16 {
    (std::process::id() & 0xFFFF) as u16
}

/// Build an ICMP Echo Request
///
/// Layout: type, code 0, checksum, identifier (BE), sequence (BE), payload.
/// The checksum is computed over the whole message with the field zeroed.
/// The same inputs always produce the same bytes.
pub fn build_echo_request(icmp_type: u8, identifier: u16, sequence: u16, payload: &[u8]) -> Vec<u8> {
    let mut buffer = vec![0u8; ICMP_HEADER_SIZE + payload.len()];

    // The buffer always holds a full header
    let Some(mut packet) = MutableEchoRequestPacket::new(&mut buffer) else {
        return buffer;
    };
    packet.set_icmp_type(IcmpType::new(icmp_type));
    packet.set_icmp_code(IcmpCode::new(0));
    packet.set_identifier(identifier);
    packet.set_sequence_number(sequence);
    packet.payload_mut().copy_from_slice(payload);

    let cksum = checksum(packet.packet());
    packet.set_checksum(cksum);

    buffer
}

/// Pattern-filled echo payload of `size` bytes
pub fn echo_payload(size: usize) -> Vec<u8> {
    (0..size.min(MAX_PAYLOAD_SIZE)).map(|i| (i & 0xFF) as u8).collect()
}

/// Monotonic 16-bit sequence source shared by concurrent probes.
///
/// Identifiers are process-derived and effectively constant, so the sequence
/// number is what tells concurrent outstanding probes apart.
#[derive(Debug, Default)]
pub struct SequenceCounter(AtomicU32);

static GLOBAL_SEQUENCE: LazyLock<Arc<SequenceCounter>> =
    LazyLock::new(|| Arc::new(SequenceCounter::new()));

impl SequenceCounter {
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// The process-wide counter
    pub fn global() -> Arc<SequenceCounter> {
        Arc::clone(&GLOBAL_SEQUENCE)
    }

    /// Next sequence number, starting at 1 and wrapping at 16 bits
    pub fn next(&self) -> u16 {
        let value = self.0.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        (value & 0xFFFF) as u16
    }
}
