use pnet::packet::icmp::echo_reply::EchoReplyPacket;

use crate::error::ValidationError;
use crate::probe::checksum::checksum;
use crate::probe::protocol::Protocol;

/// Confirm `datagram` is the echo reply to our request
///
/// Checks run in order and the first failure is reported:
/// - fewer than 8 bytes of ICMP message: `ShortReply`
/// - type is not the family's echo reply, or code is non-zero: `UnexpectedType`
/// - identifier or sequence differ from the request: `IdentityMismatch`
/// - with `strict`, the message does not sum to zero: `ChecksumMismatch`
///
/// The strict check is skipped for families whose checksum covers a
/// pseudo-header (ICMPv6).
pub fn validate_reply<P: Protocol + ?Sized>(
    protocol: &P,
    datagram: &[u8],
    has_ip_header: bool,
    identifier: u16,
    sequence: u16,
    strict: bool,
) -> Result<(), ValidationError> {
    let icmp_data = protocol.icmp_message(datagram, has_ip_header);
    let reply = EchoReplyPacket::new(icmp_data).ok_or(ValidationError::ShortReply {
        len: icmp_data.len(),
    })?;

    let kind = reply.get_icmp_type().0;
    let code = reply.get_icmp_code().0;
    if kind != protocol.reply_type() || code != 0 {
        return Err(ValidationError::UnexpectedType { kind, code });
    }

    let id = reply.get_identifier();
    let seq = reply.get_sequence_number();
    if id != identifier || seq != sequence {
        return Err(ValidationError::IdentityMismatch {
            expected_id: identifier,
            expected_seq: sequence,
            id,
            seq,
        });
    }

    if strict && protocol.verifies_checksum() {
        let residual = checksum(icmp_data);
        if residual != 0 {
            return Err(ValidationError::ChecksumMismatch(residual));
        }
    }

    Ok(())
}
