//! ICMP echo packet construction and validation
//!
//! Every request carries a private payload right after the 8 byte ICMP
//! header: the send timestamp (microseconds since the session epoch, big
//! endian `u64`) followed by the correlation index of the target host (big
//! endian `u32`). Only this engine's own encoder and decoder need to agree
//! on that layout.

use pnet::packet::icmp::echo_reply::EchoReplyPacket;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{IcmpCode, IcmpPacket, IcmpTypes};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::{MutablePacket, Packet};
use pnet::util::checksum as pnet_checksum;

/// ICMP header length in bytes
pub const ICMP_HEADER_LEN: usize = 8;
/// IPv4 header minimum length in bytes
pub const IPV4_HEADER_MIN_LEN: usize = 20;
/// Length of the private payload (timestamp + correlation index)
pub const PAYLOAD_LEN: usize = 12;
/// Smallest request able to carry the private payload
pub const MIN_PACKET_SIZE: usize = ICMP_HEADER_LEN + PAYLOAD_LEN;
/// Largest ICMP message that fits in a single IPv4 datagram
pub const MAX_PACKET_SIZE: usize = 65535 - IPV4_HEADER_MIN_LEN;
/// Receive buffer large enough for any IPv4 datagram
pub const RECV_BUFFER_SIZE: usize = 65535;

/// Offset of the timestamp inside an ICMP echo message
const TIMESTAMP_OFFSET: usize = ICMP_HEADER_LEN;
/// Offset of the correlation index inside an ICMP echo message
const INDEX_OFFSET: usize = ICMP_HEADER_LEN + 8;

/// Why a received datagram was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Shorter than an IP header plus an ICMP header, or a broken IP header
    Malformed,
    /// Not one of ours (identifier mismatch, or our own request looped back)
    Foreign,
    /// Ours, but the correlation index is missing or out of range
    Illegal,
}

/// Kind of an accepted ICMP message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpKind {
    /// Echo reply that can be routed to its host
    EchoReply,
    /// Any other correlated ICMP type, handled as a lost probe
    Other(u8),
}

/// An accepted datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPacket {
    /// Echo reply or another correlated type
    pub kind: IcmpKind,
    /// Correlation index read from the private payload
    pub index: u32,
    /// ICMP sequence number
    pub sequence: u16,
    /// TTL of the received IP datagram
    pub ttl: u8,
    /// Send timestamp read from the private payload
    pub sent_at_us: u64,
    /// Datagram length without the IP header
    pub icmp_len: usize,
}

/// Build an ICMP Echo Request ready to be transmitted
///
/// The identifier, the sequence (zero extended to 16 bits) and the private
/// payload are filled in before the Internet checksum is computed over the
/// whole message. Sizes below [`MIN_PACKET_SIZE`] are raised to it.
pub fn encode_echo_request(
    size: usize,
    sequence: u8,
    index: u32,
    identifier: u16,
    sent_at_us: u64,
) -> Vec<u8> {
    let mut buf = vec![0u8; size.max(MIN_PACKET_SIZE)];

    if let Some(mut packet) = MutableEchoRequestPacket::new(&mut buf) {
        packet.set_icmp_type(IcmpTypes::EchoRequest);
        packet.set_icmp_code(IcmpCode(0));
        packet.set_identifier(identifier);
        packet.set_sequence_number(u16::from(sequence));

        let payload = packet.payload_mut();
        payload[..8].copy_from_slice(&sent_at_us.to_be_bytes());
        payload[8..PAYLOAD_LEN].copy_from_slice(&index.to_be_bytes());

        let checksum = pnet_checksum(packet.packet(), 1);
        packet.set_checksum(checksum);
    }

    buf
}

/// Validate a raw IPv4 datagram and extract the correlation data
///
/// Checks run in a fixed order: length, identifier, correlation index.
/// `host_count` is the number of currently registered hosts; an index is
/// legal only when it is strictly below it.
pub fn decode(
    datagram: &[u8],
    identifier: u16,
    host_count: usize,
) -> Result<DecodedPacket, Rejection> {
    let ip = Ipv4Packet::new(datagram).ok_or(Rejection::Malformed)?;
    let header_len = usize::from(ip.get_header_length()) * 4;
    if header_len < IPV4_HEADER_MIN_LEN || datagram.len() < header_len + ICMP_HEADER_LEN {
        return Err(Rejection::Malformed);
    }
    let ttl = ip.get_ttl();
    let icmp_data = &datagram[header_len..];
    let icmp = IcmpPacket::new(icmp_data).ok_or(Rejection::Malformed)?;
    let icmp_type = icmp.get_icmp_type();

    let (sequence, echo) = match icmp_type {
        IcmpTypes::EchoReply => {
            let reply = EchoReplyPacket::new(icmp_data).ok_or(Rejection::Malformed)?;
            if reply.get_identifier() != identifier {
                return Err(Rejection::Foreign);
            }
            (reply.get_sequence_number(), icmp_data)
        }
        // Our own requests show up on the raw socket when pinging a local address
        IcmpTypes::EchoRequest => return Err(Rejection::Foreign),
        IcmpTypes::DestinationUnreachable
        | IcmpTypes::SourceQuench
        | IcmpTypes::RedirectMessage
        | IcmpTypes::TimeExceeded
        | IcmpTypes::ParameterProblem => {
            let quoted = quoted_echo_request(&icmp_data[ICMP_HEADER_LEN..])?;
            if u16::from_be_bytes([quoted[4], quoted[5]]) != identifier {
                return Err(Rejection::Foreign);
            }
            (u16::from_be_bytes([quoted[6], quoted[7]]), quoted)
        }
        _ => {
            if u16::from_be_bytes([icmp_data[4], icmp_data[5]]) != identifier {
                return Err(Rejection::Foreign);
            }
            (u16::from_be_bytes([icmp_data[6], icmp_data[7]]), icmp_data)
        }
    };

    let (sent_at_us, index) = read_payload(echo).ok_or(Rejection::Illegal)?;
    if usize::try_from(index).map_or(true, |i| i >= host_count) {
        return Err(Rejection::Illegal);
    }

    let kind = if icmp_type == IcmpTypes::EchoReply {
        IcmpKind::EchoReply
    } else {
        IcmpKind::Other(icmp_type.0)
    };

    Ok(DecodedPacket {
        kind,
        index,
        sequence,
        ttl,
        sent_at_us,
        icmp_len: datagram.len() - header_len,
    })
}

/// Locate the echo request quoted inside an ICMP error message
fn quoted_echo_request(quoted: &[u8]) -> Result<&[u8], Rejection> {
    let inner = Ipv4Packet::new(quoted).ok_or(Rejection::Malformed)?;
    let inner_len = usize::from(inner.get_header_length()) * 4;
    if inner_len < IPV4_HEADER_MIN_LEN || quoted.len() < inner_len + ICMP_HEADER_LEN {
        return Err(Rejection::Malformed);
    }
    let request = &quoted[inner_len..];
    if request[0] != IcmpTypes::EchoRequest.0 {
        return Err(Rejection::Foreign);
    }
    Ok(request)
}

/// Read the private payload of an echo message, if it is long enough
fn read_payload(echo: &[u8]) -> Option<(u64, u32)> {
    let timestamp = echo.get(TIMESTAMP_OFFSET..INDEX_OFFSET)?;
    let index = echo.get(INDEX_OFFSET..INDEX_OFFSET + 4)?;
    Some((
        u64::from_be_bytes(timestamp.try_into().ok()?),
        u32::from_be_bytes(index.try_into().ok()?),
    ))
}
