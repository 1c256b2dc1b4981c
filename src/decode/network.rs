//! ARP / IPv4 / IPv6 network-layer decoding

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::{read_field, remaining};
use crate::types::{NetworkProtocol, NetworkRecord, Timestamp, ether_type};
use crate::{DecodeError, Layer};

/// Bytes of an Ethernet/IPv4 ARP packet the decoder needs
pub const ARP_LEN: usize = 28;
/// Minimum IPv4 header length (IHL of 5 words)
pub const IPV4_MIN_HEADER_LEN: usize = 20;
/// Fixed IPv6 base header length
pub const IPV6_HEADER_LEN: usize = 40;

// ARP sender/target protocol address offsets
const ARP_SENDER_IP: usize = 14;
const ARP_TARGET_IP: usize = 24;

// IPv4 field offsets
const IPV4_PROTOCOL: usize = 9;
const IPV4_SOURCE: usize = 12;
const IPV4_DEST: usize = 16;

// IPv6 field offsets
const IPV6_NEXT_HEADER: usize = 6;
const IPV6_SOURCE: usize = 8;
const IPV6_DEST: usize = 24;

/// Output of [`decode_network`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkDecode {
    /// `None` when the EtherType is not ARP, IPv4 or IPv6
    pub record: Option<NetworkRecord>,
    /// Offset where the transport header starts
    pub next_offset: usize,
}

impl NetworkDecode {
    /// Protocol id at the wire boundary.
    ///
    /// Returns [`ether_type::PROTOCOL_ID_NONE`] when no network layer was
    /// identified.
    pub fn protocol_id(&self) -> u8 {
        self.record.as_ref().map_or(ether_type::PROTOCOL_ID_NONE, |r| r.protocol_id)
    }

    /// Whether a network layer was identified
    pub fn is_identified(&self) -> bool {
        self.record.is_some()
    }
}

/// Decode the network header at `offset` according to `ether_type`.
///
/// Unrecognized EtherTypes are not an error: the result carries no record and
/// `next_offset == offset`. ARP never advances the offset. IPv6 extension
/// headers are not walked; the base header's next-header byte is taken as the
/// transport protocol and `next_offset` is always `offset + 40`.
///
/// # Errors
///
/// - [`DecodeError::TruncatedHeader`] if the header does not fit in the
///   remaining bytes (including an IPv4 IHL larger than what remains)
/// - [`DecodeError::InvalidHeaderLength`] if the IPv4 IHL is below 5 words
pub fn decode_network(
    frame: &[u8],
    ether_type: u16,
    offset: usize,
    timestamp: Timestamp,
) -> Result<NetworkDecode, DecodeError> {
    match ether_type {
        ether_type::ARP => decode_arp(frame, offset, timestamp),
        ether_type::IPV4 => decode_ipv4(frame, offset, timestamp),
        ether_type::IPV6 => decode_ipv6(frame, offset, timestamp),
        _ => Ok(NetworkDecode { record: None, next_offset: offset }),
    }
}

fn decode_arp(
    frame: &[u8],
    offset: usize,
    timestamp: Timestamp,
) -> Result<NetworkDecode, DecodeError> {
    let header = require(frame, offset, ARP_LEN, Layer::Arp)?;

    let source: [u8; 4] = read_field(header, ARP_SENDER_IP, Layer::Arp)?;
    let dest: [u8; 4] = read_field(header, ARP_TARGET_IP, Layer::Arp)?;

    let record = NetworkRecord {
        timestamp,
        source_addr: IpAddr::V4(Ipv4Addr::from(source)),
        dest_addr: IpAddr::V4(Ipv4Addr::from(dest)),
        protocol: NetworkProtocol::Arp,
        protocol_id: 0,
        frame_length: frame.len(),
    };

    Ok(NetworkDecode { record: Some(record), next_offset: offset })
}

fn decode_ipv4(
    frame: &[u8],
    offset: usize,
    timestamp: Timestamp,
) -> Result<NetworkDecode, DecodeError> {
    let header = require(frame, offset, IPV4_MIN_HEADER_LEN, Layer::Ipv4)?;

    let header_len = usize::from(header[0] & 0x0f) * 4;
    if header_len < IPV4_MIN_HEADER_LEN {
        return Err(DecodeError::InvalidHeaderLength {
            layer: Layer::Ipv4,
            declared: header_len,
            minimum: IPV4_MIN_HEADER_LEN,
            available: header.len(),
        });
    }
    if header_len > header.len() {
        return Err(DecodeError::TruncatedHeader {
            layer: Layer::Ipv4,
            needed: header_len,
            available: header.len(),
        });
    }

    let source: [u8; 4] = read_field(header, IPV4_SOURCE, Layer::Ipv4)?;
    let dest: [u8; 4] = read_field(header, IPV4_DEST, Layer::Ipv4)?;

    let record = NetworkRecord {
        timestamp,
        source_addr: IpAddr::V4(Ipv4Addr::from(source)),
        dest_addr: IpAddr::V4(Ipv4Addr::from(dest)),
        protocol: NetworkProtocol::Ipv4,
        protocol_id: header[IPV4_PROTOCOL],
        frame_length: frame.len(),
    };

    Ok(NetworkDecode { record: Some(record), next_offset: offset + header_len })
}

fn decode_ipv6(
    frame: &[u8],
    offset: usize,
    timestamp: Timestamp,
) -> Result<NetworkDecode, DecodeError> {
    let header = require(frame, offset, IPV6_HEADER_LEN, Layer::Ipv6)?;

    let source: [u8; 16] = read_field(header, IPV6_SOURCE, Layer::Ipv6)?;
    let dest: [u8; 16] = read_field(header, IPV6_DEST, Layer::Ipv6)?;

    let record = NetworkRecord {
        timestamp,
        source_addr: IpAddr::V6(Ipv6Addr::from(source)),
        dest_addr: IpAddr::V6(Ipv6Addr::from(dest)),
        protocol: NetworkProtocol::Ipv6,
        protocol_id: header[IPV6_NEXT_HEADER],
        frame_length: frame.len(),
    };

    Ok(NetworkDecode { record: Some(record), next_offset: offset + IPV6_HEADER_LEN })
}

/// Bytes from `offset` to the end of the frame, if at least `needed` remain.
fn require(frame: &[u8], offset: usize, needed: usize, layer: Layer) -> Result<&[u8], DecodeError> {
    let header = remaining(frame, offset);
    if header.len() < needed {
        return Err(DecodeError::TruncatedHeader { layer, needed, available: header.len() });
    }
    Ok(header)
}
