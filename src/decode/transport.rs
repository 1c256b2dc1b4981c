//! Transport-layer classification and port extraction

use super::{read_u16_be, remaining};
use crate::types::{NetworkRecord, Timestamp, TransportProtocol, TransportRecord};
use crate::{DecodeError, Layer};

/// Bytes needed to read both 16-bit ports
pub const PORTS_LEN: usize = 4;

/// Classify the payload of `network` and read ports for TCP and UDP.
///
/// Only the two port fields are parsed. ICMP and unknown protocols yield a
/// record with zero ports. ARP (protocol id `0`) is reported as protocol `0`.
///
/// # Errors
///
/// [`DecodeError::TruncatedHeader`] if the protocol is TCP or UDP and fewer
/// than four bytes remain at `offset`.
pub fn decode_transport(
    frame: &[u8],
    offset: usize,
    network: &NetworkRecord,
    timestamp: Timestamp,
) -> Result<TransportRecord, DecodeError> {
    let protocol = TransportProtocol::from_protocol_id(network.protocol_id);

    let (source_port, dest_port) = if protocol.has_ports() {
        let layer = if protocol == TransportProtocol::Tcp { Layer::Tcp } else { Layer::Udp };
        let header = remaining(frame, offset);
        let truncated =
            DecodeError::TruncatedHeader { layer, needed: PORTS_LEN, available: header.len() };
        let source = read_u16_be(header, 0).ok_or(truncated)?;
        let dest = read_u16_be(header, 2).ok_or(truncated)?;
        (source, dest)
    } else {
        (0, 0)
    };

    Ok(TransportRecord {
        timestamp,
        source_addr: network.source_addr,
        dest_addr: network.dest_addr,
        source_port,
        dest_port,
        protocol,
        frame_length: frame.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NetworkProtocol;
    use crate::test_utils::fixed_timestamp;
    use std::net::{IpAddr, Ipv4Addr};

    fn network(protocol_id: u8) -> NetworkRecord {
        NetworkRecord {
            timestamp: fixed_timestamp(),
            source_addr: IpAddr::V4(Ipv4Addr::new(172, 16, 0, 1)),
            dest_addr: IpAddr::V4(Ipv4Addr::new(172, 16, 0, 2)),
            protocol: NetworkProtocol::Ipv4,
            protocol_id,
            frame_length: 64,
        }
    }

    #[test]
    fn reads_big_endian_ports() {
        let frame = [0u8, 0, 0x14, 0xe9, 0x00, 0x35, 0xff, 0xff];
        let record = decode_transport(&frame, 2, &network(17), fixed_timestamp()).unwrap();

        assert_eq!(record.protocol, TransportProtocol::Udp);
        assert_eq!(record.source_port, 5353);
        assert_eq!(record.dest_port, 53);
        assert_eq!(record.source_addr, IpAddr::V4(Ipv4Addr::new(172, 16, 0, 1)));
        assert_eq!(record.frame_length, 8);
    }

    #[test]
    fn tcp_needs_four_bytes() {
        let frame = [0u8, 80, 0];
        assert_eq!(
            decode_transport(&frame, 0, &network(6), fixed_timestamp()),
            Err(DecodeError::TruncatedHeader { layer: Layer::Tcp, needed: 4, available: 3 })
        );
    }

    #[test]
    fn portless_protocols_never_fail() {
        for (id, name) in [(1u8, "ICMPv4"), (58, "ICMPv6"), (47, "47"), (0, "0")] {
            let record = decode_transport(&[], 100, &network(id), fixed_timestamp()).unwrap();
            assert_eq!(record.protocol.to_string(), name);
            assert_eq!((record.source_port, record.dest_port), (0, 0));
        }
    }

    #[test]
    fn udp_offset_past_end_is_truncated() {
        let frame = [0u8; 20];
        assert_eq!(
            decode_transport(&frame, 40, &network(17), fixed_timestamp()),
            Err(DecodeError::TruncatedHeader { layer: Layer::Udp, needed: 4, available: 0 })
        );
    }
}
