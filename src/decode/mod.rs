//! Layered protocol decoding.
//!
//! Three composable, pure functions turn raw frame bytes into records:
//!
//! - [`decode_link`]: Ethernet II header plus any number of 802.1Q tags
//! - [`decode_network`]: ARP, IPv4 or IPv6 at a given offset
//! - [`decode_transport`]: protocol classification and TCP/UDP ports
//!
//! None of them allocate beyond the returned records, keep state between
//! calls, or panic on malformed input. Every bounds violation is reported as a
//! [`DecodeError`], which callers treat as "skip this frame".
//!
//! Tunnel frames carry no Ethernet header, so the pipeline calls
//! [`decode_layers`] on them directly at offset `0`. Physical frames go
//! through [`decode_frame`].
//!
//! ## Example
//!
//! ```rust
//! use linkwatch::decode::decode_frame;
//!
//! let mut frame = vec![0u8; 12];
//! frame.extend_from_slice(&[0x88, 0xcc]); // LLDP
//! frame.extend_from_slice(&[0u8; 32]);
//!
//! let decoded = decode_frame(&frame, chrono::Local::now()).unwrap();
//! assert_eq!(decoded.link.ether_type, 0x88cc);
//! assert!(decoded.network.is_none());
//! assert!(decoded.transport.is_none());
//! ```

mod link;
mod network;
mod transport;

pub use link::{ETHERNET_HEADER_LEN, LinkDecode, VLAN_TAG_LEN, decode_link};
pub use network::{
    ARP_LEN, IPV4_MIN_HEADER_LEN, IPV6_HEADER_LEN, NetworkDecode, decode_network,
};
pub use transport::{PORTS_LEN, decode_transport};

use crate::DecodeError;
use crate::types::{LinkRecord, NetworkRecord, Timestamp, TransportRecord};

/// Network and transport records decoded from one packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLayers {
    pub network: Option<NetworkRecord>,
    /// Present whenever `network` is
    pub transport: Option<TransportRecord>,
}

/// All three layers decoded from one Ethernet frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub link: LinkRecord,
    pub network: Option<NetworkRecord>,
    pub transport: Option<TransportRecord>,
}

impl DecodedFrame {
    /// Protocol id at the wire boundary, `255` when no network layer was found.
    pub fn protocol_id(&self) -> u8 {
        self.network
            .as_ref()
            .map_or(crate::types::ether_type::PROTOCOL_ID_NONE, |n| n.protocol_id)
    }
}

/// Decode network and transport layers starting at `offset`.
pub fn decode_layers(
    frame: &[u8],
    ether_type: u16,
    offset: usize,
    timestamp: Timestamp,
) -> Result<DecodedLayers, DecodeError> {
    let NetworkDecode { record, next_offset } =
        decode_network(frame, ether_type, offset, timestamp)?;

    let transport = match &record {
        Some(network) => Some(decode_transport(frame, next_offset, network, timestamp)?),
        None => None,
    };

    Ok(DecodedLayers { network: record, transport })
}

/// Decode an Ethernet frame through all three layers.
pub fn decode_frame(frame: &[u8], timestamp: Timestamp) -> Result<DecodedFrame, DecodeError> {
    let LinkDecode { record: link, ether_type, header_end } = decode_link(frame, timestamp)?;
    let DecodedLayers { network, transport } =
        decode_layers(frame, ether_type, header_end, timestamp)?;

    Ok(DecodedFrame { link, network, transport })
}

/// Bytes from `offset` to the end, empty if `offset` is past the end.
pub(crate) fn remaining(data: &[u8], offset: usize) -> &[u8] {
    data.get(offset..).unwrap_or_default()
}

pub(crate) fn read_u16_be(data: &[u8], offset: usize) -> Option<u16> {
    let bytes: [u8; 2] = data.get(offset..offset.checked_add(2)?)?.try_into().ok()?;
    Some(u16::from_be_bytes(bytes))
}

/// Read a fixed-size field of `header`, reporting truncation against `layer`.
pub(crate) fn read_field<const N: usize>(
    header: &[u8],
    offset: usize,
    layer: crate::Layer,
) -> Result<[u8; N], DecodeError> {
    header
        .get(offset..offset + N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(DecodeError::TruncatedHeader { layer, needed: offset + N, available: header.len() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{self, fixed_timestamp};
    use crate::types::{MacAddr, NetworkProtocol, TransportProtocol, ether_type};
    use proptest::prelude::*;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    const DST: [u8; 6] = [0x3c, 0x22, 0xfb, 0x01, 0x02, 0x03];
    const SRC: [u8; 6] = [0xa4, 0x83, 0xe7, 0x0a, 0x0b, 0x0c];

    #[test]
    fn vlan_tagged_ipv6_udp() {
        let src: Ipv6Addr = "2001:db8::10".parse().unwrap();
        let dst: Ipv6Addr = "2001:db8::20".parse().unwrap();
        let udp = test_utils::udp_datagram(546, 547, &[1, 2, 3, 4]);
        let packet = test_utils::ipv6_packet(src, dst, ether_type::PROTO_UDP, &udp);
        let frame = test_utils::vlan_tagged_frame(DST, SRC, &[10], ether_type::IPV6, &packet);

        let decoded = decode_frame(&frame, fixed_timestamp()).unwrap();
        let transport = decoded.transport.unwrap();

        assert_eq!(decoded.link.ether_type, ether_type::IPV6);
        assert_eq!(decoded.network.unwrap().protocol, NetworkProtocol::Ipv6);
        assert_eq!(transport.protocol, TransportProtocol::Udp);
        assert_eq!((transport.source_port, transport.dest_port), (546, 547));
        assert_eq!(transport.frame_length, frame.len());
    }

    #[test]
    fn ipv4_options_are_skipped() {
        let tcp = test_utils::tcp_segment(443, 51000);
        let mut packet = test_utils::ipv4_packet_with_options(
            Ipv4Addr::new(10, 0, 0, 9),
            Ipv4Addr::new(10, 0, 0, 10),
            ether_type::PROTO_TCP,
            &[0x01, 0x01, 0x01, 0x00],
            &tcp,
        );
        packet.truncate(24 + 4);
        let frame = test_utils::ethernet_frame(DST, SRC, ether_type::IPV4, &packet);

        let transport = decode_frame(&frame, fixed_timestamp()).unwrap().transport.unwrap();
        assert_eq!((transport.source_port, transport.dest_port), (443, 51000));
    }

    #[test]
    fn arp_frame_has_protocol_zero_transport() {
        let arp = test_utils::arp_payload([192, 168, 1, 1], [192, 168, 1, 77]);
        let frame = test_utils::ethernet_frame(DST, SRC, ether_type::ARP, &arp);

        let decoded = decode_frame(&frame, fixed_timestamp()).unwrap();
        assert_eq!(decoded.protocol_id(), 0);
        assert_eq!(decoded.transport.unwrap().protocol, TransportProtocol::Other(0));
    }

    #[test]
    fn unknown_ether_type_yields_link_only() {
        let frame = test_utils::ethernet_frame(DST, SRC, 0x88cc, &[0u8; 46]);
        let decoded = decode_frame(&frame, fixed_timestamp()).unwrap();

        assert_eq!(decoded.link.source_mac, MacAddr(SRC));
        assert_eq!(decoded.network, None);
        assert_eq!(decoded.transport, None);
        assert_eq!(decoded.protocol_id(), ether_type::PROTOCOL_ID_NONE);
    }

    #[test]
    fn tunnel_packet_decodes_at_offset_zero() {
        let udp = test_utils::udp_datagram(5353, 53, &[]);
        let packet = test_utils::ipv4_packet(
            Ipv4Addr::new(100, 64, 0, 2),
            Ipv4Addr::new(1, 1, 1, 1),
            ether_type::PROTO_UDP,
            &udp,
        );

        let layers = decode_layers(&packet, ether_type::IPV4, 0, fixed_timestamp()).unwrap();
        let network = layers.network.unwrap();
        assert_eq!(network.source_addr, IpAddr::V4(Ipv4Addr::new(100, 64, 0, 2)));
        assert_eq!(network.frame_length, packet.len());
        assert_eq!(layers.transport.unwrap().dest_port, 53);
    }

    #[test]
    fn read_helpers_are_bounds_checked() {
        assert_eq!(read_u16_be(&[0x12, 0x34], 0), Some(0x1234));
        assert_eq!(read_u16_be(&[0x12, 0x34], 1), None);
        assert_eq!(read_u16_be(&[], usize::MAX), None);
        assert!(remaining(&[1, 2, 3], 7).is_empty());
    }

    proptest! {
        #[test]
        fn ipv4_tcp_round_trip(
            src_mac in any::<[u8; 6]>(),
            dst_mac in any::<[u8; 6]>(),
            src_ip in any::<[u8; 4]>(),
            dst_ip in any::<[u8; 4]>(),
            src_port in any::<u16>(),
            dst_port in any::<u16>(),
        ) {
            let tcp = test_utils::tcp_segment(src_port, dst_port);
            let packet = test_utils::ipv4_packet(src_ip.into(), dst_ip.into(), ether_type::PROTO_TCP, &tcp);
            let frame = test_utils::ethernet_frame(dst_mac, src_mac, ether_type::IPV4, &packet);

            let decoded = decode_frame(&frame, fixed_timestamp()).unwrap();
            let network = decoded.network.unwrap();
            let transport = decoded.transport.unwrap();

            prop_assert_eq!(decoded.link.source_mac, MacAddr(src_mac));
            prop_assert_eq!(decoded.link.dest_mac, MacAddr(dst_mac));
            prop_assert_eq!(network.source_addr, IpAddr::V4(src_ip.into()));
            prop_assert_eq!(network.dest_addr, IpAddr::V4(dst_ip.into()));
            prop_assert_eq!(transport.protocol.to_string(), "TCP");
            prop_assert_eq!(transport.source_port, src_port);
            prop_assert_eq!(transport.dest_port, dst_port);
        }

        #[test]
        fn decoding_is_idempotent(frame in prop::collection::vec(any::<u8>(), 0..200)) {
            let ts = fixed_timestamp();
            prop_assert_eq!(decode_frame(&frame, ts), decode_frame(&frame, ts));
        }
    }
}
