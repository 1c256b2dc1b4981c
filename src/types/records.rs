//! Decoded per-layer records

use std::fmt;
use std::net::IpAddr;

use super::ether_type::{PROTO_ICMP, PROTO_ICMPV6, PROTO_TCP, PROTO_UDP};
use super::{MacAddr, Timestamp};

/// Link-layer (L2) record decoded from an Ethernet frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRecord {
    pub timestamp: Timestamp,
    pub source_mac: MacAddr,
    pub dest_mac: MacAddr,
    /// Innermost EtherType after all 802.1Q tags are unwrapped
    pub ether_type: u16,
    /// Length of the originating raw frame, not of the decoded payload
    pub frame_length: usize,
}

/// Network-layer protocols the decoder recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkProtocol {
    Arp,
    Ipv4,
    Ipv6,
}

impl NetworkProtocol {
    /// Name written to sinks (`ARP`, `IPv4`, `IPv6`)
    pub const fn name(&self) -> &'static str {
        match self {
            NetworkProtocol::Arp => "ARP",
            NetworkProtocol::Ipv4 => "IPv4",
            NetworkProtocol::Ipv6 => "IPv6",
        }
    }
}

impl fmt::Display for NetworkProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Network-layer (L3) record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRecord {
    pub timestamp: Timestamp,
    pub source_addr: IpAddr,
    pub dest_addr: IpAddr,
    pub protocol: NetworkProtocol,
    /// IANA protocol number of the payload (`0` for ARP)
    pub protocol_id: u8,
    pub frame_length: usize,
}

/// Transport-layer protocol classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportProtocol {
    Tcp,
    Udp,
    Icmpv4,
    Icmpv6,
    /// Any other protocol number, rendered as its decimal value
    Other(u8),
}

impl TransportProtocol {
    /// Classify an IANA protocol number.
    pub const fn from_protocol_id(id: u8) -> Self {
        match id {
            PROTO_TCP => TransportProtocol::Tcp,
            PROTO_UDP => TransportProtocol::Udp,
            PROTO_ICMP => TransportProtocol::Icmpv4,
            PROTO_ICMPV6 => TransportProtocol::Icmpv6,
            other => TransportProtocol::Other(other),
        }
    }

    /// Whether this protocol carries 16-bit source/destination ports.
    pub const fn has_ports(&self) -> bool {
        matches!(self, TransportProtocol::Tcp | TransportProtocol::Udp)
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportProtocol::Tcp => f.write_str("TCP"),
            TransportProtocol::Udp => f.write_str("UDP"),
            TransportProtocol::Icmpv4 => f.write_str("ICMPv4"),
            TransportProtocol::Icmpv6 => f.write_str("ICMPv6"),
            TransportProtocol::Other(id) => write!(f, "{id}"),
        }
    }
}

/// Transport-layer (L4) record.
///
/// Ports are zero for protocols without them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRecord {
    pub timestamp: Timestamp,
    pub source_addr: IpAddr,
    pub dest_addr: IpAddr,
    pub source_port: u16,
    pub dest_port: u16,
    pub protocol: TransportProtocol,
    pub frame_length: usize,
}
