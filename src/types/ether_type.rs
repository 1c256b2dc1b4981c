//! EtherType and IP protocol number constants

/// IPv4 (`0x0800`)
pub const IPV4: u16 = 0x0800;
/// Address Resolution Protocol (`0x0806`)
pub const ARP: u16 = 0x0806;
/// IEEE 802.1Q VLAN tag (`0x8100`)
pub const VLAN: u16 = 0x8100;
/// IPv6 (`0x86DD`)
pub const IPV6: u16 = 0x86DD;

/// IANA protocol number for ICMP
pub const PROTO_ICMP: u8 = 1;
/// IANA protocol number for TCP
pub const PROTO_TCP: u8 = 6;
/// IANA protocol number for UDP
pub const PROTO_UDP: u8 = 17;
/// IANA protocol number for ICMPv6
pub const PROTO_ICMPV6: u8 = 58;

/// Protocol id reported when no network layer was identified.
///
/// Inside the crate an unidentified network layer is `None`; this value is
/// produced at the boundary (statistics tallies, marker selection). It
/// coincides with IP protocol number `255`, so both cases select a marker.
pub const PROTOCOL_ID_NONE: u8 = 255;

/// Render an EtherType as `0x` followed by four lowercase hex digits.
pub fn format_ether_type(ether_type: u16) -> String {
    format!("0x{ether_type:04x}")
}

/// Short name for well-known EtherTypes, used in statistics output.
pub fn ether_type_name(ether_type: u16) -> Option<&'static str> {
    match ether_type {
        IPV4 => Some("IPv4"),
        ARP => Some("ARP"),
        VLAN => Some("802.1Q"),
        IPV6 => Some("IPv6"),
        _ => None,
    }
}
