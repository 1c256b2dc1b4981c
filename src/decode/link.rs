//! Ethernet II / 802.1Q link-layer decoding

use super::read_u16_be;
use crate::types::{LinkRecord, MacAddr, Timestamp, ether_type};
use crate::{DecodeError, Layer};

/// Length of an untagged Ethernet II header (dst MAC, src MAC, type)
pub const ETHERNET_HEADER_LEN: usize = 14;

/// Length of one 802.1Q tag (TCI + inner type)
pub const VLAN_TAG_LEN: usize = 4;

// Offsets within the Ethernet header
const DEST_MAC_OFFSET: usize = 0;
const SOURCE_MAC_OFFSET: usize = 6;
const ETHER_TYPE_OFFSET: usize = 12;

/// Output of [`decode_link`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkDecode {
    /// The decoded L2 record
    pub record: LinkRecord,
    /// Innermost EtherType (same value as `record.ether_type`)
    pub ether_type: u16,
    /// Offset of the first byte after the Ethernet header and all VLAN tags
    pub header_end: usize,
}

/// Decode the Ethernet header of `frame`.
///
/// Stacked 802.1Q tags are unwrapped: while the type field is `0x8100` and a
/// full tag remains, the offset advances by four bytes and the type is re-read
/// from the tag's inner type field. A frame with `N` tags therefore returns
/// `header_end == 14 + 4 * N`. If a frame ends in the middle of a tag, the
/// loop stops and `0x8100` is reported as the EtherType.
///
/// # Errors
///
/// [`DecodeError::TruncatedFrame`] if the frame is shorter than 14 bytes.
pub fn decode_link(frame: &[u8], timestamp: Timestamp) -> Result<LinkDecode, DecodeError> {
    let truncated = || DecodeError::TruncatedFrame { len: frame.len() };

    if frame.len() < ETHERNET_HEADER_LEN {
        return Err(truncated());
    }

    let dest_mac = MacAddr::from_slice(&frame[DEST_MAC_OFFSET..]).ok_or_else(truncated)?;
    let source_mac = MacAddr::from_slice(&frame[SOURCE_MAC_OFFSET..]).ok_or_else(truncated)?;
    let mut ether_type = read_u16_be(frame, ETHER_TYPE_OFFSET)
        .ok_or(DecodeError::TruncatedHeader {
            layer: Layer::Ethernet,
            needed: ETHERNET_HEADER_LEN,
            available: frame.len(),
        })?;
    let mut offset = ETHERNET_HEADER_LEN;

    while ether_type == ether_type::VLAN && frame.len() >= offset + VLAN_TAG_LEN {
        // Tag layout: 2-byte TCI, then the next type field
        match read_u16_be(frame, offset + 2) {
            Some(inner) => ether_type = inner,
            None => break,
        }
        offset += VLAN_TAG_LEN;
    }

    let record =
        LinkRecord { timestamp, source_mac, dest_mac, ether_type, frame_length: frame.len() };

    Ok(LinkDecode { record, ether_type, header_end: offset })
}
