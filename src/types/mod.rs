//! Core types for captured frames and decoded records.
//!
//! ## Architecture
//!
//! - [`RawFrame`] is an owned, immutable copy of one captured frame, tagged with
//!   the interface it came from and its capture time
//! - [`LinkRecord`], [`NetworkRecord`] and [`TransportRecord`] are the L2/L3/L4
//!   records the decoder produces; each one is a plain value, never mutated
//!   after construction
//! - [`MacAddr`] renders hardware addresses in the canonical textual form
//! - [`ether_type`] holds the EtherType and IP protocol constants the decoder
//!   dispatches on
//!
//! A frame yields zero or one record per layer. Absence at any layer is a
//! valid end state: an Ethernet frame carrying neither ARP nor IP yields only
//! a [`LinkRecord`].
//!
//! ## Usage Example
//!
//! ```rust
//! use linkwatch::types::{InterfaceKind, RawFrame, TransportProtocol};
//!
//! let frame = RawFrame::new(vec![0u8; 60], chrono::Local::now(), InterfaceKind::Physical);
//! assert_eq!(frame.len(), 60);
//! assert_eq!(TransportProtocol::from_protocol_id(17).to_string(), "UDP");
//! ```

pub mod ether_type;
mod frame;
mod mac;
mod records;

pub use frame::{InterfaceKind, RawFrame};
pub use mac::MacAddr;
pub use records::{
    LinkRecord, NetworkProtocol, NetworkRecord, TransportProtocol, TransportRecord,
};

/// Capture timestamp, in local time.
pub type Timestamp = chrono::DateTime<chrono::Local>;

/// Millisecond-precision local timestamp format used by sinks and logs.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Render a timestamp in [`TIMESTAMP_FORMAT`].
pub fn format_timestamp(timestamp: &Timestamp) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}
