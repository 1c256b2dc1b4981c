//! Raw frame type for the capture pipeline

use std::fmt;
use std::sync::Arc;

use super::Timestamp;

/// Which of the two observed interfaces produced a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceKind {
    /// Tunnel interface: IP packets with no Ethernet header.
    Tunnel,
    /// Physical interface: full Ethernet frames.
    Physical,
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceKind::Tunnel => f.write_str("tunnel"),
            InterfaceKind::Physical => f.write_str("physical"),
        }
    }
}

/// Captured link-layer frame
///
/// This is the fundamental data unit that flows through the pipeline. The bytes
/// are copied out of the kernel receive buffer at capture time, so a frame
/// outlives the socket that produced it. All records are derived from it.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Frame bytes as delivered by the capture socket
    pub data: Arc<[u8]>,

    /// Capture timestamp (local time)
    pub timestamp: Timestamp,

    /// Interface the frame was captured on
    pub interface: InterfaceKind,
}

impl RawFrame {
    /// Create a new raw frame
    pub fn new(data: Vec<u8>, timestamp: Timestamp, interface: InterfaceKind) -> Self {
        Self { data: data.into(), timestamp, interface }
    }

    /// Frame length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the frame carries no bytes at all
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Frame bytes
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}
