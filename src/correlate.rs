//! Pairing of tunnel frames with link-layer metadata from the physical interface.
//!
//! Tunnel interfaces deliver IP packets with no Ethernet header. To give each
//! tunnel packet an L2 record, the physical path pushes *markers* into a
//! bounded FIFO, the correlation slot. A marker is the link record of a
//! physical frame whose protocol id is `255`: either no network layer was
//! identified, or an IPv4/IPv6 header carries protocol number `255`, which is
//! how encapsulated tunnel traffic shows up on the physical side. Each tunnel frame then takes whichever
//! marker is at the head of the slot, if any:
//!
//! - slot non-empty: pop one marker, decode the tunnel frame's own bytes at
//!   offset `0` with the marker's EtherType
//! - slot empty: the tunnel frame gets no correlated output
//!
//! Pairing is order-based only. No packet identity is checked, so reordering
//! or rate skew between the two interfaces can pair a tunnel frame with an
//! unrelated marker.
//!
//! The slot has exactly one producer ([`MarkerSender`]) and one consumer
//! ([`StreamCorrelator`]). Removal is a single non-blocking pop-if-present,
//! and the consumer is not `Clone`, so there is no separate length check that
//! another consumer could race with.

use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::trace;

use crate::DecodeError;
use crate::decode::{DecodedLayers, decode_layers};
use crate::types::{LinkRecord, NetworkRecord, RawFrame, TransportRecord};

/// Create a correlation slot holding at most `capacity` markers.
///
/// # Panics
///
/// Panics if `capacity` is zero. [`Config::validate`](crate::config::Config::validate)
/// rejects that value before it gets here.
pub fn correlation_slot(capacity: usize) -> (MarkerSender, StreamCorrelator) {
    let (tx, rx) = mpsc::channel(capacity);
    (MarkerSender { tx }, StreamCorrelator { rx, paired: 0, unpaired: 0 })
}

/// Producer side of the correlation slot, owned by the physical path.
#[derive(Debug)]
pub struct MarkerSender {
    tx: mpsc::Sender<LinkRecord>,
}

impl MarkerSender {
    /// Append a marker, waiting while the slot is full.
    ///
    /// Returns `false` once the correlator has been dropped.
    pub async fn push(&self, marker: LinkRecord) -> bool {
        self.tx.send(marker).await.is_ok()
    }

    /// Markers currently waiting in the slot
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// True when a [`push`](Self::push) would have to wait
    pub fn is_full(&self) -> bool {
        self.tx.capacity() == 0
    }
}

/// A tunnel frame decoded with the link record it was paired with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelatedFrame {
    /// The marker popped from the slot
    pub link: LinkRecord,
    pub network: Option<NetworkRecord>,
    pub transport: Option<TransportRecord>,
}

impl CorrelatedFrame {
    /// Protocol id at the wire boundary, `255` when no network layer was found.
    pub fn protocol_id(&self) -> u8 {
        self.network
            .as_ref()
            .map_or(crate::types::ether_type::PROTOCOL_ID_NONE, |n| n.protocol_id)
    }
}

/// Consumer side of the correlation slot, owned by the tunnel path.
#[derive(Debug)]
pub struct StreamCorrelator {
    rx: mpsc::Receiver<LinkRecord>,
    paired: u64,
    unpaired: u64,
}

impl StreamCorrelator {
    /// Take the marker at the head of the slot for `tunnel_frame`, if any.
    ///
    /// Never waits: an empty slot (or one whose producer is gone) returns
    /// `None` and the tunnel frame goes uncorrelated.
    pub fn correlate(&mut self, tunnel_frame: &RawFrame) -> Option<LinkRecord> {
        match self.rx.try_recv() {
            Ok(marker) => {
                self.paired += 1;
                trace!(
                    "Paired {}-byte tunnel frame with marker 0x{:04x}",
                    tunnel_frame.len(),
                    marker.ether_type
                );
                Some(marker)
            }
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => {
                self.unpaired += 1;
                None
            }
        }
    }

    /// Correlate `tunnel_frame` and decode it at offset `0`.
    ///
    /// Returns `None` when no marker was pending. A decode failure still
    /// consumes the marker.
    pub fn correlate_frame(
        &mut self,
        tunnel_frame: &RawFrame,
    ) -> Option<Result<CorrelatedFrame, DecodeError>> {
        let link = self.correlate(tunnel_frame)?;
        let decoded =
            decode_layers(tunnel_frame.bytes(), link.ether_type, 0, tunnel_frame.timestamp);

        Some(decoded.map(|DecodedLayers { network, transport }| CorrelatedFrame {
            link,
            network,
            transport,
        }))
    }

    /// Markers currently waiting in the slot
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// True when the producer cannot push without waiting for a pop
    pub fn is_full(&self) -> bool {
        self.rx.capacity() == 0
    }

    /// Tunnel frames that found a marker
    pub fn paired(&self) -> u64 {
        self.paired
    }

    /// Tunnel frames that found the slot empty
    pub fn unpaired(&self) -> u64 {
        self.unpaired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{self, fixed_timestamp};
    use crate::types::{InterfaceKind, MacAddr, TransportProtocol, ether_type};
    use proptest::prelude::*;
    use std::net::Ipv4Addr;

    fn marker(id: u8, ether_type: u16) -> LinkRecord {
        LinkRecord {
            timestamp: fixed_timestamp(),
            source_mac: MacAddr([0x02, 0, 0, 0, 0, id]),
            dest_mac: MacAddr::BROADCAST,
            ether_type,
            frame_length: 60 + usize::from(id),
        }
    }

    fn tunnel(data: Vec<u8>) -> RawFrame {
        RawFrame::new(data, fixed_timestamp(), InterfaceKind::Tunnel)
    }

    #[tokio::test]
    async fn empty_slot_drops_tunnel_frame() {
        let (_sender, mut correlator) = correlation_slot(4);
        assert_eq!(correlator.correlate(&tunnel(vec![0x45; 20])), None);
        assert_eq!(correlator.unpaired(), 1);
        assert_eq!(correlator.paired(), 0);
    }

    #[tokio::test]
    async fn closed_producer_reads_as_empty() {
        let (sender, mut correlator) = correlation_slot(4);
        assert!(sender.push(marker(1, 0x88b5)).await);
        drop(sender);

        assert!(correlator.correlate(&tunnel(vec![])).is_some());
        assert!(correlator.correlate(&tunnel(vec![])).is_none());
    }

    #[tokio::test]
    async fn full_slot_is_reported() {
        let (sender, mut correlator) = correlation_slot(2);
        assert!(!sender.is_full());
        sender.push(marker(1, ether_type::IPV4)).await;
        sender.push(marker(2, ether_type::IPV4)).await;
        assert!(sender.is_full());

        assert!(correlator.is_full());

        correlator.correlate(&tunnel(vec![]));
        assert!(!sender.is_full());
        assert!(!correlator.is_full());
    }

    #[tokio::test]
    async fn push_fails_after_correlator_dropped() {
        let (sender, correlator) = correlation_slot(1);
        drop(correlator);
        assert!(!sender.push(marker(1, 0x88b5)).await);
    }

    #[tokio::test]
    async fn tunnel_bytes_decode_with_marker_ether_type() {
        let (sender, mut correlator) = correlation_slot(4);
        sender.push(marker(7, ether_type::IPV4)).await;
        assert_eq!(sender.pending(), 1);

        let udp = test_utils::udp_datagram(40000, 53, &[0u8; 12]);
        let packet = test_utils::ipv4_packet(
            Ipv4Addr::new(10, 8, 0, 2),
            Ipv4Addr::new(9, 9, 9, 9),
            ether_type::PROTO_UDP,
            &udp,
        );

        let correlated = correlator.correlate_frame(&tunnel(packet)).unwrap().unwrap();
        assert_eq!(correlated.link, marker(7, ether_type::IPV4));
        assert_eq!(correlated.protocol_id(), ether_type::PROTO_UDP);
        let transport = correlated.transport.unwrap();
        assert_eq!(transport.protocol, TransportProtocol::Udp);
        assert_eq!(transport.dest_port, 53);
        assert_eq!(correlator.pending(), 0);
    }

    #[tokio::test]
    async fn non_ip_marker_yields_link_only() {
        let (sender, mut correlator) = correlation_slot(4);
        sender.push(marker(3, 0x88cc)).await;

        let correlated = correlator.correlate_frame(&tunnel(vec![0x45; 40])).unwrap().unwrap();
        assert_eq!(correlated.network, None);
        assert_eq!(correlated.transport, None);
        assert_eq!(correlated.protocol_id(), ether_type::PROTOCOL_ID_NONE);
    }

    #[tokio::test]
    async fn decode_failure_still_consumes_marker() {
        let (sender, mut correlator) = correlation_slot(4);
        sender.push(marker(1, ether_type::IPV6)).await;

        let result = correlator.correlate_frame(&tunnel(vec![0x60; 12])).unwrap();
        assert!(result.is_err());
        assert_eq!(correlator.pending(), 0);
        assert!(correlator.correlate_frame(&tunnel(vec![0x60; 12])).is_none());
    }

    proptest! {
        #[test]
        fn pairs_in_fifo_order_then_drops(markers in 0usize..32, extra in 0usize..8) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let (sender, mut correlator) = correlation_slot(64);
                for i in 0..markers {
                    prop_assert!(sender.push(marker(i as u8, 0x9000 + i as u16)).await);
                }

                for i in 0..markers {
                    let paired = correlator.correlate(&tunnel(vec![0u8; 20]));
                    prop_assert_eq!(paired, Some(marker(i as u8, 0x9000 + i as u16)));
                }
                for _ in 0..extra {
                    prop_assert_eq!(correlator.correlate(&tunnel(vec![0u8; 20])), None);
                }

                prop_assert_eq!(correlator.paired(), markers as u64);
                prop_assert_eq!(correlator.unpaired(), extra as u64);
                Ok(())
            })?;
        }
    }
}
