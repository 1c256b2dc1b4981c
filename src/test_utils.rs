//! Frame builders and in-memory doubles for tests and benchmarks
//!
//! The builders emit byte-exact wire formats with no checksums; the decoder
//! never verifies them.

#![cfg(any(test, feature = "benchmark"))]

use std::collections::VecDeque;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, Mutex};

use chrono::TimeZone;

use crate::Result;
use crate::provider::FrameSource;
use crate::sink::RecordSink;
use crate::types::ether_type;
use crate::types::{InterfaceKind, LinkRecord, NetworkRecord, RawFrame, Timestamp, TransportRecord};

/// A fixed local timestamp, so tests do not depend on the clock.
pub fn fixed_timestamp() -> Timestamp {
    chrono::Local
        .timestamp_opt(1_700_000_000, 123_000_000)
        .single()
        .unwrap_or_else(chrono::Local::now)
}

/// Untagged Ethernet II frame
pub fn ethernet_frame(dst: [u8; 6], src: [u8; 6], ether_type: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(14 + payload.len());
    frame.extend_from_slice(&dst);
    frame.extend_from_slice(&src);
    frame.extend_from_slice(&ether_type.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Ethernet frame with one 802.1Q tag per entry in `vlan_ids`, outermost first.
pub fn vlan_tagged_frame(
    dst: [u8; 6],
    src: [u8; 6],
    vlan_ids: &[u16],
    inner: u16,
    payload: &[u8],
) -> Vec<u8> {
    let mut frame = Vec::with_capacity(14 + 4 * vlan_ids.len() + payload.len());
    frame.extend_from_slice(&dst);
    frame.extend_from_slice(&src);
    for (i, vlan_id) in vlan_ids.iter().enumerate() {
        if i == 0 {
            frame.extend_from_slice(&ether_type::VLAN.to_be_bytes());
        }
        frame.extend_from_slice(&(vlan_id & 0x0fff).to_be_bytes());
        let next = if i + 1 == vlan_ids.len() { inner } else { ether_type::VLAN };
        frame.extend_from_slice(&next.to_be_bytes());
    }
    if vlan_ids.is_empty() {
        frame.extend_from_slice(&inner.to_be_bytes());
    }
    frame.extend_from_slice(payload);
    frame
}

/// IPv4 packet with a 20-byte header
pub fn ipv4_packet(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, payload: &[u8]) -> Vec<u8> {
    ipv4_packet_with_options(src, dst, protocol, &[], payload)
}

/// IPv4 packet whose header carries `options`, which must be a multiple of 4 bytes.
pub fn ipv4_packet_with_options(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    protocol: u8,
    options: &[u8],
    payload: &[u8],
) -> Vec<u8> {
    assert_eq!(options.len() % 4, 0, "IPv4 options must be 32-bit aligned");
    let header_len = 20 + options.len();
    let total_len = (header_len + payload.len()) as u16;

    let mut packet = Vec::with_capacity(header_len + payload.len());
    packet.push(0x40 | (header_len / 4) as u8);
    packet.push(0);
    packet.extend_from_slice(&total_len.to_be_bytes());
    packet.extend_from_slice(&[0, 0, 0x40, 0]);
    packet.push(64);
    packet.push(protocol);
    packet.extend_from_slice(&[0, 0]);
    packet.extend_from_slice(&src.octets());
    packet.extend_from_slice(&dst.octets());
    packet.extend_from_slice(options);
    packet.extend_from_slice(payload);
    packet
}

/// IPv6 packet with a fixed 40-byte header
pub fn ipv6_packet(src: Ipv6Addr, dst: Ipv6Addr, next_header: u8, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(40 + payload.len());
    packet.extend_from_slice(&[0x60, 0, 0, 0]);
    packet.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    packet.push(next_header);
    packet.push(64);
    packet.extend_from_slice(&src.octets());
    packet.extend_from_slice(&dst.octets());
    packet.extend_from_slice(payload);
    packet
}

/// ARP request for Ethernet/IPv4, 28 bytes
pub fn arp_payload(sender_ip: [u8; 4], target_ip: [u8; 4]) -> Vec<u8> {
    let mut arp = Vec::with_capacity(28);
    arp.extend_from_slice(&[0x00, 0x01, 0x08, 0x00, 6, 4, 0x00, 0x01]);
    arp.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
    arp.extend_from_slice(&sender_ip);
    arp.extend_from_slice(&[0u8; 6]);
    arp.extend_from_slice(&target_ip);
    arp
}

/// Minimal 20-byte TCP header with SYN set
pub fn tcp_segment(source_port: u16, dest_port: u16) -> Vec<u8> {
    let mut segment = Vec::with_capacity(20);
    segment.extend_from_slice(&source_port.to_be_bytes());
    segment.extend_from_slice(&dest_port.to_be_bytes());
    segment.extend_from_slice(&[0u8; 8]);
    segment.push(5 << 4);
    segment.push(0x02);
    segment.extend_from_slice(&[0xff, 0xff, 0, 0, 0, 0]);
    segment
}

pub fn udp_datagram(source_port: u16, dest_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut datagram = Vec::with_capacity(8 + payload.len());
    datagram.extend_from_slice(&source_port.to_be_bytes());
    datagram.extend_from_slice(&dest_port.to_be_bytes());
    datagram.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
    datagram.extend_from_slice(&[0, 0]);
    datagram.extend_from_slice(payload);
    datagram
}

/// Builds classic pcap files in memory.
pub struct PcapWriter {
    big_endian: bool,
    bytes: Vec<u8>,
}

impl PcapWriter {
    pub fn little_endian_micros() -> Self {
        Self::new(0xa1b2_c3d4, false)
    }

    pub fn big_endian_nanos() -> Self {
        Self::new(0xa1b2_3c4d, true)
    }

    fn new(magic: u32, big_endian: bool) -> Self {
        let mut writer = Self { big_endian, bytes: Vec::new() };
        writer.put_u32(magic);
        writer.put_u16(2);
        writer.put_u16(4);
        writer.put_u32(0);
        writer.put_u32(0);
        writer.put_u32(65_535);
        writer.put_u32(1);
        writer
    }

    /// Append a record whose captured and original lengths are `data.len()`.
    pub fn record(&mut self, ts_sec: u32, ts_frac: u32, data: &[u8]) -> &mut Self {
        self.put_u32(ts_sec);
        self.put_u32(ts_frac);
        self.put_u32(data.len() as u32);
        self.put_u32(data.len() as u32);
        self.bytes.extend_from_slice(data);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }

    fn put_u32(&mut self, value: u32) {
        let bytes = if self.big_endian { value.to_be_bytes() } else { value.to_le_bytes() };
        self.bytes.extend_from_slice(&bytes);
    }

    fn put_u16(&mut self, value: u16) {
        let bytes = if self.big_endian { value.to_be_bytes() } else { value.to_le_bytes() };
        self.bytes.extend_from_slice(&bytes);
    }
}

/// Frame source backed by a fixed list of frames
pub struct VecSource {
    frames: VecDeque<RawFrame>,
    kind: InterfaceKind,
}

impl VecSource {
    /// Every frame carries [`fixed_timestamp`].
    pub fn new(kind: InterfaceKind, frames: Vec<Vec<u8>>) -> Self {
        Self::stamped(kind, frames.into_iter().map(|data| (0, data)).collect())
    }

    /// Frames stamped `offset_ms` milliseconds after [`fixed_timestamp`].
    pub fn stamped(kind: InterfaceKind, frames: Vec<(i64, Vec<u8>)>) -> Self {
        let frames = frames
            .into_iter()
            .map(|(offset_ms, data)| {
                let timestamp = fixed_timestamp() + chrono::TimeDelta::milliseconds(offset_ms);
                RawFrame::new(data, timestamp, kind)
            })
            .collect();
        Self { frames, kind }
    }
}

#[async_trait::async_trait]
impl FrameSource for VecSource {
    async fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        Ok(self.frames.pop_front())
    }

    fn interface(&self) -> InterfaceKind {
        self.kind
    }

    fn describe(&self) -> String {
        format!("<{} frames in memory>", self.frames.len())
    }

    fn is_finite(&self) -> bool {
        true
    }
}

/// Records captured by a [`MemorySink`]
#[derive(Debug, Default)]
pub struct SinkRecords {
    pub links: Vec<LinkRecord>,
    pub networks: Vec<NetworkRecord>,
    pub transports: Vec<TransportRecord>,
    pub flushes: usize,
}

/// Sink that keeps every record in memory behind a shared handle.
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<SinkRecords>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared view of the records written so far
    pub fn records(&self) -> Arc<Mutex<SinkRecords>> {
        Arc::clone(&self.records)
    }
}

impl RecordSink for MemorySink {
    fn write_link(&mut self, record: &LinkRecord) -> Result<()> {
        self.records.lock().unwrap().links.push(record.clone());
        Ok(())
    }

    fn write_network(&mut self, record: &NetworkRecord) -> Result<()> {
        self.records.lock().unwrap().networks.push(record.clone());
        Ok(())
    }

    fn write_transport(&mut self, record: &TransportRecord) -> Result<()> {
        self.records.lock().unwrap().transports.push(record.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.records.lock().unwrap().flushes += 1;
        Ok(())
    }
}
