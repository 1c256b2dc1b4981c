//! Classic pcap capture files
//!
//! Used by [`ReplaySource`](crate::providers::replay::ReplaySource) to run the
//! pipeline offline over two recorded captures. Parsing is done by
//! `pcap_parser`; this module adapts its block stream to owned records with
//! local timestamps. pcapng files are not supported.

pub mod reader;

pub use reader::{CaptureInfo, PcapReader, PcapRecord, TimestampPrecision};
