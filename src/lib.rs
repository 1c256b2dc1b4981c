//! Passive dual-interface traffic observer.
//!
//! linkwatch watches a tunnel interface (which carries bare IP packets) and
//! the physical interface beneath it at the same time. It decodes every frame
//! layer by layer and pairs each tunnel packet with link-layer metadata taken
//! from the physical side, so tunnel traffic can be logged with an L2 record
//! it would otherwise lack.
//!
//! # Features
//!
//! - **Live capture**: AF_PACKET raw sockets in promiscuous mode (Linux)
//! - **Offline replay**: classic pcap files, on any platform
//! - **Bounds-checked decoding**: Ethernet with stacked VLAN tags, ARP, IPv4
//!   with options, IPv6, TCP, UDP and ICMP
//! - **Correlation**: order-based pairing of tunnel frames with physical markers
//! - **Sinks**: append-only CSV files, one per layer
//!
//! # Architecture
//!
//! ```text
//! FrameSource (live | replay) ─► Pipeline ─► RecordSink (CSV)
//!                                   │
//!                                Metrics ─► StatsReporter
//! ```
//!
//! ## Example (pcap replay)
//!
//! ```rust,no_run
//! use linkwatch::{Config, CsvSink, Linkwatch};
//!
//! #[tokio::main]
//! async fn main() -> linkwatch::Result<()> {
//!     let config = Config::default();
//!     let session = Linkwatch::replay("tun0.pcap", "eth0.pcap", &config)?;
//!     let sink = CsvSink::create(&config.output)?;
//!
//!     let summary = session.run(sink).join().await;
//!     println!("{} tunnel frames correlated", summary.tunnel.correlated);
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Decoding and correlation
pub mod correlate;
pub mod decode;

// Frame sources
pub mod capture;
pub mod pcap;
pub mod provider;
pub mod providers;

// Processing and output
pub mod config;
pub mod pipeline;
pub mod session;
pub mod sink;
pub mod stats;

// Core exports
pub use error::*;
pub use types::*;

pub use capture::{CaptureStop, InterfaceSocket};
pub use config::Config;
pub use correlate::{CorrelatedFrame, MarkerSender, StreamCorrelator, correlation_slot};
pub use decode::{DecodedFrame, decode_frame, decode_link, decode_network, decode_transport};
pub use pipeline::{Pipeline, PipelineHandle, PipelineSummary};
pub use provider::FrameSource;
pub use providers::{LiveSource, ReplaySource};
pub use session::{Session, SessionStop};
pub use sink::{CsvSink, RecordSink};
pub use stats::{Metrics, MetricsSnapshot, StatsReporter};

use std::path::Path;

/// Unified entry point for linkwatch sessions.
///
/// Both constructors validate the configuration, open the tunnel side first
/// and then the physical side. Failure to open either one is fatal.
///
/// # Examples
///
/// ## Live capture (Linux, root)
/// ```rust,no_run
/// use linkwatch::{Config, Linkwatch};
///
/// # fn main() -> linkwatch::Result<()> {
/// let session = Linkwatch::capture("tun0", "eth0", &Config::default())?;
/// # Ok(())
/// # }
/// ```
pub struct Linkwatch;

impl Linkwatch {
    /// Open both interfaces for live capture.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration is invalid
    /// - Either interface does not exist
    /// - A socket cannot be opened, bound or put in promiscuous mode
    /// - The platform is not Linux
    pub fn capture(tunnel: &str, physical: &str, config: &Config) -> Result<Session> {
        config.validate()?;

        let stop = SessionStop::new(CaptureStop::new(), CaptureStop::new());
        let (tunnel_stop, physical_stop) = stop.handles();
        let tunnel = LiveSource::open_with_stop(
            tunnel,
            InterfaceKind::Tunnel,
            &config.capture,
            tunnel_stop,
        )?;
        let physical = LiveSource::open_with_stop(
            physical,
            InterfaceKind::Physical,
            &config.capture,
            physical_stop,
        )?;

        Session::new(tunnel, physical, stop, config.clone())
    }

    /// Open two pcap files for replay, standing in for the tunnel and
    /// physical interfaces.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, or if either file
    /// cannot be read or is not a classic pcap capture.
    pub fn replay<P, Q>(tunnel: P, physical: Q, config: &Config) -> Result<Session>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        config.validate()?;

        let stop = SessionStop::default();
        let (tunnel_stop, physical_stop) = stop.handles();
        let tunnel = ReplaySource::open_with_stop(tunnel, InterfaceKind::Tunnel, tunnel_stop)?;
        let physical =
            ReplaySource::open_with_stop(physical, InterfaceKind::Physical, physical_stop)?;

        Session::new(tunnel, physical, stop, config.clone())
    }
}
