//! Raw link-layer capture from a named network interface.
//!
//! [`InterfaceSocket::open`] creates an `AF_PACKET` socket for all protocols,
//! binds it to the interface's kernel index, enables promiscuous mode and
//! starts a dedicated reader thread. The thread copies each received frame out
//! of a reusable buffer into its own [`RawFrame`] and pushes it into a bounded
//! queue (100 frames by default).
//!
//! ## Backpressure and kernel drops
//!
//! When the consumer falls behind, the queue fills and the reader blocks on
//! the push, which stalls socket reads. Frames then accumulate in the kernel's
//! socket receive buffer. Under sustained overload that buffer overflows and
//! the kernel drops frames without telling the application. Those drops are
//! outside this crate's control and are not reported as errors.
//!
//! ## Shutdown
//!
//! [`CaptureStop::stop`] cancels the reader and signals an eventfd that the
//! reader polls alongside the socket, so a reader blocked waiting for traffic
//! exits at once. The reader then closes the socket (clearing promiscuous mode
//! if it set it) and drops its end of the queue, which ends the sequence.
//! Ending the sequence is the only failure signal: an unrecoverable read error
//! is logged and ends it the same way.
//!
//! Live capture needs `CAP_NET_RAW` and `CAP_NET_ADMIN` (or root) and is only
//! available on Linux. Elsewhere [`InterfaceSocket::open`] returns
//! [`LinkwatchError::UnsupportedPlatform`](crate::LinkwatchError::UnsupportedPlatform).

#[cfg(target_os = "linux")]
mod linux;
mod stop;
#[cfg(not(target_os = "linux"))]
mod unsupported;

#[cfg(target_os = "linux")]
use linux as sys;
#[cfg(not(target_os = "linux"))]
use unsupported as sys;

pub use stop::CaptureStop;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::Result;
use crate::config::CaptureConfig;
use crate::types::{InterfaceKind, RawFrame};

/// A capturing interface and the sequence of frames it produces.
///
/// The sequence is lazy, unbounded and not restartable. It ends only after the
/// associated [`CaptureStop`] fires or the reader hits an unrecoverable error.
#[derive(Debug)]
pub struct InterfaceSocket {
    name: String,
    kind: InterfaceKind,
    frames: mpsc::Receiver<RawFrame>,
}

impl InterfaceSocket {
    /// Open `name` with default capture settings.
    ///
    /// Returns the socket and a fresh stop handle for it.
    pub fn open(name: &str, kind: InterfaceKind) -> Result<(Self, CaptureStop)> {
        let stop = CaptureStop::new();
        let socket = Self::open_with(name, kind, &CaptureConfig::default(), stop.clone())?;
        Ok((socket, stop))
    }

    /// Open `name` with explicit settings and a caller-provided stop handle.
    ///
    /// The handle may already be stopped, in which case the sequence ends
    /// without yielding frames.
    ///
    /// # Errors
    ///
    /// - [`InterfaceNotFound`](crate::LinkwatchError::InterfaceNotFound) if
    ///   no interface has this name
    /// - [`Socket`](crate::LinkwatchError::Socket) if socket creation,
    ///   binding or enabling promiscuous mode fails
    pub fn open_with(
        name: &str,
        kind: InterfaceKind,
        config: &CaptureConfig,
        stop: CaptureStop,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel(config.frame_queue_capacity);
        sys::spawn_reader(name, kind, config, &stop, tx)?;
        Ok(Self { name: name.to_string(), kind, frames: rx })
    }

    /// Interface name this socket is bound to
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Role of this interface in the pipeline
    pub fn kind(&self) -> InterfaceKind {
        self.kind
    }

    /// Next captured frame, or `None` once the sequence has ended.
    pub async fn recv(&mut self) -> Option<RawFrame> {
        self.frames.recv().await
    }

    /// Consume the socket as a [`Stream`](futures::Stream) of frames.
    pub fn into_stream(self) -> ReceiverStream<RawFrame> {
        ReceiverStream::new(self.frames)
    }
}
