//! Live frame source backed by a raw interface socket

use tracing::info;

use crate::Result;
use crate::capture::{CaptureStop, InterfaceSocket};
use crate::config::CaptureConfig;
use crate::provider::FrameSource;
use crate::types::{InterfaceKind, RawFrame};

/// Live source that reads frames from a network interface
pub struct LiveSource {
    socket: InterfaceSocket,
    stop: CaptureStop,
}

impl LiveSource {
    /// Open `interface` for capture.
    pub fn open(interface: &str, kind: InterfaceKind, config: &CaptureConfig) -> Result<Self> {
        Self::open_with_stop(interface, kind, config, CaptureStop::new())
    }

    /// Open `interface` controlled by an existing stop handle.
    pub fn open_with_stop(
        interface: &str,
        kind: InterfaceKind,
        config: &CaptureConfig,
        stop: CaptureStop,
    ) -> Result<Self> {
        let socket = InterfaceSocket::open_with(interface, kind, config, stop.clone())?;
        info!("Live source ready on {} ({})", interface, kind);
        Ok(Self { socket, stop })
    }

    /// Stop handle for this source
    pub fn stop_handle(&self) -> CaptureStop {
        self.stop.clone()
    }
}

#[async_trait::async_trait]
impl FrameSource for LiveSource {
    async fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        Ok(self.socket.recv().await)
    }

    fn interface(&self) -> InterfaceKind {
        self.socket.kind()
    }

    fn describe(&self) -> String {
        self.socket.name().to_string()
    }
}
