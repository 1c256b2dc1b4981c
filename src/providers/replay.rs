//! Replay source for pcap capture files

use std::path::Path;
use tracing::{debug, info, trace};

use crate::Result;
use crate::capture::CaptureStop;
use crate::pcap::PcapReader;
use crate::provider::FrameSource;
use crate::types::{InterfaceKind, RawFrame};

/// Replay source that reads frames from a classic pcap file
///
/// Records are yielded as fast as the consumer takes them, with their original
/// capture timestamps.
pub struct ReplaySource {
    reader: PcapReader,
    kind: InterfaceKind,
    stop: CaptureStop,
}

impl ReplaySource {
    /// Open a capture file for replay as the given interface.
    pub fn open<P: AsRef<Path>>(path: P, kind: InterfaceKind) -> Result<Self> {
        Self::open_with_stop(path, kind, CaptureStop::new())
    }

    /// Open a capture file controlled by an existing stop handle.
    pub fn open_with_stop<P: AsRef<Path>>(
        path: P,
        kind: InterfaceKind,
        stop: CaptureStop,
    ) -> Result<Self> {
        let reader = PcapReader::open(path)?;
        Ok(Self::from_reader(reader, kind, stop))
    }

    /// Wrap an already-open reader.
    pub fn from_reader(reader: PcapReader, kind: InterfaceKind, stop: CaptureStop) -> Self {
        let info = reader.info();
        info!(
            "Opened capture file {} as {} interface (link type {}, {:?} timestamps)",
            reader.file_path().display(),
            kind,
            info.link_type,
            info.precision
        );
        Self { reader, kind, stop }
    }

    /// Stop handle for this source
    pub fn stop_handle(&self) -> CaptureStop {
        self.stop.clone()
    }
}

#[async_trait::async_trait]
impl FrameSource for ReplaySource {
    async fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        if self.stop.is_stopped() {
            debug!("Replay of {} stopped", self.reader.file_path().display());
            return Ok(None);
        }

        let record = match self.reader.read_next_record()? {
            Some(record) => record,
            None => {
                debug!(
                    "Reached end of {} after {} records",
                    self.reader.file_path().display(),
                    self.reader.records_read()
                );
                return Ok(None);
            }
        };

        trace!("Record {}: {} bytes", self.reader.records_read(), record.data.len());

        Ok(Some(RawFrame::new(record.data, record.timestamp, self.kind)))
    }

    fn interface(&self) -> InterfaceKind {
        self.kind
    }

    fn describe(&self) -> String {
        self.reader.file_path().display().to_string()
    }

    fn is_finite(&self) -> bool {
        true
    }
}
