//! Live capture stub for platforms without AF_PACKET

use tokio::sync::mpsc;

use super::CaptureStop;
use crate::config::CaptureConfig;
use crate::types::{InterfaceKind, RawFrame};
use crate::{LinkwatchError, Result};

pub(super) fn spawn_reader(
    _interface: &str,
    _kind: InterfaceKind,
    _config: &CaptureConfig,
    _stop: &CaptureStop,
    _frames: mpsc::Sender<RawFrame>,
) -> Result<()> {
    Err(LinkwatchError::unsupported_platform("Live interface capture", "Linux"))
}
