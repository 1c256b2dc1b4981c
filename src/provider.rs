//! Frame source trait

use crate::Result;
use crate::types::{InterfaceKind, RawFrame};

/// Source of raw frames for one side of the pipeline
///
/// Sources abstract over live interfaces and capture-file replay. The
/// pipeline owns one source per interface and pulls from it until it ends.
#[async_trait::async_trait]
pub trait FrameSource: Send + 'static {
    /// Get the next captured frame
    ///
    /// Returns:
    /// - `Ok(Some(frame))` - New frame available
    /// - `Ok(None)` - Sequence ended (stopped, end of file, or reader failure)
    /// - `Err(e)` - The source could not produce this frame
    async fn next_frame(&mut self) -> Result<Option<RawFrame>>;

    /// Which interface this source stands for
    fn interface(&self) -> InterfaceKind;

    /// Interface name or capture file path, for diagnostics
    fn describe(&self) -> String;

    /// Whether the sequence ends on its own, as a capture file does.
    ///
    /// When both sources are finite the pipeline replays them in timestamp
    /// order. A live physical source is stopped once the tunnel path ends.
    fn is_finite(&self) -> bool {
        false
    }
}

#[async_trait::async_trait]
impl<F: FrameSource + ?Sized> FrameSource for Box<F> {
    async fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        (**self).next_frame().await
    }

    fn interface(&self) -> InterfaceKind {
        (**self).interface()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn is_finite(&self) -> bool {
        (**self).is_finite()
    }
}
