//! Idempotent stop handle shared between a capture source and its owner

use std::fmt;
#[cfg(target_os = "linux")]
use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;
#[cfg(target_os = "linux")]
use tracing::warn;

#[cfg(target_os = "linux")]
use super::linux::ShutdownEventFd;

/// Stop signal for one capture source.
///
/// Cloning yields another handle to the same signal. [`CaptureStop::stop`]
/// may be called any number of times, from any thread, including before the
/// source it controls has finished opening: a source opened with an
/// already-stopped handle ends its sequence without reading.
///
/// On Linux the handle also carries the eventfd that wakes a reader thread
/// blocked in `poll`, so a stop takes effect immediately instead of after the
/// poll timeout.
#[derive(Clone, Default)]
pub struct CaptureStop {
    cancel: CancellationToken,
    #[cfg(target_os = "linux")]
    wake: Arc<OnceLock<Arc<ShutdownEventFd>>>,
}

impl CaptureStop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the source to stop. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();

        #[cfg(target_os = "linux")]
        if let Some(wake) = self.wake.get()
            && let Err(e) = wake.signal()
        {
            warn!("Failed to wake capture reader: {}", e);
        }
    }

    /// Whether [`stop`](Self::stop) has been called
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once [`stop`](Self::stop) has been called.
    pub async fn stopped(&self) {
        self.cancel.cancelled().await
    }

    /// Cancellation token backing this handle
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Attach the eventfd a reader thread polls on.
    ///
    /// Only the first attachment is kept. If the handle is already stopped the
    /// eventfd is signalled right away.
    #[cfg(target_os = "linux")]
    pub(crate) fn attach_wake(&self, wake: Arc<ShutdownEventFd>) -> bool {
        let attached = self.wake.set(wake).is_ok();
        if attached && self.is_stopped() {
            self.stop();
        }
        attached
    }
}

impl fmt::Debug for CaptureStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureStop").field("stopped", &self.is_stopped()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn stop_is_idempotent_and_shared_by_clones() {
        let stop = CaptureStop::new();
        let other = stop.clone();
        assert!(!other.is_stopped());

        stop.stop();
        stop.stop();
        other.stop();

        assert!(stop.is_stopped());
        assert!(other.is_stopped());
    }

    #[tokio::test]
    async fn stopped_resolves_after_stop_from_another_thread() {
        let stop = CaptureStop::new();
        let remote = stop.clone();
        std::thread::spawn(move || remote.stop());

        tokio::time::timeout(Duration::from_secs(2), stop.stopped())
            .await
            .expect("stop should be observed");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn attaching_after_stop_signals_immediately() {
        let stop = CaptureStop::new();
        stop.stop();

        let wake = Arc::new(ShutdownEventFd::new().unwrap());
        assert!(stop.attach_wake(Arc::clone(&wake)));
        assert!(wake.is_signalled());

        let second = Arc::new(ShutdownEventFd::new().unwrap());
        assert!(!stop.attach_wake(second));
    }
}
