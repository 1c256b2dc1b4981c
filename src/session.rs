//! A pair of opened sources ready to run through the pipeline

use std::sync::Arc;

use tracing::info;

use crate::Result;
use crate::capture::CaptureStop;
use crate::config::Config;
use crate::pipeline::{Pipeline, PipelineHandle};
use crate::provider::FrameSource;
use crate::sink::RecordSink;
use crate::stats::Metrics;

/// Stop handles for both sources of a [`Session`].
///
/// Stopping ends both frame sequences; the pipeline then drains and flushes
/// its sink on its own.
#[derive(Debug, Clone, Default)]
pub struct SessionStop {
    tunnel: CaptureStop,
    physical: CaptureStop,
}

impl SessionStop {
    pub fn new(tunnel: CaptureStop, physical: CaptureStop) -> Self {
        Self { tunnel, physical }
    }

    /// Stop both sources. Idempotent.
    pub fn stop(&self) {
        self.tunnel.stop();
        self.physical.stop();
    }

    /// Tunnel and physical handles, in that order
    pub fn handles(&self) -> (CaptureStop, CaptureStop) {
        (self.tunnel.clone(), self.physical.clone())
    }

    pub fn is_stopped(&self) -> bool {
        self.tunnel.is_stopped() && self.physical.is_stopped()
    }
}

/// Tunnel and physical sources plus the settings to run them with
pub struct Session {
    tunnel: Box<dyn FrameSource>,
    physical: Box<dyn FrameSource>,
    stop: SessionStop,
    config: Config,
    metrics: Arc<Metrics>,
}

impl Session {
    /// Assemble a session from already-opened sources.
    ///
    /// `stop` must control both sources for [`Session::stop`] to end them.
    ///
    /// # Errors
    ///
    /// Returns [`LinkwatchError::Config`](crate::LinkwatchError::Config) if
    /// `config` does not validate.
    pub fn new(
        tunnel: impl FrameSource,
        physical: impl FrameSource,
        stop: SessionStop,
        config: Config,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            tunnel: Box::new(tunnel),
            physical: Box::new(physical),
            stop,
            config,
            metrics: Metrics::new(),
        })
    }

    /// Start the pipeline, writing correlated records into `sink`.
    pub fn run<S: RecordSink>(self, sink: S) -> PipelineHandle {
        info!(
            "Running session: tunnel {}, physical {}",
            self.tunnel.describe(),
            self.physical.describe()
        );
        Pipeline::spawn(self.physical, self.tunnel, sink, &self.config, self.metrics)
    }

    /// Stop both sources.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Stop handle that outlives [`run`](Self::run)
    pub fn stop_handle(&self) -> SessionStop {
        self.stop.clone()
    }

    /// Counters the pipeline records into
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{self, MemorySink, VecSource};
    use crate::types::InterfaceKind;

    #[tokio::test]
    async fn metrics_survive_run() {
        let physical = VecSource::new(
            InterfaceKind::Physical,
            vec![test_utils::ethernet_frame([0xff; 6], [2, 0, 0, 0, 0, 1], 0x88cc, &[0u8; 46])],
        );
        let tunnel = VecSource::new(InterfaceKind::Tunnel, vec![]);
        let mut config = Config::default();
        config.stats.enabled = false;

        let session = Session::new(tunnel, physical, SessionStop::default(), config).unwrap();
        let metrics = session.metrics();
        session.run(MemorySink::new()).join().await;

        assert_eq!(metrics.snapshot().physical.packets, 1);
    }

    #[test]
    fn zero_slot_capacity_is_rejected() {
        let mut config = Config::default();
        config.correlation.slot_capacity = 0;

        let err = Session::new(
            VecSource::new(InterfaceKind::Tunnel, vec![]),
            VecSource::new(InterfaceKind::Physical, vec![]),
            SessionStop::default(),
            config,
        )
        .err()
        .unwrap();
        assert!(matches!(err, crate::LinkwatchError::Config { .. }));
    }

    #[test]
    fn stop_reaches_both_sources() {
        let tunnel = CaptureStop::new();
        let physical = CaptureStop::new();
        let stop = SessionStop::new(tunnel.clone(), physical.clone());

        stop.stop();
        stop.stop();
        assert!(tunnel.is_stopped());
        assert!(physical.is_stopped());
        assert!(stop.is_stopped());
    }
}
