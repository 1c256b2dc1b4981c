//! Pipeline spawns and manages the physical-path and tunnel-path tasks
//!
//! ```text
//! physical source ──► decode_frame ──► marker? ──► correlation slot ─┐
//!                                                                     │
//! tunnel source ──► correlate (pop marker) ──► decode_layers ──► sink ◄┘
//! ```
//!
//! Each path is one task that owns its [`FrameSource`]. The two tasks share
//! the correlation slot and the [`Metrics`] counters. Shutdown is
//! cooperative: once both sources end (stopped or end of file), each task
//! drains what it already holds and exits. The tunnel task flushes the sink
//! before it returns. If the tunnel path ends while a live physical capture
//! is still running, the physical path is cancelled.
//!
//! When both sources are finite (capture files), the two paths are merged in
//! timestamp order through a `ReplayClock`: a tunnel frame is paired only
//! after every physical frame stamped at or before it has been processed, and
//! a physical frame waits for every earlier tunnel frame. Replay then pairs
//! the same way on every run. Ties go to the physical frame.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::correlate::{CorrelatedFrame, MarkerSender, StreamCorrelator, correlation_slot};
use crate::decode::decode_frame;
use crate::provider::FrameSource;
use crate::sink::RecordSink;
use crate::stats::{Metrics, StatsReporter};
use crate::types::ether_type::PROTOCOL_ID_NONE;
use crate::types::{InterfaceKind, RawFrame, Timestamp};
use crate::Result;

/// Consecutive recoverable source errors tolerated before a path gives up
const MAX_SOURCE_ERRORS: u32 = 10;

/// How far one path of a replay has got
#[derive(Debug, Clone, Copy)]
enum Progress {
    /// Nothing read yet
    Starting,
    /// Holding a frame stamped at this instant; every earlier frame is done
    At(Timestamp),
    /// Waiting for room in a full correlation slot
    Stalled,
    Finished,
}

impl Progress {
    /// Whether every frame stamped before `timestamp` has been processed,
    /// and with `include_ties` every frame stamped at it too.
    fn has_passed(&self, timestamp: Timestamp, include_ties: bool) -> bool {
        match self {
            Progress::Starting | Progress::Stalled => false,
            Progress::At(current) if include_ties => *current > timestamp,
            Progress::At(current) => *current >= timestamp,
            Progress::Finished => true,
        }
    }
}

/// Keeps the two paths of a replay in timestamp order.
///
/// Each path publishes the timestamp of the frame it holds and waits for its
/// peer to get past it. Live pipelines use a disabled clock.
struct ReplayClock {
    link: Option<(watch::Sender<Progress>, watch::Receiver<Progress>)>,
    /// Also wait for peer frames stamped at the same instant
    include_ties: bool,
}

impl ReplayClock {
    fn disabled() -> Self {
        Self { link: None, include_ties: false }
    }

    /// Clocks for the physical and tunnel paths, in that order
    fn pair() -> (Self, Self) {
        let (physical_tx, physical_rx) = watch::channel(Progress::Starting);
        let (tunnel_tx, tunnel_rx) = watch::channel(Progress::Starting);
        (
            Self { link: Some((physical_tx, tunnel_rx)), include_ties: false },
            Self { link: Some((tunnel_tx, physical_rx)), include_ties: true },
        )
    }

    fn publish(&self, progress: Progress) {
        if let Some((tx, _)) = &self.link {
            tx.send_replace(progress);
        }
    }

    /// Publish `timestamp` as this path's position and wait until the peer
    /// has passed it, or until `proceed_early` holds when the peer publishes.
    /// Returns at once if the peer is gone.
    async fn advance_to(&mut self, timestamp: Timestamp, proceed_early: impl Fn() -> bool) {
        self.publish(Progress::At(timestamp));
        let include_ties = self.include_ties;
        if let Some((_, peer)) = &mut self.link {
            let _ = peer
                .wait_for(|progress| progress.has_passed(timestamp, include_ties) || proceed_early())
                .await;
        }
    }
}

/// Totals reported by the physical-path task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhysicalSummary {
    pub frames: u64,
    pub markers: u64,
    pub decode_failures: u64,
}

/// Totals reported by the tunnel-path task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TunnelSummary {
    pub frames: u64,
    pub correlated: u64,
    pub unpaired: u64,
    pub decode_failures: u64,
    pub records_written: u64,
    pub sink_failures: u64,
}

/// What both paths did before they exited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub physical: PhysicalSummary,
    pub tunnel: TunnelSummary,
}

/// Handle to a running pipeline
pub struct PipelineHandle {
    physical: JoinHandle<PhysicalSummary>,
    tunnel: JoinHandle<TunnelSummary>,
    stats: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl PipelineHandle {
    /// Abort both paths without waiting for their sources to end.
    ///
    /// Frames already queued are discarded. The sink is still flushed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancellation token shared by the pipeline tasks
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for both paths to finish and return their totals.
    ///
    /// A panic in either path is resumed on the caller.
    pub async fn join(self) -> PipelineSummary {
        let tunnel = join_path(self.tunnel).await;
        let physical = join_path(self.physical).await;

        // The reporter logs a final report when cancelled
        self.cancel.cancel();
        if let Some(stats) = self.stats {
            join_path(stats).await;
        }

        let summary = PipelineSummary { physical, tunnel };
        info!(
            "Pipeline finished: {} physical frames ({} markers), {} tunnel frames ({} correlated, {} unpaired), {} records written",
            summary.physical.frames,
            summary.physical.markers,
            summary.tunnel.frames,
            summary.tunnel.correlated,
            summary.tunnel.unpaired,
            summary.tunnel.records_written
        );
        summary
    }
}

async fn join_path<T: Default>(task: JoinHandle<T>) -> T {
    match task.await {
        Ok(summary) => summary,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => {
            warn!("Pipeline task did not finish: {}", e);
            T::default()
        }
    }
}

/// Pipeline spawns and manages the two processing paths
pub struct Pipeline;

impl Pipeline {
    /// Spawn the physical and tunnel paths, and the statistics reporter when
    /// enabled in `config`.
    pub fn spawn<P, T, S>(
        physical: P,
        tunnel: T,
        sink: S,
        config: &Config,
        metrics: Arc<Metrics>,
    ) -> PipelineHandle
    where
        P: FrameSource,
        T: FrameSource,
        S: RecordSink,
    {
        let (markers, correlator) = correlation_slot(config.correlation.slot_capacity);
        let cancel = CancellationToken::new();

        let ordered = physical.is_finite() && tunnel.is_finite();
        let (physical_clock, tunnel_clock) = if ordered {
            ReplayClock::pair()
        } else {
            (ReplayClock::disabled(), ReplayClock::disabled())
        };
        let stop_physical_with_tunnel = !physical.is_finite();

        info!(
            "Starting pipeline: tunnel {} / physical {} (slot capacity {}, {})",
            tunnel.describe(),
            physical.describe(),
            config.correlation.slot_capacity,
            if ordered { "timestamp ordered" } else { "live" }
        );

        let physical = tokio::spawn(Self::physical_path(
            physical,
            markers,
            physical_clock,
            Arc::clone(&metrics),
            cancel.clone(),
        ));
        let tunnel = tokio::spawn(Self::tunnel_path(
            tunnel,
            correlator,
            sink,
            tunnel_clock,
            stop_physical_with_tunnel,
            Arc::clone(&metrics),
            cancel.clone(),
        ));

        let stats = config.stats.enabled.then(|| {
            StatsReporter::spawn(metrics, config.stats.interval(), cancel.child_token())
        });

        PipelineHandle { physical, tunnel, stats, cancel }
    }

    /// Physical path: decode every frame, tally it, and push a marker for each
    /// frame whose protocol id is `255`.
    async fn physical_path<P: FrameSource>(
        mut source: P,
        markers: MarkerSender,
        mut clock: ReplayClock,
        metrics: Arc<Metrics>,
        cancel: CancellationToken,
    ) -> PhysicalSummary {
        info!("Physical path started on {}", source.describe());
        let mut summary = PhysicalSummary::default();
        let mut correlator_gone = false;

        while let Some(frame) = Self::next_frame(&mut source, &cancel).await {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = clock.advance_to(frame.timestamp, || false) => {}
            }
            summary.frames += 1;
            metrics.record_frame(InterfaceKind::Physical, frame.len());

            let decoded = match decode_frame(frame.bytes(), frame.timestamp) {
                Ok(decoded) => decoded,
                Err(e) => {
                    summary.decode_failures += 1;
                    metrics.record_decode_failure(InterfaceKind::Physical);
                    debug!("Skipping {}-byte physical frame: {}", frame.len(), e);
                    continue;
                }
            };

            metrics.record_ether_type(decoded.link.ether_type);
            trace!(
                "Physical frame {}: ether type 0x{:04x}, protocol {}",
                summary.frames,
                decoded.link.ether_type,
                decoded.protocol_id()
            );

            if decoded.protocol_id() != PROTOCOL_ID_NONE || correlator_gone {
                continue;
            }

            if markers.is_full() {
                clock.publish(Progress::Stalled);
            }
            let pushed = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                pushed = markers.push(decoded.link) => pushed,
            };
            clock.publish(Progress::At(frame.timestamp));
            if pushed {
                summary.markers += 1;
                metrics.record_marker();
            } else {
                debug!("Tunnel path has ended; no further markers will be queued");
                correlator_gone = true;
            }
        }

        clock.publish(Progress::Finished);
        info!(
            "Physical path ended ({} frames, {} markers, {} skipped)",
            summary.frames, summary.markers, summary.decode_failures
        );
        summary
    }

    /// Tunnel path: pair each frame with the oldest marker, decode it, and
    /// hand the records to the sink.
    async fn tunnel_path<T: FrameSource, S: RecordSink>(
        mut source: T,
        mut correlator: StreamCorrelator,
        mut sink: S,
        mut clock: ReplayClock,
        stop_physical_on_exit: bool,
        metrics: Arc<Metrics>,
        cancel: CancellationToken,
    ) -> TunnelSummary {
        info!("Tunnel path started on {}", source.describe());
        let mut summary = TunnelSummary::default();

        while let Some(frame) = Self::next_frame(&mut source, &cancel).await {
            // A full slot means the physical path is blocked on this path.
            // Its head marker is the one strict ordering would pop anyway.
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = clock.advance_to(frame.timestamp, || correlator.is_full()) => {}
            }
            summary.frames += 1;
            metrics.record_frame(InterfaceKind::Tunnel, frame.len());

            match correlator.correlate_frame(&frame) {
                None => {
                    summary.unpaired += 1;
                    metrics.record_unpaired();
                    debug!("No marker pending for {}-byte tunnel frame", frame.len());
                }
                Some(Err(e)) => {
                    summary.decode_failures += 1;
                    metrics.record_decode_failure(InterfaceKind::Tunnel);
                    debug!("Skipping {}-byte tunnel frame: {}", frame.len(), e);
                }
                Some(Ok(correlated)) => {
                    summary.correlated += 1;
                    metrics.record_correlated(correlated.protocol_id());
                    Self::write_records(&mut sink, &correlated, &mut summary, &metrics);
                }
            }
        }

        clock.publish(Progress::Finished);
        if let Err(e) = sink.flush() {
            warn!("Failed to flush sink: {}", e);
        }

        if stop_physical_on_exit && !cancel.is_cancelled() {
            info!("Tunnel path has ended, stopping the live physical path");
            cancel.cancel();
        }

        info!(
            "Tunnel path ended ({} frames, {} correlated, {} unpaired, {} markers left)",
            summary.frames,
            summary.correlated,
            summary.unpaired,
            correlator.pending()
        );
        summary
    }

    /// Link record first, then network and transport when present.
    fn write_records<S: RecordSink>(
        sink: &mut S,
        frame: &CorrelatedFrame,
        summary: &mut TunnelSummary,
        metrics: &Metrics,
    ) {
        let mut record = |result: Result<()>| match result {
            Ok(()) => summary.records_written += 1,
            Err(e) => {
                summary.sink_failures += 1;
                metrics.record_sink_failure();
                warn!("Sink write failed, record lost: {}", e);
            }
        };

        record(sink.write_link(&frame.link));
        if let Some(network) = &frame.network {
            record(sink.write_network(network));
        }
        if let Some(transport) = &frame.transport {
            record(sink.write_transport(transport));
        }
    }

    /// Next frame from `source`, or `None` once the sequence is over.
    ///
    /// Recoverable source errors are retried with exponential backoff, up to
    /// [`MAX_SOURCE_ERRORS`] in a row. Anything else ends the sequence.
    async fn next_frame<F: FrameSource>(
        source: &mut F,
        cancel: &CancellationToken,
    ) -> Option<RawFrame> {
        let mut error_count = 0u32;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("{} path cancelled", source.interface());
                    return None;
                }
                result = source.next_frame() => result,
            };

            match result {
                Ok(frame) => return frame,
                Err(e) if !e.is_recoverable() => {
                    error!("Reading from {} failed: {}", source.describe(), e);
                    return None;
                }
                Err(e) => {
                    error_count += 1;
                    warn!(
                        "Source error on {} ({}/{}): {}",
                        source.describe(),
                        error_count,
                        MAX_SOURCE_ERRORS,
                        e
                    );
                    if error_count >= MAX_SOURCE_ERRORS {
                        error!("Too many errors from {}, ending its sequence", source.describe());
                        return None;
                    }

                    // Exponential backoff: 100ms, 200ms, 400ms, ...
                    let backoff = Duration::from_millis(50 * (1 << error_count.min(5)));
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return None,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
    }
}
