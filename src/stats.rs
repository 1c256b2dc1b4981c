//! Traffic counters and the periodic statistics report.
//!
//! [`Metrics`] is passed by `Arc` to the pipeline tasks that record into it.
//! The decoders never see it. [`StatsReporter`] samples it on a fixed interval
//! and logs totals, per-second rates and the protocol tallies.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::types::InterfaceKind;
use crate::types::ether_type::{ether_type_name, format_ether_type};

/// Per-interface packet and byte counters
#[derive(Debug, Default)]
struct InterfaceCounters {
    packets: AtomicU64,
    bytes: AtomicU64,
    decode_failures: AtomicU64,
}

impl InterfaceCounters {
    fn snapshot(&self) -> InterfaceSnapshot {
        InterfaceSnapshot {
            packets: self.packets.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
        }
    }
}

/// Counters shared by the pipeline tasks
#[derive(Debug, Default)]
pub struct Metrics {
    tunnel: InterfaceCounters,
    physical: InterfaceCounters,
    markers_enqueued: AtomicU64,
    tunnel_correlated: AtomicU64,
    tunnel_unpaired: AtomicU64,
    sink_failures: AtomicU64,
    ether_types: Mutex<BTreeMap<u16, u64>>,
    tunnel_protocols: Mutex<BTreeMap<u8, u64>>,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn counters(&self, interface: InterfaceKind) -> &InterfaceCounters {
        match interface {
            InterfaceKind::Tunnel => &self.tunnel,
            InterfaceKind::Physical => &self.physical,
        }
    }

    /// Count a frame received on `interface`
    pub fn record_frame(&self, interface: InterfaceKind, len: usize) {
        let counters = self.counters(interface);
        counters.packets.fetch_add(1, Ordering::Relaxed);
        counters.bytes.fetch_add(len as u64, Ordering::Relaxed);
    }

    /// Count a frame skipped because it failed to decode
    pub fn record_decode_failure(&self, interface: InterfaceKind) {
        self.counters(interface).decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Tally the innermost EtherType of a physical frame
    pub fn record_ether_type(&self, ether_type: u16) {
        if let Ok(mut tally) = self.ether_types.lock() {
            *tally.entry(ether_type).or_default() += 1;
        }
    }

    pub fn record_marker(&self) {
        self.markers_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a correlated tunnel frame and tally its protocol id
    pub fn record_correlated(&self, protocol_id: u8) {
        self.tunnel_correlated.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut tally) = self.tunnel_protocols.lock() {
            *tally.entry(protocol_id).or_default() += 1;
        }
    }

    /// Count a tunnel frame that found no pending marker
    pub fn record_unpaired(&self) {
        self.tunnel_unpaired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tunnel: self.tunnel.snapshot(),
            physical: self.physical.snapshot(),
            markers_enqueued: self.markers_enqueued.load(Ordering::Relaxed),
            tunnel_correlated: self.tunnel_correlated.load(Ordering::Relaxed),
            tunnel_unpaired: self.tunnel_unpaired.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            ether_types: self.ether_types.lock().map(|t| t.clone()).unwrap_or_default(),
            tunnel_protocols: self.tunnel_protocols.lock().map(|t| t.clone()).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceSnapshot {
    pub packets: u64,
    pub bytes: u64,
    pub decode_failures: u64,
}

/// Immutable copy of [`Metrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub tunnel: InterfaceSnapshot,
    pub physical: InterfaceSnapshot,
    pub markers_enqueued: u64,
    pub tunnel_correlated: u64,
    pub tunnel_unpaired: u64,
    pub sink_failures: u64,
    /// Physical-interface frames per innermost EtherType
    pub ether_types: BTreeMap<u16, u64>,
    /// Correlated tunnel frames per protocol id (`255` = no network layer)
    pub tunnel_protocols: BTreeMap<u8, u64>,
}

/// Packet and byte rates between two snapshots
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rates {
    pub tunnel_pps: f64,
    pub tunnel_bps: f64,
    pub physical_pps: f64,
    pub physical_bps: f64,
}

impl MetricsSnapshot {
    /// Rates from `previous` to `self` over `elapsed`.
    pub fn rates_since(&self, previous: &MetricsSnapshot, elapsed: Duration) -> Rates {
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        let rate = |now: u64, before: u64| now.saturating_sub(before) as f64 / secs;
        Rates {
            tunnel_pps: rate(self.tunnel.packets, previous.tunnel.packets),
            tunnel_bps: rate(self.tunnel.bytes, previous.tunnel.bytes),
            physical_pps: rate(self.physical.packets, previous.physical.packets),
            physical_bps: rate(self.physical.bytes, previous.physical.bytes),
        }
    }
}

/// Periodic statistics logger
pub struct StatsReporter;

impl StatsReporter {
    /// Spawn a task that logs a report every `interval` until `cancel` fires.
    ///
    /// A final report is logged on cancellation.
    pub fn spawn(
        metrics: Arc<Metrics>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            let mut previous = metrics.snapshot();
            let mut last = Instant::now();
            debug!("Statistics reporter started ({:?} interval)", interval);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let current = metrics.snapshot();
                let now = Instant::now();
                Self::report(&current, &current.rates_since(&previous, now - last));
                previous = current;
                last = now;
            }

            let current = metrics.snapshot();
            Self::report(&current, &current.rates_since(&previous, last.elapsed()));
            debug!("Statistics reporter stopped");
        })
    }

    fn report(snapshot: &MetricsSnapshot, rates: &Rates) {
        info!(
            "[STATS] tunnel: {} pkts ({} bytes) | physical: {} pkts ({} bytes) | tunnel rate: {:.0} pps, {:.0} Bps | physical rate: {:.0} pps, {:.0} Bps",
            snapshot.tunnel.packets,
            snapshot.tunnel.bytes,
            snapshot.physical.packets,
            snapshot.physical.bytes,
            rates.tunnel_pps,
            rates.tunnel_bps,
            rates.physical_pps,
            rates.physical_bps,
        );
        info!(
            markers = snapshot.markers_enqueued,
            correlated = snapshot.tunnel_correlated,
            unpaired = snapshot.tunnel_unpaired,
            tunnel_decode_failures = snapshot.tunnel.decode_failures,
            physical_decode_failures = snapshot.physical.decode_failures,
            sink_failures = snapshot.sink_failures,
            "[STATS] correlation"
        );

        for (ether_type, count) in &snapshot.ether_types {
            let name = ether_type_name(*ether_type).unwrap_or("");
            info!("  physical {} {}: {}", format_ether_type(*ether_type), name, count);
        }
        for (protocol, count) in &snapshot.tunnel_protocols {
            info!("  tunnel protocol {}: {}", protocol, count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_per_interface() {
        let metrics = Metrics::new();
        metrics.record_frame(InterfaceKind::Tunnel, 84);
        metrics.record_frame(InterfaceKind::Tunnel, 16);
        metrics.record_frame(InterfaceKind::Physical, 60);
        metrics.record_decode_failure(InterfaceKind::Physical);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tunnel, InterfaceSnapshot { packets: 2, bytes: 100, decode_failures: 0 });
        assert_eq!(snapshot.physical, InterfaceSnapshot { packets: 1, bytes: 60, decode_failures: 1 });
    }

    #[test]
    fn tallies_accumulate() {
        let metrics = Metrics::new();
        metrics.record_ether_type(0x0800);
        metrics.record_ether_type(0x0800);
        metrics.record_ether_type(0x88cc);
        metrics.record_correlated(17);
        metrics.record_correlated(255);
        metrics.record_unpaired();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.ether_types.get(&0x0800), Some(&2));
        assert_eq!(snapshot.ether_types.get(&0x88cc), Some(&1));
        assert_eq!(snapshot.tunnel_protocols.get(&255), Some(&1));
        assert_eq!(snapshot.tunnel_correlated, 2);
        assert_eq!(snapshot.tunnel_unpaired, 1);
    }

    #[test]
    fn rates_use_elapsed_time() {
        let before = MetricsSnapshot::default();
        let mut after = MetricsSnapshot::default();
        after.tunnel.packets = 50;
        after.tunnel.bytes = 5000;
        after.physical.packets = 10;

        let rates = after.rates_since(&before, Duration::from_millis(500));
        assert_eq!(rates.tunnel_pps, 100.0);
        assert_eq!(rates.tunnel_bps, 10_000.0);
        assert_eq!(rates.physical_pps, 20.0);
        assert_eq!(rates.physical_bps, 0.0);
    }

    #[test]
    fn snapshot_serializes() {
        let metrics = Metrics::new();
        metrics.record_ether_type(0x86dd);
        let yaml = serde_yaml_ng::to_string(&metrics.snapshot()).unwrap();
        assert!(yaml.contains("ether_types"));
        assert!(yaml.contains("34525: 1"));
    }

    #[tokio::test]
    async fn reporter_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let handle = StatsReporter::spawn(Metrics::new(), Duration::from_millis(10), cancel.clone());

        tokio::time::sleep(Duration::from_millis(35)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
