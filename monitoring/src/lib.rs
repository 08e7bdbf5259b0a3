//! Monitoring (C3): a 30s collection tick feeding a bounded metrics ring,
//! alert rules with per-rule cooldown, and the health rollup (spec §4.3).

pub mod alerts;
pub mod rollup;
pub mod types;

pub use alerts::{Alert, AlertRule, AlertSeverity, AlertEngine};
pub use rollup::{Health, HealthRollup};
pub use types::{ContainerCounts, ErrorMetrics, MetricsSnapshot, PerformanceMetrics, SessionMetrics};

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

/// Bounded ring buffer capacity for collected metrics snapshots (spec §5).
pub const METRICS_RING_CAPACITY: usize = 100;

/// A metrics source the monitor polls once per tick to build a snapshot.
/// Implemented by whatever composes the monitor (typically the session
/// manager, which knows container/session counts).
#[async_trait::async_trait]
pub trait MetricsSource: Send + Sync {
    async fn collect(&self) -> MetricsSnapshot;
}

#[async_trait::async_trait]
impl MetricsSource for () {
    async fn collect(&self) -> MetricsSnapshot {
        MetricsSnapshot::empty()
    }
}

/// The monitoring control loop: every `tick_interval` it pulls a snapshot
/// from the configured `MetricsSource`, pushes it onto the bounded ring,
/// and evaluates alert rules against the rollup of recent snapshots.
pub struct Monitor {
    ring: RwLock<VecDeque<MetricsSnapshot>>,
    alert_engine: AlertEngine,
    tick_interval: Duration,
}

impl Monitor {
    pub fn new(alert_engine: AlertEngine) -> Self {
        Self {
            ring: RwLock::new(VecDeque::with_capacity(METRICS_RING_CAPACITY)),
            alert_engine,
            tick_interval: Duration::from_secs(30),
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Record one tick's snapshot, evicting the oldest entry once the ring
    /// is full, then evaluate alert rules against it.
    pub fn record_tick(&self, snapshot: MetricsSnapshot) -> Vec<Alert> {
        {
            let mut ring = self.ring.write();
            if ring.len() == METRICS_RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(snapshot.clone());
        }
        self.alert_engine.evaluate(&snapshot)
    }

    /// A read-only snapshot of the ring for reporting/inspection.
    pub fn recent(&self) -> Vec<MetricsSnapshot> {
        self.ring.read().iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<MetricsSnapshot> {
        self.ring.read().back().cloned()
    }

    pub fn health(&self) -> Health {
        HealthRollup::compute(self.latest().as_ref(), &self.alert_engine.active_alerts())
    }

    /// Drive the collection loop forever. Intended to be spawned as a
    /// background task by the binary crate; cancellation is cooperative
    /// via dropping the returned `JoinHandle`.
    pub async fn run<S: MetricsSource>(self: std::sync::Arc<Self>, source: std::sync::Arc<S>) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        loop {
            ticker.tick().await;
            let snapshot = source.collect().await;
            let fired = self.record_tick(snapshot);
            for alert in fired {
                debug!(alert_id = %alert.id, severity = ?alert.severity, "alert fired");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MetricsSnapshot;

    #[test]
    fn ring_evicts_oldest_once_full() {
        let monitor = Monitor::new(AlertEngine::new(vec![]));
        for i in 0..METRICS_RING_CAPACITY + 10 {
            let mut snapshot = MetricsSnapshot::empty();
            snapshot.uptime_secs = i as u64;
            monitor.record_tick(snapshot);
        }
        let recent = monitor.recent();
        assert_eq!(recent.len(), METRICS_RING_CAPACITY);
        assert_eq!(recent.first().unwrap().uptime_secs, 10);
        assert_eq!(recent.last().unwrap().uptime_secs, (METRICS_RING_CAPACITY + 9) as u64);
    }
}
