//! Feeds `Monitor` (C3) a full `MetricsSnapshot` each tick by combining
//! `SessionManager`'s own container/session counts (spec §4.3) with the
//! error counters `recovery-service` reports through `FailureRecorder`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use error_kernel::ErrorKind;
use monitoring::{ErrorMetrics, MetricsSnapshot, MetricsSource};
use parking_lot::RwLock;
use recovery_service::FailureRecorder;
use session_manager::SessionManager;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

/// Window recent failures are kept in to compute `rate_per_min`. Bounded
/// separately from the ring capacities in `monitoring` since this tracks
/// raw timestamps, not snapshots.
const RATE_WINDOW_SECS: i64 = 60;
const RECENT_FAILURES_CAPACITY: usize = 10_000;

pub struct ErrorRecorder {
    by_kind: RwLock<HashMap<String, u64>>,
    recent: RwLock<VecDeque<DateTime<Utc>>>,
}

impl ErrorRecorder {
    pub fn new() -> Self {
        Self { by_kind: RwLock::new(HashMap::new()), recent: RwLock::new(VecDeque::new()) }
    }

    pub fn snapshot(&self) -> ErrorMetrics {
        let cutoff = Utc::now() - chrono::Duration::seconds(RATE_WINDOW_SECS);
        let rate_per_min = {
            let recent = self.recent.read();
            recent.iter().filter(|t| **t > cutoff).count() as f64
        };
        let by_kind = self.by_kind.read().clone();
        let total = by_kind.values().sum();
        ErrorMetrics { total, rate_per_min, by_kind }
    }
}

impl Default for ErrorRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl FailureRecorder for ErrorRecorder {
    fn record_failure(&self, kind: ErrorKind) {
        *self.by_kind.write().entry(kind.to_string()).or_insert(0) += 1;
        let mut recent = self.recent.write();
        recent.push_back(Utc::now());
        if recent.len() > RECENT_FAILURES_CAPACITY {
            recent.pop_front();
        }
    }
}

pub struct AppMetricsSource {
    pub sessions: Arc<SessionManager>,
    pub errors: Arc<ErrorRecorder>,
    pub started_at: Instant,
}

#[async_trait]
impl MetricsSource for AppMetricsSource {
    async fn collect(&self) -> MetricsSnapshot {
        let mut snapshot = self.sessions.collect().await;
        snapshot.errors = self.errors.snapshot();
        snapshot.uptime_secs = self.started_at.elapsed().as_secs();
        // Host-level memory/cpu percentages have no component in spec §2 that
        // owns them (no host-metrics [MODULE]); left at the snapshot default
        // of 0.0 rather than invented, per DESIGN.md.
        snapshot
    }
}
