use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One tick's worth of metrics (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub memory_percent: f64,
    pub cpu_percent: f64,
    pub containers: ContainerCounts,
    pub sessions: SessionMetrics,
    pub errors: ErrorMetrics,
    pub performance: PerformanceMetrics,
}

impl MetricsSnapshot {
    pub fn empty() -> Self {
        Self {
            uptime_secs: 0,
            memory_percent: 0.0,
            cpu_percent: 0.0,
            containers: ContainerCounts::default(),
            sessions: SessionMetrics::default(),
            errors: ErrorMetrics::default(),
            performance: PerformanceMetrics::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerCounts {
    pub total: u64,
    pub running: u64,
    pub stopped: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub active: u64,
    pub total: u64,
    pub avg_duration_secs: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub total: u64,
    pub rate_per_min: f64,
    pub by_kind: HashMap<String, u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub avg_response_ms: f64,
    pub slow_queries: u64,
}
