//! Container stats derivation (spec §4.6 `getContainerStats`), grounded on
//! the CPU-delta / memory / network aggregation pattern used by the
//! retrieved Docker-adapter reference (noxterm's lifecycle manager).

use bollard::container::Stats;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStats {
    pub cpu_percent: f64,
    pub memory_usage_bytes: u64,
    pub memory_limit_bytes: u64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
}

/// Derive `cpu%` from the cpu/precpu usage deltas, aggregate rx/tx across
/// every network interface reported, and read memory usage/limit straight
/// off the stats payload.
pub fn derive_stats(stats: &Stats) -> ContainerStats {
    let cpu_delta = stats
        .cpu_stats
        .cpu_usage
        .total_usage
        .saturating_sub(stats.precpu_stats.cpu_usage.total_usage) as f64;
    let system_delta = stats
        .cpu_stats
        .system_cpu_usage
        .unwrap_or(0)
        .saturating_sub(stats.precpu_stats.system_cpu_usage.unwrap_or(0)) as f64;

    let cpu_percent = if system_delta > 0.0 {
        let online_cpus = stats.cpu_stats.online_cpus.unwrap_or(1) as f64;
        (cpu_delta / system_delta) * online_cpus * 100.0
    } else {
        0.0
    };

    let memory_usage_bytes = stats.memory_stats.usage.unwrap_or(0);
    let memory_limit_bytes = stats.memory_stats.limit.unwrap_or(0);

    let (network_rx_bytes, network_tx_bytes) = match &stats.networks {
        Some(networks) => networks.values().fold((0u64, 0u64), |(rx, tx), net| {
            (rx + net.rx_bytes, tx + net.tx_bytes)
        }),
        None => (0, 0),
    };

    ContainerStats {
        cpu_percent,
        memory_usage_bytes,
        memory_limit_bytes,
        network_rx_bytes,
        network_tx_bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::container::{CPUStats, CPUUsage, MemoryStats};

    fn empty_stats() -> Stats {
        serde_json::from_str("{}").unwrap()
    }

    #[test]
    fn zero_system_delta_reports_zero_cpu_percent() {
        let stats = empty_stats();
        let derived = derive_stats(&stats);
        assert_eq!(derived.cpu_percent, 0.0);
    }

    #[test]
    fn computes_cpu_percent_from_deltas() {
        let mut stats = empty_stats();
        stats.cpu_stats = CPUStats {
            cpu_usage: CPUUsage { total_usage: 2_000_000_000, ..Default::default() },
            system_cpu_usage: Some(10_000_000_000),
            online_cpus: Some(2),
            ..Default::default()
        };
        stats.precpu_stats = CPUStats {
            cpu_usage: CPUUsage { total_usage: 1_000_000_000, ..Default::default() },
            system_cpu_usage: Some(8_000_000_000),
            ..Default::default()
        };
        stats.memory_stats = MemoryStats { usage: Some(512_000_000), limit: Some(2_147_483_648), ..Default::default() };

        let derived = derive_stats(&stats);
        // (2e9 - 1e9) / (10e9 - 8e9) * 2 * 100 = 1e9/2e9*200 = 100.0
        assert!((derived.cpu_percent - 100.0).abs() < 0.01);
        assert_eq!(derived.memory_usage_bytes, 512_000_000);
        assert_eq!(derived.memory_limit_bytes, 2_147_483_648);
    }
}
