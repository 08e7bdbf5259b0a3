use crate::alerts::{Alert, AlertSeverity};
use crate::types::MetricsSnapshot;
use serde::{Deserialize, Serialize};

/// Aggregate health status (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Health {
    Healthy,
    Warning,
    Critical,
}

pub struct HealthRollup;

impl HealthRollup {
    /// `critical` if any critical alert is active or there are no metrics;
    /// `warning` if any warning alert is active, or memory/cpu > 90%, or
    /// error rate > 10/min; else `healthy`.
    pub fn compute(latest: Option<&MetricsSnapshot>, active_alerts: &[Alert]) -> Health {
        if active_alerts.iter().any(|a| a.severity == AlertSeverity::Critical) {
            return Health::Critical;
        }
        let Some(snapshot) = latest else {
            return Health::Critical;
        };
        let warning_alert = active_alerts.iter().any(|a| a.severity == AlertSeverity::Warning);
        if warning_alert
            || snapshot.memory_percent > 90.0
            || snapshot.cpu_percent > 90.0
            || snapshot.errors.rate_per_min > 10.0
        {
            return Health::Warning;
        }
        Health::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_metrics_is_critical() {
        assert_eq!(HealthRollup::compute(None, &[]), Health::Critical);
    }

    #[test]
    fn healthy_when_nothing_is_wrong() {
        let snapshot = MetricsSnapshot::empty();
        assert_eq!(HealthRollup::compute(Some(&snapshot), &[]), Health::Healthy);
    }

    #[test]
    fn warning_on_high_memory() {
        let mut snapshot = MetricsSnapshot::empty();
        snapshot.memory_percent = 95.0;
        assert_eq!(HealthRollup::compute(Some(&snapshot), &[]), Health::Warning);
    }
}
