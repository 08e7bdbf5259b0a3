use crate::types::MetricsSnapshot;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub metadata: HashMap<String, String>,
    pub resolved: bool,
    pub fired_at: DateTime<Utc>,
}

/// A condition evaluated against each metrics snapshot. Firing respects a
/// per-rule cooldown (spec §4.3: "a rule cannot fire twice within its
/// `cooldownMinutes`").
pub struct AlertRule {
    pub name: String,
    pub severity: AlertSeverity,
    pub enabled: bool,
    pub cooldown: ChronoDuration,
    pub condition: Box<dyn Fn(&MetricsSnapshot) -> Option<String> + Send + Sync>,
    last_fired: RwLock<Option<DateTime<Utc>>>,
}

impl AlertRule {
    pub fn new(
        name: impl Into<String>,
        severity: AlertSeverity,
        cooldown_minutes: i64,
        condition: impl Fn(&MetricsSnapshot) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            severity,
            enabled: true,
            cooldown: ChronoDuration::minutes(cooldown_minutes),
            condition: Box::new(condition),
            last_fired: RwLock::new(None),
        }
    }

    fn try_fire(&self, snapshot: &MetricsSnapshot) -> Option<Alert> {
        if !self.enabled {
            return None;
        }
        let message = (self.condition)(snapshot)?;

        let now = Utc::now();
        {
            let last_fired = self.last_fired.read();
            if let Some(last) = *last_fired {
                if now - last < self.cooldown {
                    return None;
                }
            }
        }
        *self.last_fired.write() = Some(now);

        Some(Alert {
            id: Uuid::new_v4(),
            severity: self.severity,
            title: self.name.clone(),
            message,
            metadata: HashMap::new(),
            resolved: false,
            fired_at: now,
        })
    }
}

/// Default rule table: memory/cpu pressure and error rate, matching the
/// thresholds the health rollup (§4.3) also uses.
pub fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule::new("high_memory", AlertSeverity::Warning, 10, |s| {
            (s.memory_percent > 90.0).then(|| format!("memory at {:.1}%", s.memory_percent))
        }),
        AlertRule::new("high_cpu", AlertSeverity::Warning, 10, |s| {
            (s.cpu_percent > 90.0).then(|| format!("cpu at {:.1}%", s.cpu_percent))
        }),
        AlertRule::new("high_error_rate", AlertSeverity::Critical, 5, |s| {
            (s.errors.rate_per_min > 10.0).then(|| format!("error rate {:.1}/min", s.errors.rate_per_min))
        }),
    ]
}

const ALERTS_RING_CAPACITY: usize = 1000;

/// Holds the rule table and the append-only (bounded) alert history.
pub struct AlertEngine {
    rules: Vec<AlertRule>,
    history: RwLock<std::collections::VecDeque<Alert>>,
}

impl AlertEngine {
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self {
            rules,
            history: RwLock::new(std::collections::VecDeque::with_capacity(ALERTS_RING_CAPACITY)),
        }
    }

    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> Vec<Alert> {
        let fired: Vec<Alert> = self.rules.iter().filter_map(|r| r.try_fire(snapshot)).collect();
        if !fired.is_empty() {
            let mut history = self.history.write();
            for alert in &fired {
                if history.len() == ALERTS_RING_CAPACITY {
                    history.pop_front();
                }
                history.push_back(alert.clone());
            }
        }
        fired
    }

    /// Alerts from the last hour that have not been resolved, used by the
    /// health rollup to decide `critical` vs `warning`.
    pub fn active_alerts(&self) -> Vec<Alert> {
        let cutoff = Utc::now() - ChronoDuration::hours(1);
        self.history
            .read()
            .iter()
            .filter(|a| !a.resolved && a.fired_at > cutoff)
            .cloned()
            .collect()
    }

    pub fn history(&self) -> Vec<Alert> {
        self.history.read().iter().cloned().collect()
    }
}
