use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Log level, mirrors spec §4.2's closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl LogLevel {
    fn emit(self, target: &str, message: &str) {
        match self {
            LogLevel::Debug => tracing::debug!(target: "orchestrator", component = target, "{message}"),
            LogLevel::Info => tracing::info!(target: "orchestrator", component = target, "{message}"),
            LogLevel::Warn => tracing::warn!(target: "orchestrator", component = target, "{message}"),
            LogLevel::Error | LogLevel::Critical => {
                tracing::error!(target: "orchestrator", component = target, "{message}")
            }
        }
    }
}

/// A structured log entry (spec §4.2). Construct with `LogEntry::new`,
/// attach optional context fields, then call `emit` to record it through
/// `tracing` with those fields preserved as structured metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub service: String,
    pub message: String,
    pub user_id: Option<u64>,
    pub session_id: Option<String>,
    pub request_id: Option<String>,
    pub error: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl LogEntry {
    pub fn new(service: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            service: service.into(),
            message: message.into(),
            user_id: None,
            session_id: None,
            request_id: None,
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_user(mut self, user_id: u64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_request(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_error(mut self, error: impl std::fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Emit this entry through `tracing`, including the structured fields
    /// as a JSON blob so they survive whichever `tracing-subscriber`
    /// formatter the binary installs.
    pub fn emit(&self) {
        let fields = serde_json::to_string(self).unwrap_or_default();
        self.level.emit(&self.service, &format!("{} {fields}", self.message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_chain_sets_all_fields() {
        let entry = LogEntry::new("session-manager", LogLevel::Warn, "slow create")
            .with_user(7)
            .with_session("sess-1")
            .with_request("req-1")
            .with_metadata("duration_ms", "5200");

        assert_eq!(entry.user_id, Some(7));
        assert_eq!(entry.session_id.as_deref(), Some("sess-1"));
        assert_eq!(entry.request_id.as_deref(), Some("req-1"));
        assert_eq!(entry.metadata.get("duration_ms").unwrap(), "5200");
    }
}
