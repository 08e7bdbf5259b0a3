use std::time::{Duration, Instant};
use tracing::warn;

/// Threshold past which an operation's duration is logged at warn (spec §4.2).
const SLOW_OPERATION_THRESHOLD: Duration = Duration::from_secs(5);

/// Measures a named operation. Drop it (or call `finish`/`fail`) when the
/// operation completes; durations over the perf threshold are logged at
/// warn automatically.
pub struct OperationTimer {
    name: String,
    started_at: Instant,
    finished: bool,
}

impl OperationTimer {
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started_at: Instant::now(),
            finished: false,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Record successful completion.
    pub fn finish(mut self) -> Duration {
        let elapsed = self.elapsed();
        self.report(elapsed, None);
        self.finished = true;
        elapsed
    }

    /// Record failed completion, attaching the error for the warn log.
    pub fn fail(mut self, error: impl std::fmt::Display) -> Duration {
        let elapsed = self.elapsed();
        self.report(elapsed, Some(error.to_string()));
        self.finished = true;
        elapsed
    }

    fn report(&self, elapsed: Duration, error: Option<String>) {
        if elapsed > SLOW_OPERATION_THRESHOLD {
            warn!(
                operation = %self.name,
                duration_ms = elapsed.as_millis() as u64,
                error = error.as_deref().unwrap_or(""),
                "operation exceeded performance threshold"
            );
        }
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        if !self.finished {
            let elapsed = self.elapsed();
            self.report(elapsed, Some("timer dropped without explicit finish".to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fast_operation_does_not_panic_or_block() {
        let timer = OperationTimer::start("fast-op");
        tokio::time::sleep(Duration::from_millis(5)).await;
        let elapsed = timer.finish();
        assert!(elapsed < SLOW_OPERATION_THRESHOLD);
    }
}
