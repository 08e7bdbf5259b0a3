//! Logger & timer (C2).
//!
//! A thin layer over `tracing` that gives callers a queryable structured
//! log entry shape (spec §4.2) and per-operation timers with a perf
//! threshold, rather than hand-rolling a logging backend.

pub mod entry;
pub mod timer;

pub use entry::{LogEntry, LogLevel};
pub use timer::OperationTimer;

/// Install the global `tracing` subscriber. Call once at process startup.
/// Honors `RUST_LOG` via `EnvFilter`, defaulting to `info`.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}
