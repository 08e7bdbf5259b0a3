//! Session lifecycle events (spec §4.8: "Emit `created` and `started`
//! events"). A broadcast channel so the binary crate can fan them out to
//! whatever external notifier it wires up without `session-manager`
//! knowing about that collaborator.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEventKind {
    Created,
    Started,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub kind: SessionEventKind,
    pub session_id: String,
    pub user_id: u64,
    pub repository_id: u64,
    pub branch: String,
    pub at: DateTime<Utc>,
}

/// Number of events a lagging subscriber may fall behind before it starts
/// missing them. Lifecycle events are a notification stream, not a
/// durable log, so this mirrors `tokio::sync::broadcast`'s usual sizing
/// rather than the spec's data-plane ring capacities.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
