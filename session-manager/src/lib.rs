//! The orchestrator core (C8, spec §4.8): composes the VCS worktree
//! provider (C5), the container runtime (C6), the security engine (C4),
//! and the proxy registrar (C7) into session create/stop/health/audit/
//! cleanup operations, serialized per container name.

pub mod events;
pub mod locks;
pub mod manager;
pub mod types;

pub use events::{SessionEvent, SessionEventKind};
pub use locks::NameLocks;
pub use manager::{PermissionsProvider, SessionManager, SessionManagerConfig, SECURITY_PROFILE_LABEL};
pub use types::{BulkOutcome, SessionAuditEntry, SessionHealth, SessionInfo};
