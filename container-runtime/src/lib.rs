//! Container runtime adapter (C6): creates/starts/stops/removes IDE
//! containers over `bollard`, applies the security profile derived by C4,
//! and exposes stats/health/audit for the control loops in C3/C8 (spec
//! §4.6).

pub mod labels;
pub mod mounts;
pub mod networks;
pub mod runtime;
pub mod security_audit;
pub mod stats;

pub use mounts::{build_workspace_mounts, MountRequest};
pub use networks::{ensure_isolated_network, ensure_main_network, ISOLATED_NETWORK_NAME};
pub use runtime::{
    BollardContainerRuntime, ContainerRuntime, ContainerSummary, CreateIdeContainerRequest,
    FakeContainerRuntime, RuntimeLimits, RuntimeStatus,
};
pub use security_audit::{
    cleanup_inactive_containers, monitor_container_security, perform_security_audit,
    ContainerAuditReport, RiskLevel, SecurityMonitorResult,
};
pub use stats::{derive_stats, ContainerStats};
