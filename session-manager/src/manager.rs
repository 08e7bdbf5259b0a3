//! The orchestrator core (C8, spec §4.8): composes VCS worktrees (C5),
//! the container runtime (C6), the security engine (C4), and the proxy
//! registrar (C7) into session lifecycle operations, serialized per
//! container name via [`crate::locks::NameLocks`].

use crate::events::{SessionEvent, SessionEventKind, EVENT_CHANNEL_CAPACITY};
use crate::locks::NameLocks;
use crate::types::{BulkOutcome, SessionAuditEntry, SessionHealth, SessionInfo};
use async_trait::async_trait;
use chrono::Utc;
use container_runtime::{
    self, labels as container_labels, ContainerRuntime, ContainerSummary, CreateIdeContainerRequest,
    RuntimeStatus,
};
use error_kernel::{ErrorKind, OrchestratorError};
use monitoring::{ContainerCounts, MetricsSnapshot, SessionMetrics};
use orchestrator_logging::{LogEntry, LogLevel, OperationTimer};
use parking_lot::RwLock;
use proxy_registrar::RouteRegistrar;
use security_engine::{derive_profile, Permissions, ResourceDefaults, SecurityProfile};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use vcs_worktree::WorktreeProvider;

/// Label key the security profile is serialized under at creation time, so
/// later health checks and audits re-validate against the profile actually
/// used to build the container rather than guessing at current
/// permissions (spec §9 open question, resolved this way — see DESIGN.md).
pub const SECURITY_PROFILE_LABEL: &str = container_labels::LABEL_SECURITY_PROFILE;

/// Permission lookups are out of scope for this crate (spec §1 Non-goals:
/// no user/permission store). This seam lets `orchestratord` wire in
/// whatever backing store it has without `session-manager` depending on it.
#[async_trait]
pub trait PermissionsProvider: Send + Sync {
    async fn permissions_for(&self, user_id: u64) -> Result<Permissions, OrchestratorError>;
}

#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// The IDE container image to launch (spec §4.6 `CreateIdeContainerRequest.image`).
    pub image: String,
    /// Per-user concurrent session cap (spec §5: "no more than 3 active
    /// sessions per user").
    pub max_sessions_per_user: u32,
    pub resource_defaults: ResourceDefaults,
    /// Idle cutoff for `cleanupInactiveSessions` (spec §6 `SESSION_TIMEOUT_MINUTES`,
    /// spec §4.8's `now − 1h` default).
    pub session_timeout: Duration,
    /// Shared, read-only extensions directory mounted into every container
    /// (spec §6 `EXTENSIONS_PATH`; §4.6 step 5).
    pub extensions_path: String,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            image: "codercom/code-server:latest".to_string(),
            max_sessions_per_user: 3,
            resource_defaults: ResourceDefaults::default(),
            session_timeout: Duration::from_secs(60 * 60),
            extensions_path: "/srv/extensions".to_string(),
        }
    }
}

pub struct SessionManager {
    config: SessionManagerConfig,
    worktree: Arc<dyn WorktreeProvider>,
    runtime: Arc<dyn ContainerRuntime>,
    registrar: Arc<dyn RouteRegistrar>,
    permissions: Arc<dyn PermissionsProvider>,
    name_locks: NameLocks,
    events: broadcast::Sender<SessionEvent>,
    /// Session count bookkeeping for `SessionMetrics::total` (spec §4.3).
    total_created: RwLock<u64>,
}

impl SessionManager {
    pub fn new(
        config: SessionManagerConfig,
        worktree: Arc<dyn WorktreeProvider>,
        runtime: Arc<dyn ContainerRuntime>,
        registrar: Arc<dyn RouteRegistrar>,
        permissions: Arc<dyn PermissionsProvider>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            worktree,
            runtime,
            registrar,
            permissions,
            name_locks: NameLocks::new(),
            events,
            total_created: RwLock::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, kind: SessionEventKind, summary: &ContainerSummary, branch: &str) {
        if let (Some(user_id), Some(repository_id)) = (summary.user_id(), summary.repository_id()) {
            let _ = self.events.send(SessionEvent {
                kind,
                session_id: summary.id.clone(),
                user_id,
                repository_id,
                branch: branch.to_string(),
                at: Utc::now(),
            });
        }
    }

    fn session_info(summary: &ContainerSummary, url: String) -> Option<SessionInfo> {
        Some(SessionInfo {
            session_id: summary.id.clone(),
            user_id: summary.user_id()?,
            repository_id: summary.repository_id()?,
            branch: summary.branch_name()?.to_string(),
            url,
            status: summary.status.clone(),
            created_at: summary.created_at,
        })
    }

    /// `createSession` (spec §4.8): idempotent by (user, repo, branch) via
    /// the container name it maps to. Concurrent calls for the same
    /// container name are serialized by `NameLocks`; calls for different
    /// names run fully in parallel.
    pub async fn create_session(
        &self,
        user_id: u64,
        repository_id: u64,
        branch: &str,
        repo_url: &str,
    ) -> Result<SessionInfo, OrchestratorError> {
        let timer = OperationTimer::start("session-manager.create_session");
        let name = container_labels::container_name(user_id, repository_id, branch);

        let active = self
            .runtime
            .list_managed_containers()
            .await?
            .into_iter()
            .filter(|c| c.user_id() == Some(user_id) && c.status != RuntimeStatus::Stopped)
            .count() as u32;
        if active >= self.config.max_sessions_per_user {
            let err = OrchestratorError::new(
                ErrorKind::ResourceLimitExceeded,
                format!("user {user_id} already has {active} active sessions (limit {})", self.config.max_sessions_per_user),
            );
            LogEntry::new("session-manager", LogLevel::Warn, "session creation rejected: per-user cap reached")
                .with_user(user_id)
                .with_error(&err)
                .emit();
            timer.fail(&err);
            return Err(err);
        }

        let permissions = self.permissions.permissions_for(user_id).await?;
        let profile = derive_profile(user_id, &permissions, repository_id, &self.config.resource_defaults);

        let result = self
            .name_locks
            .with_lock(&name, || {
                self.create_session_locked(user_id, repository_id, branch, repo_url, &name, profile)
            })
            .await;

        match &result {
            Ok(_) => {
                timer.finish();
            }
            Err(e) => {
                timer.fail(e);
            }
        }
        result
    }

    async fn create_session_locked(
        &self,
        user_id: u64,
        repository_id: u64,
        branch: &str,
        repo_url: &str,
        name: &str,
        profile: SecurityProfile,
    ) -> Result<SessionInfo, OrchestratorError> {
        if let Some(existing) = self.runtime.find_by_selector(user_id, repository_id, branch).await? {
            info!(container = %existing.id, "reusing existing session");
            let url = match self.registrar.route_for_container(&existing.id).await {
                Some(route) => route.url,
                None => self.registrar.prepare_route(&existing.id, user_id, repository_id, branch).0.url,
            };
            return Self::session_info(&existing, url).ok_or_else(|| {
                OrchestratorError::new(ErrorKind::InternalError, "existing container is missing required labels")
            });
        }

        self.worktree.clone_repository(repo_url, repository_id, None).await?;
        self.worktree.create_worktree(repository_id, branch, user_id).await?;
        let worktree_path = self.worktree.worktree_path(repository_id, user_id, branch);

        let (route, mut route_labels) = self.registrar.prepare_route(name, user_id, repository_id, branch);
        route_labels.insert(
            SECURITY_PROFILE_LABEL.to_string(),
            serde_json::to_string(&profile).unwrap_or_default(),
        );

        let request = CreateIdeContainerRequest {
            user_id,
            repository_id,
            branch: branch.to_string(),
            worktree_path: worktree_path.to_string_lossy().to_string(),
            extensions_path: self.config.extensions_path.clone(),
            image: self.config.image.clone(),
            profile,
            extra_labels: route_labels,
        };

        let summary = self.runtime.create_ide_container(request).await?;
        let route = self.registrar.register_route(proxy_registrar::RouteInfo {
            container_id: summary.id.clone(),
            subdomain: route.subdomain,
            url: route.url,
        }).await?;

        *self.total_created.write() += 1;
        self.emit(SessionEventKind::Created, &summary, branch);
        self.emit(SessionEventKind::Started, &summary, branch);

        Self::session_info(&summary, route.url)
            .ok_or_else(|| OrchestratorError::new(ErrorKind::InternalError, "created container is missing required labels"))
    }

    /// `recreateSession` (spec §4.9 recovery path): rebuild a session for
    /// an (user, repo, branch) whose container was just removed. Permission
    /// state is re-fetched since no caller supplies it here.
    pub async fn recreate_session(&self, user_id: u64, repository_id: u64, branch: &str) -> Result<(), OrchestratorError> {
        let path_hint = self.worktree.worktree_path(repository_id, user_id, branch);
        warn!(user_id, repository_id, branch, path = %path_hint.display(), "recreating session after recovery");
        // The VCS provider already has the repository cloned; re-derive the
        // clone URL is out of scope here (§1 Non-goals: no external
        // metadata store), so `recreate_session` only rebuilds the worktree
        // and container against the existing bare repository.
        self.worktree.create_worktree(repository_id, branch, user_id).await?;
        let worktree_path = self.worktree.worktree_path(repository_id, user_id, branch);
        let name = container_labels::container_name(user_id, repository_id, branch);

        let permissions = self.permissions.permissions_for(user_id).await?;
        let profile = derive_profile(user_id, &permissions, repository_id, &self.config.resource_defaults);

        self.name_locks
            .with_lock(&name, || async {
                let (route, mut route_labels) = self.registrar.prepare_route(&name, user_id, repository_id, branch);
                route_labels.insert(SECURITY_PROFILE_LABEL.to_string(), serde_json::to_string(&profile).unwrap_or_default());

                let request = CreateIdeContainerRequest {
                    user_id,
                    repository_id,
                    branch: branch.to_string(),
                    worktree_path: worktree_path.to_string_lossy().to_string(),
                    extensions_path: self.config.extensions_path.clone(),
                    image: self.config.image.clone(),
                    profile,
                    extra_labels: route_labels,
                };
                let summary = self.runtime.create_ide_container(request).await?;
                self.registrar
                    .register_route(proxy_registrar::RouteInfo { container_id: summary.id.clone(), subdomain: route.subdomain, url: route.url })
                    .await?;
                self.emit(SessionEventKind::Created, &summary, branch);
                self.emit(SessionEventKind::Started, &summary, branch);
                Ok(())
            })
            .await
    }

    /// `stopSession` (spec §4.8). Route teardown and worktree removal are
    /// best-effort (logged, not fatal) since the container removal is the
    /// operation callers actually depend on; a dangling route or worktree
    /// is cleaned up by the next `cleanupInactiveSessions` / `cleanup_worktrees` pass.
    pub async fn stop_session(&self, session_id: &str) -> Result<(), OrchestratorError> {
        let summary = self.find_summary(session_id).await?;
        let name = summary.name.clone();
        let branch = summary.branch_name().unwrap_or_default().to_string();

        self.name_locks
            .with_lock(&name, || async {
                if let Err(e) = self.registrar.unregister_route(session_id).await {
                    warn!(session_id, error = %e, "route teardown failed; continuing with container stop");
                }

                self.runtime.stop_container(session_id).await?;
                self.runtime.remove_container(session_id).await?;

                if let (Some(user_id), Some(repository_id)) = (summary.user_id(), summary.repository_id()) {
                    if let Err(e) = self.worktree.remove_worktree(repository_id, &branch, user_id).await {
                        warn!(session_id, error = %e, "worktree removal failed; leaving for later cleanup");
                    }
                }

                self.emit(SessionEventKind::Stopped, &summary, &branch);
                Ok(())
            })
            .await
    }

    async fn find_summary(&self, session_id: &str) -> Result<ContainerSummary, OrchestratorError> {
        self.runtime
            .list_managed_containers()
            .await?
            .into_iter()
            .find(|c| c.id == session_id)
            .ok_or_else(|| OrchestratorError::new(ErrorKind::NotFound, format!("no managed session {session_id}")))
    }

    /// `getUserSessions` (spec §4.8).
    pub async fn get_user_sessions(&self, user_id: u64) -> Result<Vec<SessionInfo>, OrchestratorError> {
        let mut sessions = Vec::new();
        for summary in self.runtime.list_managed_containers().await? {
            if summary.user_id() != Some(user_id) {
                continue;
            }
            let url = self
                .registrar
                .route_for_container(&summary.id)
                .await
                .map(|r| r.url)
                .unwrap_or_default();
            if let Some(info) = Self::session_info(&summary, url) {
                sessions.push(info);
            }
        }
        Ok(sessions)
    }

    /// `performHealthChecks` (spec §4.8): liveness plus, when the creating
    /// profile was persisted as a label, a resource-compliance check.
    pub async fn perform_health_checks(&self) -> Result<Vec<SessionHealth>, OrchestratorError> {
        let mut results = Vec::new();
        for summary in self.runtime.list_managed_containers().await? {
            let healthy = self.runtime.health_check(&summary.id).await.unwrap_or(false);
            let profile = summary
                .labels
                .get(SECURITY_PROFILE_LABEL)
                .and_then(|raw| serde_json::from_str::<SecurityProfile>(raw).ok());

            let (security_compliant, security_violations) = if let Some(profile) = profile {
                match container_runtime::monitor_container_security(self.runtime.as_ref(), &summary.id, &profile).await {
                    Ok(result) => (Some(result.compliant), result.violations),
                    Err(e) => (None, vec![e.to_string()]),
                }
            } else {
                (None, Vec::new())
            };

            let resource_usage = self.runtime.get_container_stats(&summary.id).await.ok();

            results.push(SessionHealth {
                session_id: summary.id,
                healthy,
                resource_usage,
                security_compliant,
                security_violations,
            });
        }
        Ok(results)
    }

    /// `performSecurityAudit` (spec §4.8), aliasing the container-level
    /// audit from `container-runtime` (named differently here to avoid
    /// colliding with this method).
    pub async fn audit_sessions(&self) -> Result<Vec<SessionAuditEntry>, OrchestratorError> {
        let mut results = Vec::new();
        for summary in self.runtime.list_managed_containers().await? {
            let stats = self.runtime.get_container_stats(&summary.id).await.ok();
            let (memory_percent, cpu_percent, network_tx_bytes) = stats
                .as_ref()
                .map(|s| {
                    let memory_percent = if s.memory_limit_bytes > 0 {
                        (s.memory_usage_bytes as f64 / s.memory_limit_bytes as f64) * 100.0
                    } else {
                        0.0
                    };
                    (memory_percent, s.cpu_percent, s.network_tx_bytes)
                })
                .unwrap_or((0.0, 0.0, 0));

            let audit = container_runtime::perform_security_audit(&summary, memory_percent, cpu_percent, network_tx_bytes);

            if let (Some(user_id), Some(repository_id), Some(branch)) =
                (summary.user_id(), summary.repository_id(), summary.branch_name())
            {
                results.push(SessionAuditEntry {
                    session_id: summary.id.clone(),
                    user_id,
                    repository_id,
                    branch: branch.to_string(),
                    audit,
                });
            }
        }
        Ok(results)
    }

    /// `cleanupInactiveSessions` (spec §4.6/§4.8): remove containers idle
    /// past `session_timeout`, tearing down their routes too. Per-container
    /// failures are recorded in the returned `BulkOutcome` rather than
    /// aborting the sweep.
    pub async fn cleanup_inactive_sessions(&self) -> Result<BulkOutcome, OrchestratorError> {
        let mut outcome = BulkOutcome::default();
        let removed = container_runtime::cleanup_inactive_containers(self.runtime.as_ref(), self.config.session_timeout).await?;
        for id in removed {
            if let Err(e) = self.registrar.unregister_route(&id).await {
                outcome.record_failure(&id, e);
                continue;
            }
            outcome.record_success(id);
        }
        Ok(outcome)
    }

    /// Graceful shutdown (SPEC_FULL ambient addition): stop every managed
    /// session, continuing past individual failures so one stuck container
    /// cannot block process exit.
    pub async fn shutdown(&self) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        let sessions = match self.runtime.list_managed_containers().await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "shutdown could not list managed containers");
                return outcome;
            }
        };
        for summary in sessions {
            match self.stop_session(&summary.id).await {
                Ok(()) => outcome.record_success(summary.id),
                Err(e) => outcome.record_failure(&summary.id, e),
            }
        }
        outcome
    }
}

/// Feeds `Monitor` (C3) the live container/session counts it needs for a
/// tick's `MetricsSnapshot` (spec §4.3).
#[async_trait]
impl monitoring::MetricsSource for SessionManager {
    async fn collect(&self) -> MetricsSnapshot {
        let mut snapshot = MetricsSnapshot::empty();
        let containers = match self.runtime.list_managed_containers().await {
            Ok(containers) => containers,
            Err(e) => {
                warn!(error = %e, "metrics collection could not list managed containers");
                return snapshot;
            }
        };

        let mut counts = ContainerCounts::default();
        for c in &containers {
            counts.total += 1;
            match c.status {
                RuntimeStatus::Running | RuntimeStatus::Starting => counts.running += 1,
                RuntimeStatus::Stopped => counts.stopped += 1,
                RuntimeStatus::Error => counts.failed += 1,
            }
        }
        snapshot.containers = counts;
        snapshot.sessions = SessionMetrics {
            active: snapshot.containers.running,
            total: *self.total_created.read(),
            avg_duration_secs: 0.0,
        };
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use container_runtime::{FakeContainerRuntime, RuntimeLimits};
    use proxy_registrar::{InMemoryRouteRegistrar, ProxyConfig};
    use std::collections::HashSet;
    use vcs_worktree::FakeWorktreeProvider;

    struct AllowAllPermissions;

    #[async_trait]
    impl PermissionsProvider for AllowAllPermissions {
        async fn permissions_for(&self, _user_id: u64) -> Result<Permissions, OrchestratorError> {
            Ok(Permissions {
                can_create_branches: true,
                branch_limit: 5,
                allowed_base_branches: HashSet::from(["main".to_string()]),
                allow_terminal_access: true,
            })
        }
    }

    fn manager() -> SessionManager {
        SessionManager::new(
            SessionManagerConfig::default(),
            Arc::new(FakeWorktreeProvider::new("/tmp/session-manager-tests")),
            Arc::new(FakeContainerRuntime::new(RuntimeLimits::default())),
            Arc::new(InMemoryRouteRegistrar::new(ProxyConfig::default())),
            Arc::new(AllowAllPermissions),
        )
    }

    #[tokio::test]
    async fn create_session_returns_a_routable_session() {
        let manager = manager();
        let info = manager
            .create_session(1, 1, "main", "git@example.com:org/repo.git")
            .await
            .expect("create_session should succeed against fakes");

        assert_eq!(info.user_id, 1);
        assert_eq!(info.repository_id, 1);
        assert_eq!(info.branch, "main");
        assert!(info.url.contains("ide-u1-r1-main"));
    }

    #[tokio::test]
    async fn create_session_is_idempotent_for_the_same_selector() {
        let manager = manager();
        let first = manager.create_session(2, 3, "feature", "git@example.com:org/repo.git").await.unwrap();
        let second = manager.create_session(2, 3, "feature", "git@example.com:org/repo.git").await.unwrap();
        assert_eq!(first.session_id, second.session_id);
    }

    #[tokio::test]
    async fn create_session_rejects_past_the_per_user_cap() {
        let manager = manager();
        for i in 0..3 {
            manager
                .create_session(9, i, "main", "git@example.com:org/repo.git")
                .await
                .expect("first three sessions should succeed");
        }
        let err = manager
            .create_session(9, 99, "main", "git@example.com:org/repo.git")
            .await
            .expect_err("fourth concurrent session for the same user should be rejected");
        assert_eq!(err.kind, ErrorKind::ResourceLimitExceeded);
    }

    #[tokio::test]
    async fn stop_session_removes_the_route() {
        let manager = manager();
        let info = manager.create_session(5, 5, "main", "git@example.com:org/repo.git").await.unwrap();
        manager.stop_session(&info.session_id).await.unwrap();

        let routes = manager.registrar.registered_routes().await;
        assert!(routes.iter().all(|r| r.container_id != info.session_id));
    }

    #[tokio::test]
    async fn create_session_emits_created_and_started_events() {
        let manager = manager();
        let mut rx = manager.subscribe();
        manager.create_session(7, 7, "main", "git@example.com:org/repo.git").await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.kind, SessionEventKind::Created);
        assert_eq!(second.kind, SessionEventKind::Started);
    }
}
