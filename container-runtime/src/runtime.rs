//! The `ContainerRuntime` trait and its `bollard`-backed implementation
//! (C6, spec §4.6). A trait seam so `session-manager` can be unit-tested
//! against an in-memory fake without a live Docker daemon (SPEC_FULL's
//! "in-process test doubles" addition).

use crate::labels::{self, REQUIRED_LABELS};
use crate::mounts::build_workspace_mounts;
use crate::networks::ISOLATED_NETWORK_NAME;
use crate::stats::{derive_stats, ContainerStats};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StartContainerOptions, Stats as DockerStats, StatsOptions,
    StopContainerOptions,
};
use bollard::models::{HostConfig, RestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;
use chrono::{DateTime, Utc};
use error_kernel::{ErrorKind, OrchestratorError};
use futures_util::StreamExt;
use parking_lot::RwLock;
use security_engine::{derive_container_security, parse_size_bytes, SecurityProfile};
use std::collections::HashMap;
use tokio::time::{sleep, Duration, Instant};
use tracing::{info, warn};

/// Everything `create_ide_container` needs, already resolved by the caller
/// (session-manager): the security profile, the extra labels the proxy
/// registrar wants baked in at creation time (spec §9 open question (a) —
/// labels are the single authoritative route path, applied here rather
/// than mutated post-creation since Docker containers' labels are
/// immutable after `create`), and the filesystem paths to mount.
#[derive(Debug, Clone)]
pub struct CreateIdeContainerRequest {
    pub user_id: u64,
    pub repository_id: u64,
    pub branch: String,
    pub worktree_path: String,
    pub extensions_path: String,
    pub image: String,
    pub profile: SecurityProfile,
    pub extra_labels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeStatus {
    Running,
    Stopped,
    Starting,
    Error,
}

#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub status: RuntimeStatus,
    pub labels: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

impl ContainerSummary {
    pub fn user_id(&self) -> Option<u64> {
        self.labels.get(labels::LABEL_USER_ID).and_then(|v| v.parse().ok())
    }

    pub fn repository_id(&self) -> Option<u64> {
        self.labels.get(labels::LABEL_REPOSITORY_ID).and_then(|v| v.parse().ok())
    }

    pub fn branch_name(&self) -> Option<&str> {
        self.labels.get(labels::LABEL_BRANCH_NAME).map(|s| s.as_str())
    }

    /// Every required label is present (spec §8 invariant).
    pub fn carries_required_labels(&self) -> bool {
        REQUIRED_LABELS.iter().all(|key| self.labels.contains_key(*key))
    }
}

/// The runtime adapter surface (spec §4.6). Implemented once over
/// `bollard`; an in-memory `FakeContainerRuntime` backs unit tests.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create_ide_container(
        &self,
        request: CreateIdeContainerRequest,
    ) -> Result<ContainerSummary, OrchestratorError>;

    async fn stop_container(&self, container_id: &str) -> Result<(), OrchestratorError>;

    /// Used by the recovery service's `restart` strategy (spec §4.9).
    async fn restart_container(&self, container_id: &str) -> Result<(), OrchestratorError>;

    async fn remove_container(&self, container_id: &str) -> Result<(), OrchestratorError>;

    async fn list_managed_containers(&self) -> Result<Vec<ContainerSummary>, OrchestratorError>;

    async fn running_count(&self) -> Result<u64, OrchestratorError> {
        Ok(self
            .list_managed_containers()
            .await?
            .iter()
            .filter(|c| c.status == RuntimeStatus::Running)
            .count() as u64)
    }

    async fn find_by_selector(
        &self,
        user_id: u64,
        repository_id: u64,
        branch: &str,
    ) -> Result<Option<ContainerSummary>, OrchestratorError> {
        Ok(self
            .list_managed_containers()
            .await?
            .into_iter()
            .find(|c| c.user_id() == Some(user_id) && c.repository_id() == Some(repository_id) && c.branch_name() == Some(branch)))
    }

    async fn get_container_stats(&self, container_id: &str) -> Result<ContainerStats, OrchestratorError>;

    async fn health_check(&self, container_id: &str) -> Result<bool, OrchestratorError>;

    async fn touch_last_accessed(&self, container_id: &str) -> Result<(), OrchestratorError>;
}

/// `MAX_CONTAINERS` and friends (spec §6), owned by the caller rather than
/// the adapter so one process can host more than one configuration in
/// tests.
#[derive(Debug, Clone)]
pub struct RuntimeLimits {
    pub max_containers: u64,
    pub container_ready_timeout: Duration,
    pub graceful_stop_timeout_secs: i64,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            max_containers: 50,
            container_ready_timeout: Duration::from_secs(30),
            graceful_stop_timeout_secs: 10,
        }
    }
}

pub struct BollardContainerRuntime {
    docker: Docker,
    limits: RuntimeLimits,
}

impl BollardContainerRuntime {
    pub fn new(docker: Docker, limits: RuntimeLimits) -> Self {
        Self { docker, limits }
    }

    async fn list_containers_raw(
        &self,
        all: bool,
    ) -> Result<Vec<bollard::models::ContainerSummary>, OrchestratorError> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{}=true", labels::LABEL_MANAGED)]);
        self.docker
            .list_containers(Some(ListContainersOptions { all, filters, ..Default::default() }))
            .await
            .map_err(|e| OrchestratorError::wrap(ErrorKind::DockerConnectionFailed, e))
    }

    fn summarize(raw: &bollard::models::ContainerSummary) -> ContainerSummary {
        let labels = raw.labels.clone().unwrap_or_default();
        let status = match raw.state.as_deref() {
            Some("running") => RuntimeStatus::Running,
            Some("created") | Some("restarting") => RuntimeStatus::Starting,
            Some("exited") | Some("dead") | Some("removing") | Some("paused") => RuntimeStatus::Stopped,
            _ => RuntimeStatus::Error,
        };
        let created_at = labels
            .get(labels::LABEL_CREATED)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let last_accessed_at = labels
            .get(labels::LABEL_LAST_ACCESSED)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or(created_at);

        ContainerSummary {
            id: raw.id.clone().unwrap_or_default(),
            name: raw
                .names
                .clone()
                .unwrap_or_default()
                .first()
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            status,
            labels,
            created_at,
            last_accessed_at,
        }
    }

    async fn wait_until_running(&self, container_id: &str) -> Result<(), OrchestratorError> {
        let deadline = Instant::now() + self.limits.container_ready_timeout;
        loop {
            let inspect = self
                .docker
                .inspect_container(container_id, None::<InspectContainerOptions>)
                .await
                .map_err(|e| OrchestratorError::wrap(ErrorKind::ContainerStartFailed, e))?;
            if inspect.state.and_then(|s| s.running).unwrap_or(false) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(OrchestratorError::new(
                    ErrorKind::ContainerStartFailed,
                    format!("container {container_id} did not reach running state within timeout"),
                ));
            }
            sleep(Duration::from_secs(1)).await;
        }
    }
}

#[async_trait]
impl ContainerRuntime for BollardContainerRuntime {
    async fn create_ide_container(
        &self,
        request: CreateIdeContainerRequest,
    ) -> Result<ContainerSummary, OrchestratorError> {
        let name = labels::container_name(request.user_id, request.repository_id, &request.branch);

        if let Ok(existing) = self
            .docker
            .inspect_container(&name, None::<InspectContainerOptions>)
            .await
        {
            info!(container = %name, "container already exists, returning it");
            let id = existing.id.unwrap_or(name.clone());
            return self.list_managed_containers().await?.into_iter().find(|c| c.id == id).ok_or_else(|| {
                OrchestratorError::new(ErrorKind::InternalError, "container exists but is not managed-labelled")
            });
        }

        let running = self.running_count().await?;
        if running >= self.limits.max_containers {
            return Err(OrchestratorError::new(
                ErrorKind::ContainerLimitExceeded,
                format!("running container count {running} has reached the limit of {}", self.limits.max_containers),
            ));
        }

        let mounts = build_workspace_mounts(&request.worktree_path, &request.extensions_path, &request.profile)?;
        let security = derive_container_security(&request.profile);

        let mut env = vec![
            "PASSWORD=".to_string(),
            "DISABLE_TELEMETRY=true".to_string(),
            "DOCKER_UPDATE_CHECK=false".to_string(),
            "DISABLE_GETTING_STARTED_OVERRIDE=true".to_string(),
        ];
        if request.profile.terminal.enabled {
            env.push(format!("SHELL_TIMEOUT={}", request.profile.terminal.shell_timeout_secs));
        } else {
            env.push("DISABLE_TERMINAL=true".to_string());
        }

        let now = Utc::now().to_rfc3339();
        let mut container_labels = HashMap::new();
        container_labels.insert(labels::LABEL_MANAGED.to_string(), "true".to_string());
        container_labels.insert(labels::LABEL_USER_ID.to_string(), request.user_id.to_string());
        container_labels.insert(labels::LABEL_REPOSITORY_ID.to_string(), request.repository_id.to_string());
        container_labels.insert(labels::LABEL_BRANCH_NAME.to_string(), request.branch.clone());
        container_labels.insert(labels::LABEL_CREATED.to_string(), now.clone());
        container_labels.insert(labels::LABEL_LAST_ACCESSED.to_string(), now);
        container_labels.insert(labels::LABEL_SECURITY_PROFILE.to_string(), "enabled".to_string());
        container_labels.extend(request.extra_labels.clone());

        let memory_bytes = parse_size_bytes(&request.profile.resource_limits.memory);
        let cpu_quota = (request.profile.resource_limits.cpu * 100_000.0).floor() as i64;

        let ulimits: Vec<bollard::models::ResourcesUlimits> = security
            .ulimits
            .iter()
            .map(|u| bollard::models::ResourcesUlimits {
                name: Some(u.name.to_string()),
                soft: Some(u.soft),
                hard: Some(u.hard),
            })
            .collect();

        let tmpfs: HashMap<String, String> = security
            .tmpfs
            .iter()
            .map(|t| (t.target.clone(), format!("{},size={}", t.options, t.size_bytes)))
            .collect();

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert("8080/tcp".to_string(), HashMap::new());

        let host_config = HostConfig {
            memory: memory_bytes.map(|b| b as i64),
            cpu_quota: Some(cpu_quota),
            cpu_period: Some(100_000),
            security_opt: Some(security.security_opt.clone()),
            cap_drop: Some(security.cap_drop.clone()),
            cap_add: Some(security.cap_add.clone()),
            readonly_rootfs: Some(security.read_only_rootfs),
            tmpfs: Some(tmpfs),
            ulimits: Some(ulimits),
            dns: Some(security.dns.clone()),
            mounts: Some(mounts),
            privileged: Some(false),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                maximum_retry_count: None,
            }),
            network_mode: Some(ISOLATED_NETWORK_NAME.to_string()),
            publish_all_ports: Some(false),
            ..Default::default()
        };

        let config = Config {
            image: Some(request.image.clone()),
            env: Some(env),
            labels: Some(container_labels),
            working_dir: Some("/home/coder/workspace".to_string()),
            user: Some("coder:coder".to_string()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        self.docker
            .create_container(Some(CreateContainerOptions { name: name.clone(), platform: None }), config)
            .await
            .map_err(|e| OrchestratorError::wrap(ErrorKind::ContainerCreationFailed, e))?;

        self.docker
            .start_container(&name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| OrchestratorError::wrap(ErrorKind::ContainerStartFailed, e))?;

        self.wait_until_running(&name).await?;

        info!(container = %name, user_id = request.user_id, repository_id = request.repository_id, "ide container started");

        let raw = self
            .docker
            .inspect_container(&name, None::<InspectContainerOptions>)
            .await
            .map_err(|e| OrchestratorError::wrap(ErrorKind::ContainerStartFailed, e))?;

        Ok(ContainerSummary {
            id: raw.id.unwrap_or(name.clone()),
            name,
            status: RuntimeStatus::Running,
            labels: raw
                .config
                .and_then(|c| c.labels)
                .unwrap_or_default(),
            created_at: Utc::now(),
            last_accessed_at: Utc::now(),
        })
    }

    async fn stop_container(&self, container_id: &str) -> Result<(), OrchestratorError> {
        let inspect = match self.docker.inspect_container(container_id, None::<InspectContainerOptions>).await {
            Ok(i) => i,
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => return Ok(()),
            Err(e) => return Err(OrchestratorError::wrap(ErrorKind::ContainerStopFailed, e)),
        };
        if inspect.state.and_then(|s| s.running).unwrap_or(false) {
            self.docker
                .stop_container(
                    container_id,
                    Some(StopContainerOptions { t: self.limits.graceful_stop_timeout_secs }),
                )
                .await
                .map_err(|e| OrchestratorError::wrap(ErrorKind::ContainerStopFailed, e))?;
        }
        Ok(())
    }

    async fn restart_container(&self, container_id: &str) -> Result<(), OrchestratorError> {
        self.docker
            .restart_container(container_id, Some(bollard::container::RestartContainerOptions {
                t: self.limits.graceful_stop_timeout_secs,
            }))
            .await
            .map_err(|e| OrchestratorError::wrap(ErrorKind::ContainerStartFailed, e))?;
        self.wait_until_running(container_id).await
    }

    async fn remove_container(&self, container_id: &str) -> Result<(), OrchestratorError> {
        if let Err(e) = self.stop_container(container_id).await {
            warn!(container = container_id, error = %e, "best-effort stop before removal failed");
        }
        match self
            .docker
            .remove_container(container_id, Some(RemoveContainerOptions { force: true, ..Default::default() }))
            .await
        {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(e) => Err(OrchestratorError::wrap(ErrorKind::ContainerStopFailed, e)),
        }
    }

    async fn list_managed_containers(&self) -> Result<Vec<ContainerSummary>, OrchestratorError> {
        Ok(self.list_containers_raw(true).await?.iter().map(Self::summarize).collect())
    }

    async fn get_container_stats(&self, container_id: &str) -> Result<ContainerStats, OrchestratorError> {
        let mut stream = self
            .docker
            .stats(container_id, Some(StatsOptions { stream: false, one_shot: true }));
        let stats: DockerStats = stream
            .next()
            .await
            .ok_or_else(|| OrchestratorError::new(ErrorKind::NotFound, format!("no stats for {container_id}")))?
            .map_err(|e| OrchestratorError::wrap(ErrorKind::DockerConnectionFailed, e))?;
        Ok(derive_stats(&stats))
    }

    async fn health_check(&self, container_id: &str) -> Result<bool, OrchestratorError> {
        let inspect = self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| OrchestratorError::wrap(ErrorKind::DockerConnectionFailed, e))?;
        let state = inspect.state.unwrap_or_default();
        let running = state.running.unwrap_or(false);
        let unhealthy = state
            .health
            .and_then(|h| h.status)
            .map(|s| s == bollard::models::HealthStatusEnum::UNHEALTHY)
            .unwrap_or(false);
        Ok(running && !unhealthy)
    }

    async fn touch_last_accessed(&self, _container_id: &str) -> Result<(), OrchestratorError> {
        // Docker labels are immutable post-creation; `last-accessed` is
        // tracked by the caller (session-manager) and re-derived on each
        // cleanup pass rather than mutated here. See DESIGN.md.
        Ok(())
    }
}

/// In-memory fake used by `#[cfg(test)]` code across the workspace
/// (session-manager, recovery-service) to exercise orchestration logic
/// without a Docker daemon.
pub struct FakeContainerRuntime {
    containers: RwLock<HashMap<String, ContainerSummary>>,
    limits: RuntimeLimits,
    next_id: RwLock<u64>,
}

impl FakeContainerRuntime {
    pub fn new(limits: RuntimeLimits) -> Self {
        Self { containers: RwLock::new(HashMap::new()), limits, next_id: RwLock::new(1) }
    }

    pub fn insert_running(&self, summary: ContainerSummary) {
        self.containers.write().insert(summary.id.clone(), summary);
    }
}

#[async_trait]
impl ContainerRuntime for FakeContainerRuntime {
    async fn create_ide_container(
        &self,
        request: CreateIdeContainerRequest,
    ) -> Result<ContainerSummary, OrchestratorError> {
        let name = labels::container_name(request.user_id, request.repository_id, &request.branch);

        if let Some(existing) = self.containers.read().values().find(|c| c.name == name).cloned() {
            return Ok(existing);
        }

        let running = self.running_count().await?;
        if running >= self.limits.max_containers {
            return Err(OrchestratorError::new(
                ErrorKind::ContainerLimitExceeded,
                format!("running container count {running} has reached the limit of {}", self.limits.max_containers),
            ));
        }

        let _mounts = build_workspace_mounts(&request.worktree_path, &request.extensions_path, &request.profile)?;

        let id = {
            let mut next_id = self.next_id.write();
            let id = format!("fake-container-{next_id}");
            *next_id += 1;
            id
        };

        let now = Utc::now();
        let mut container_labels = HashMap::new();
        container_labels.insert(labels::LABEL_MANAGED.to_string(), "true".to_string());
        container_labels.insert(labels::LABEL_USER_ID.to_string(), request.user_id.to_string());
        container_labels.insert(labels::LABEL_REPOSITORY_ID.to_string(), request.repository_id.to_string());
        container_labels.insert(labels::LABEL_BRANCH_NAME.to_string(), request.branch.clone());
        container_labels.insert(labels::LABEL_CREATED.to_string(), now.to_rfc3339());
        container_labels.insert(labels::LABEL_LAST_ACCESSED.to_string(), now.to_rfc3339());
        container_labels.insert(labels::LABEL_SECURITY_PROFILE.to_string(), "enabled".to_string());
        container_labels.extend(request.extra_labels.clone());

        let summary = ContainerSummary {
            id: id.clone(),
            name,
            status: RuntimeStatus::Running,
            labels: container_labels,
            created_at: now,
            last_accessed_at: now,
        };
        self.containers.write().insert(id, summary.clone());
        Ok(summary)
    }

    async fn stop_container(&self, container_id: &str) -> Result<(), OrchestratorError> {
        if let Some(c) = self.containers.write().get_mut(container_id) {
            c.status = RuntimeStatus::Stopped;
        }
        Ok(())
    }

    async fn restart_container(&self, container_id: &str) -> Result<(), OrchestratorError> {
        if let Some(c) = self.containers.write().get_mut(container_id) {
            c.status = RuntimeStatus::Running;
            Ok(())
        } else {
            Err(OrchestratorError::new(ErrorKind::NotFound, format!("container {container_id} not found")))
        }
    }

    async fn remove_container(&self, container_id: &str) -> Result<(), OrchestratorError> {
        self.containers.write().remove(container_id);
        Ok(())
    }

    async fn list_managed_containers(&self) -> Result<Vec<ContainerSummary>, OrchestratorError> {
        Ok(self.containers.read().values().cloned().collect())
    }

    async fn get_container_stats(&self, container_id: &str) -> Result<ContainerStats, OrchestratorError> {
        if !self.containers.read().contains_key(container_id) {
            return Err(OrchestratorError::new(ErrorKind::NotFound, format!("container {container_id} not found")));
        }
        Ok(ContainerStats {
            cpu_percent: 0.0,
            memory_usage_bytes: 0,
            memory_limit_bytes: 0,
            network_rx_bytes: 0,
            network_tx_bytes: 0,
        })
    }

    async fn health_check(&self, container_id: &str) -> Result<bool, OrchestratorError> {
        Ok(self
            .containers
            .read()
            .get(container_id)
            .map(|c| c.status == RuntimeStatus::Running)
            .unwrap_or(false))
    }

    async fn touch_last_accessed(&self, container_id: &str) -> Result<(), OrchestratorError> {
        if let Some(c) = self.containers.write().get_mut(container_id) {
            c.last_accessed_at = Utc::now();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use security_engine::{derive_profile, Permissions, ResourceDefaults};
    use std::collections::HashSet;

    fn profile() -> SecurityProfile {
        let permissions = Permissions {
            can_create_branches: true,
            branch_limit: 5,
            allowed_base_branches: HashSet::new(),
            allow_terminal_access: true,
        };
        derive_profile(1, &permissions, 1, &ResourceDefaults::default())
    }

    fn request(user_id: u64, repository_id: u64, branch: &str) -> CreateIdeContainerRequest {
        CreateIdeContainerRequest {
            user_id,
            repository_id,
            branch: branch.to_string(),
            worktree_path: "/srv/git/worktrees/repo_1/user_1/main".to_string(),
            extensions_path: "/srv/extensions".to_string(),
            image: "codercom/code-server:latest".to_string(),
            profile: profile(),
            extra_labels: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn create_is_idempotent_for_the_same_selector() {
        let runtime = FakeContainerRuntime::new(RuntimeLimits::default());
        let first = runtime.create_ide_container(request(1, 1, "main")).await.unwrap();
        let second = runtime.create_ide_container(request(1, 1, "main")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(runtime.list_managed_containers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejects_creation_past_the_container_limit() {
        let runtime = FakeContainerRuntime::new(RuntimeLimits { max_containers: 1, ..Default::default() });
        runtime.create_ide_container(request(1, 1, "main")).await.unwrap();
        let result = runtime.create_ide_container(request(2, 1, "develop")).await;
        assert!(matches!(result, Err(e) if e.kind == ErrorKind::ContainerLimitExceeded));
    }

    #[tokio::test]
    async fn created_container_carries_required_labels() {
        let runtime = FakeContainerRuntime::new(RuntimeLimits::default());
        let summary = runtime.create_ide_container(request(1, 1, "main")).await.unwrap();
        assert!(summary.carries_required_labels());
    }

    #[tokio::test]
    async fn find_by_selector_locates_the_matching_container() {
        let runtime = FakeContainerRuntime::new(RuntimeLimits::default());
        runtime.create_ide_container(request(3, 4, "develop")).await.unwrap();
        let found = runtime.find_by_selector(3, 4, "develop").await.unwrap();
        assert!(found.is_some());
        assert!(runtime.find_by_selector(3, 4, "main").await.unwrap().is_none());
    }
}
