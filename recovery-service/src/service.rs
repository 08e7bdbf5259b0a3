//! The recovery service (C9, spec §4.9, §5): matches failures against the
//! priority-sorted rule table, opens a `RecoveryAction`, and drives it
//! through its state machine either immediately or on the next processor
//! tick. At most 3 actions execute concurrently.

use crate::action::{RecoveryAction, RecoveryStatus, RecoveryTarget};
use crate::rules::{match_rule, RecoveryRule, RecoveryStrategy};
use crate::strategies::{execute_strategy, SessionRecreator};
use container_runtime::ContainerRuntime;
use error_kernel::{ErrorKind, OrchestratorError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Hook for "record via C3" (spec §4.9): the recovery service reports
/// every failure it handles to monitoring without depending on its
/// internal ring buffer layout.
pub trait FailureRecorder: Send + Sync {
    fn record_failure(&self, kind: ErrorKind);
}

pub struct NoopFailureRecorder;

impl FailureRecorder for NoopFailureRecorder {
    fn record_failure(&self, _kind: ErrorKind) {}
}

/// Container failures execute immediately at this priority or above (spec
/// §4.9).
const CONTAINER_IMMEDIATE_PRIORITY: u8 = 7;
/// Session failures execute immediately at this priority or above.
const SESSION_IMMEDIATE_PRIORITY: u8 = 8;
/// Recovery concurrency cap (spec §5).
const MAX_CONCURRENT_RECOVERIES: usize = 3;
/// Processor tick interval (spec §5).
pub const PROCESSOR_TICK: Duration = Duration::from_secs(30);

pub struct RecoveryService {
    rules: Vec<RecoveryRule>,
    actions: RwLock<HashMap<Uuid, RecoveryAction>>,
    runtime: Arc<dyn ContainerRuntime>,
    recreator: Arc<dyn SessionRecreator>,
    recorder: Arc<dyn FailureRecorder>,
    semaphore: Arc<Semaphore>,
}

impl RecoveryService {
    pub fn new(
        rules: Vec<RecoveryRule>,
        runtime: Arc<dyn ContainerRuntime>,
        recreator: Arc<dyn SessionRecreator>,
        recorder: Arc<dyn FailureRecorder>,
    ) -> Self {
        Self {
            rules,
            actions: RwLock::new(HashMap::new()),
            runtime,
            recreator,
            recorder,
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_RECOVERIES)),
        }
    }

    pub fn with_default_rules(
        runtime: Arc<dyn ContainerRuntime>,
        recreator: Arc<dyn SessionRecreator>,
        recorder: Arc<dyn FailureRecorder>,
    ) -> Self {
        Self::new(crate::rules::default_rules(), runtime, recreator, recorder)
    }

    fn open_action(&self, target: RecoveryTarget, kind: ErrorKind) -> Option<Uuid> {
        self.recorder.record_failure(kind);
        let rule = match_rule(&self.rules, kind)?;
        let action = RecoveryAction::pending(target, kind, rule.strategy, rule.max_attempts);
        let id = action.id;
        self.actions.write().insert(id, action);
        Some(id)
    }

    /// spec §4.9 `handleContainerFailure`.
    pub async fn handle_container_failure(&self, container_id: &str, kind: ErrorKind) -> Option<Uuid> {
        let rule = match_rule(&self.rules, kind)?;
        let id = self.open_action(RecoveryTarget::Container(container_id.to_string()), kind)?;
        if rule.priority >= CONTAINER_IMMEDIATE_PRIORITY {
            if let Err(e) = self.execute_recovery_action(id).await {
                warn!(action = %id, error = %e, "immediate container recovery attempt failed, will retry on next tick");
            }
        }
        Some(id)
    }

    /// spec §4.9 `handleSessionFailure`.
    pub async fn handle_session_failure(
        &self,
        user_id: u64,
        repository_id: u64,
        branch: &str,
        kind: ErrorKind,
    ) -> Option<Uuid> {
        let rule = match_rule(&self.rules, kind)?;
        let target = RecoveryTarget::Session { user_id, repository_id, branch: branch.to_string() };
        let id = self.open_action(target, kind)?;
        if rule.priority >= SESSION_IMMEDIATE_PRIORITY {
            if let Err(e) = self.execute_recovery_action(id).await {
                warn!(action = %id, error = %e, "immediate session recovery attempt failed, will retry on next tick");
            }
        }
        Some(id)
    }

    /// spec §4.9 `executeRecoveryAction`: in_progress -> strategy ->
    /// completed/failed/back-to-pending.
    pub async fn execute_recovery_action(&self, id: Uuid) -> Result<(), OrchestratorError> {
        let (strategy, target) = {
            let mut actions = self.actions.write();
            let action = actions
                .get_mut(&id)
                .ok_or_else(|| OrchestratorError::new(ErrorKind::NotFound, format!("recovery action {id} not found")))?;
            action.status = RecoveryStatus::InProgress;
            action.attempts += 1;
            (action.strategy, action.target.clone())
        };

        let result = execute_strategy(strategy, &target, self.runtime.as_ref(), self.recreator.as_ref()).await;

        let mut actions = self.actions.write();
        let action = actions.get_mut(&id).expect("action present, only this method removes entries and it doesn't");

        match result {
            Ok(()) => {
                action.status = RecoveryStatus::Completed;
                action.completed_at = Some(chrono::Utc::now());
                info!(action = %id, strategy = ?action.strategy, "recovery action completed");
                Ok(())
            }
            Err(e) => {
                if strategy == RecoveryStrategy::Manual || action.is_exhausted() {
                    action.status = RecoveryStatus::Failed;
                    error!(action = %id, strategy = ?action.strategy, attempts = action.attempts, "recovery action failed, attempts exhausted");
                } else {
                    action.status = RecoveryStatus::Pending;
                    info!(action = %id, attempts = action.attempts, max_attempts = action.max_attempts, "recovery attempt failed, will retry next tick");
                }
                Err(e)
            }
        }
    }

    /// One processor tick (spec §5): run every pending action, at most 3
    /// concurrently.
    pub async fn run_processor_tick(&self) {
        let pending: Vec<Uuid> = self
            .actions
            .read()
            .values()
            .filter(|a| a.status == RecoveryStatus::Pending)
            .map(|a| a.id)
            .collect();

        let mut handles = Vec::with_capacity(pending.len());
        for id in pending {
            let semaphore = self.semaphore.clone();
            let permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
            // `execute_recovery_action` borrows `self`; run inline rather than
            // spawning onto a fresh task so the borrow stays valid. The
            // semaphore still bounds how many run at once within this loop.
            handles.push(async move {
                let _permit = permit;
                let _ = self.execute_recovery_action(id).await;
            });
        }
        futures_util::future::join_all(handles).await;
    }

    /// Runs `run_processor_tick` on a fixed interval until cancelled.
    pub async fn run_forever(self: Arc<Self>) {
        loop {
            sleep(PROCESSOR_TICK).await;
            self.run_processor_tick().await;
        }
    }

    pub fn action(&self, id: Uuid) -> Option<RecoveryAction> {
        self.actions.read().get(&id).cloned()
    }

    pub fn actions_snapshot(&self) -> Vec<RecoveryAction> {
        self.actions.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use container_runtime::{ContainerSummary, CreateIdeContainerRequest, FakeContainerRuntime, RuntimeLimits, RuntimeStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRecreator {
        calls: AtomicUsize,
    }

    impl CountingRecreator {
        fn new() -> Self {
            Self { calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl SessionRecreator for CountingRecreator {
        async fn recreate_session(&self, _user_id: u64, _repository_id: u64, _branch: &str) -> Result<(), OrchestratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct CountingRecorder {
        calls: AtomicUsize,
    }

    impl FailureRecorder for CountingRecorder {
        fn record_failure(&self, _kind: ErrorKind) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn service() -> (Arc<RecoveryService>, Arc<FakeContainerRuntime>, Arc<CountingRecreator>) {
        let runtime = Arc::new(FakeContainerRuntime::new(RuntimeLimits::default()));
        let recreator = Arc::new(CountingRecreator::new());
        let recorder = Arc::new(CountingRecorder { calls: AtomicUsize::new(0) });
        let svc = Arc::new(RecoveryService::with_default_rules(runtime.clone(), recreator.clone(), recorder));
        (svc, runtime, recreator)
    }

    #[tokio::test]
    async fn docker_connection_failure_opens_and_immediately_runs_cleanup() {
        let (svc, runtime, _recreator) = service();
        let summary = runtime
            .create_ide_container(CreateIdeContainerRequest {
                user_id: 1,
                repository_id: 1,
                branch: "main".to_string(),
                worktree_path: "/srv/git/worktrees/repo_1/user_1/main".to_string(),
                extensions_path: "/srv/extensions".to_string(),
                image: "codercom/code-server:latest".to_string(),
                profile: security_engine::derive_profile(
                    1,
                    &security_engine::Permissions {
                        can_create_branches: true,
                        branch_limit: 5,
                        allowed_base_branches: Default::default(),
                        allow_terminal_access: true,
                    },
                    1,
                    &security_engine::ResourceDefaults::default(),
                ),
                extra_labels: Default::default(),
            })
            .await
            .unwrap();

        let id = svc
            .handle_container_failure(&summary.id, ErrorKind::DockerConnectionFailed)
            .await
            .unwrap();

        let action = svc.action(id).unwrap();
        assert_eq!(action.status, RecoveryStatus::Completed);
        assert!(runtime.list_managed_containers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resource_limit_exceeded_does_not_run_immediately() {
        let (svc, _runtime, _recreator) = service();
        let id = svc
            .handle_container_failure("missing-container", ErrorKind::ResourceLimitExceeded)
            .await
            .unwrap();
        let action = svc.action(id).unwrap();
        assert_eq!(action.status, RecoveryStatus::Pending);
    }

    #[tokio::test]
    async fn processor_tick_drains_pending_actions() {
        let (svc, _runtime, _recreator) = service();
        svc.handle_container_failure("missing-a", ErrorKind::ResourceLimitExceeded).await;
        svc.handle_container_failure("missing-b", ErrorKind::ResourceLimitExceeded).await;
        svc.run_processor_tick().await;
        let actions = svc.actions_snapshot();
        assert!(actions.iter().all(|a| a.status != RecoveryStatus::Pending));
    }

    #[tokio::test]
    async fn session_git_failure_waits_for_the_tick_then_recreates() {
        let (svc, _runtime, recreator) = service();
        let id = svc
            .handle_session_failure(1, 1, "main", ErrorKind::GitCloneFailed)
            .await
            .unwrap();
        assert_eq!(svc.action(id).unwrap().status, RecoveryStatus::Pending);

        svc.run_processor_tick().await;
        assert_eq!(recreator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(svc.action(id).unwrap().status, RecoveryStatus::Completed);
    }

    #[tokio::test]
    async fn manual_strategy_never_completes() {
        let (svc, _runtime, _recreator) = service();
        let id = svc
            .handle_container_failure("c1", ErrorKind::SecurityViolation)
            .await
            .unwrap();
        let action = svc.action(id).unwrap();
        assert_eq!(action.status, RecoveryStatus::Failed);
        assert_eq!(action.strategy, RecoveryStrategy::Manual);
    }

    #[tokio::test]
    async fn exhausted_attempts_mark_the_action_failed() {
        let (svc, _runtime, _recreator) = service();
        let id = svc
            .handle_container_failure("missing-container", ErrorKind::ContainerStartFailed)
            .await
            .unwrap();
        // first immediate attempt already consumed (max_attempts = 2); run once more via the tick.
        svc.run_processor_tick().await;
        let action = svc.action(id).unwrap();
        assert_eq!(action.attempts, 2);
        assert_eq!(action.status, RecoveryStatus::Failed);
    }
}
