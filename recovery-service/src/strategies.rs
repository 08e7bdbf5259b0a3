//! Strategy execution (spec §4.9). Each strategy is a pure dispatch over
//! the runtime/recreator collaborators; the state-machine bookkeeping
//! (attempts, status transitions) lives in [`crate::service`].

use crate::action::RecoveryTarget;
use crate::rules::RecoveryStrategy;
use async_trait::async_trait;
use container_runtime::ContainerRuntime;
use error_kernel::{ErrorKind, OrchestratorError};
use tracing::{info, warn};

/// `recreate` calls back into the Session Manager rather than
/// `container-runtime` directly, since it needs the worktree and security
/// profile to rebuild a session end to end. A trait here avoids
/// `recovery-service` depending on `session-manager` (which itself depends
/// on `recovery-service` to report failures), so the composition root
/// (`orchestratord`) wires a real implementation in.
#[async_trait]
pub trait SessionRecreator: Send + Sync {
    async fn recreate_session(
        &self,
        user_id: u64,
        repository_id: u64,
        branch: &str,
    ) -> Result<(), OrchestratorError>;
}

pub async fn execute_strategy(
    strategy: RecoveryStrategy,
    target: &RecoveryTarget,
    runtime: &dyn ContainerRuntime,
    recreator: &dyn SessionRecreator,
) -> Result<(), OrchestratorError> {
    match strategy {
        RecoveryStrategy::Restart => restart(target, runtime).await,
        RecoveryStrategy::Recreate => recreate(target, runtime, recreator).await,
        RecoveryStrategy::Cleanup => cleanup(target, runtime).await,
        RecoveryStrategy::Failover => failover(target).await,
        RecoveryStrategy::Manual => Err(OrchestratorError::new(
            ErrorKind::SecurityViolation,
            "manual recovery actions never auto-complete; awaiting operator",
        )),
    }
}

async fn restart(target: &RecoveryTarget, runtime: &dyn ContainerRuntime) -> Result<(), OrchestratorError> {
    match target {
        RecoveryTarget::Container(id) => runtime.restart_container(id).await,
        RecoveryTarget::Session { .. } => Err(OrchestratorError::new(
            ErrorKind::InternalError,
            "restart strategy requires a container target",
        )),
    }
}

async fn recreate(
    target: &RecoveryTarget,
    runtime: &dyn ContainerRuntime,
    recreator: &dyn SessionRecreator,
) -> Result<(), OrchestratorError> {
    match target {
        RecoveryTarget::Session { user_id, repository_id, branch } => {
            recreator.recreate_session(*user_id, *repository_id, branch).await
        }
        RecoveryTarget::Container(id) => {
            if let Some(summary) = runtime.list_managed_containers().await?.into_iter().find(|c| &c.id == id) {
                if let (Some(user_id), Some(repository_id), Some(branch)) =
                    (summary.user_id(), summary.repository_id(), summary.branch_name())
                {
                    runtime.remove_container(id).await?;
                    return recreator.recreate_session(user_id, repository_id, branch).await;
                }
            }
            Err(OrchestratorError::new(
                ErrorKind::NotFound,
                format!("cannot recreate: container {id} is not managed or already gone"),
            ))
        }
    }
}

async fn cleanup(target: &RecoveryTarget, runtime: &dyn ContainerRuntime) -> Result<(), OrchestratorError> {
    match target {
        RecoveryTarget::Container(id) => {
            info!(container = %id, "cleanup strategy removing container");
            runtime.remove_container(id).await
        }
        RecoveryTarget::Session { user_id, repository_id, branch } => {
            if let Some(summary) = runtime
                .find_by_selector(*user_id, *repository_id, branch)
                .await?
            {
                runtime.remove_container(&summary.id).await
            } else {
                Ok(())
            }
        }
    }
}

async fn failover(target: &RecoveryTarget) -> Result<(), OrchestratorError> {
    warn!(?target, "failover strategy has no backup target on this node; logging and completing");
    Ok(())
}
