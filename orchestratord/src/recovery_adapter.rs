//! Wires `recovery-service`'s [`SessionRecreator`] seam to the real
//! `SessionManager`, here at the composition root as `recovery-service`'s
//! own doc comment on the trait asks for (it can't depend on
//! `session-manager` directly without a cycle).

use async_trait::async_trait;
use error_kernel::OrchestratorError;
use recovery_service::SessionRecreator;
use session_manager::SessionManager;
use std::sync::Arc;

pub struct SessionManagerRecreator(pub Arc<SessionManager>);

#[async_trait]
impl SessionRecreator for SessionManagerRecreator {
    async fn recreate_session(&self, user_id: u64, repository_id: u64, branch: &str) -> Result<(), OrchestratorError> {
        self.0.recreate_session(user_id, repository_id, branch).await
    }
}
