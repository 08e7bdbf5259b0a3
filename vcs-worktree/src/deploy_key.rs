//! Deploy-key generation (spec §4.5 `generateDeployKey`).
//!
//! Generates an RSA-4096 keypair and writes it to the path layout in
//! [`crate::paths::ssh_key_path`]. Key material lifecycle (rotation,
//! at-rest encryption) is an Open Question the spec defers (§9c); this
//! writes plaintext PEM files with owner-only permissions and leaves
//! encryption-at-rest to the host filesystem / secret store, matching the
//! decision recorded in DESIGN.md.

use error_kernel::{ErrorKind, OrchestratorError};
use rand::rngs::OsRng;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::path::Path;
use tracing::info;

const KEY_BITS: usize = 4096;

pub struct DeployKeyPair {
    pub private_key_pem: String,
    pub public_key_openssh_comment: String,
}

/// Generate an RSA-4096 keypair with comment `deploy-key-repo-<repoId>` and
/// persist it at `private_path` / `private_path.pub`.
pub async fn generate_deploy_key(
    repository_id: u64,
    private_path: &Path,
) -> Result<DeployKeyPair, OrchestratorError> {
    let private_path = private_path.to_path_buf();
    let comment = format!("deploy-key-repo-{repository_id}");

    tokio::task::spawn_blocking(move || -> Result<DeployKeyPair, OrchestratorError> {
        let mut rng = OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, KEY_BITS)
            .map_err(|e| OrchestratorError::wrap(ErrorKind::InternalError, e))?;
        let public_key = RsaPublicKey::from(&private_key);

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| OrchestratorError::wrap(ErrorKind::InternalError, e))?;
        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| OrchestratorError::wrap(ErrorKind::InternalError, e))?;

        if let Some(parent) = private_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| OrchestratorError::wrap(ErrorKind::InternalError, e))?;
        }
        std::fs::write(&private_path, private_pem.as_bytes())
            .map_err(|e| OrchestratorError::wrap(ErrorKind::InternalError, e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(&private_path, perms);
        }

        let pub_path = private_path.with_extension("pub");
        std::fs::write(&pub_path, format!("{public_pem} {comment}\n"))
            .map_err(|e| OrchestratorError::wrap(ErrorKind::InternalError, e))?;

        info!(repository_id, "generated deploy keypair");
        Ok(DeployKeyPair {
            private_key_pem: private_pem.to_string(),
            public_key_openssh_comment: comment,
        })
    })
    .await
    .map_err(|e| OrchestratorError::wrap(ErrorKind::InternalError, e))?
}
