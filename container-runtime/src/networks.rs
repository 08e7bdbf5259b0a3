//! Docker network bootstrap (spec §4.6): ensure the main bridge network
//! exists, plus the isolated `cloud-ide-isolated` network every IDE
//! container attaches to.

use bollard::models::{Ipam, IpamConfig};
use bollard::network::CreateNetworkOptions;
use bollard::Docker;
use error_kernel::{ErrorKind, OrchestratorError};
use std::collections::HashMap;
use tracing::{debug, info};

/// Name of the isolated bridge every IDE container is attached to
/// (spec §4.4, §4.6).
pub const ISOLATED_NETWORK_NAME: &str = "cloud-ide-isolated";
const ISOLATED_SUBNET: &str = "172.20.0.0/16";

async fn network_exists(docker: &Docker, name: &str) -> Result<bool, OrchestratorError> {
    match docker.inspect_network::<String>(name, None).await {
        Ok(_) => Ok(true),
        Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(false),
        Err(e) => Err(OrchestratorError::wrap(ErrorKind::DockerConnectionFailed, e)),
    }
}

/// Ensure the operator-configured main network exists (created with
/// defaults if absent — no isolation requirements apply to it).
pub async fn ensure_main_network(docker: &Docker, name: &str) -> Result<(), OrchestratorError> {
    if network_exists(docker, name).await? {
        debug!(network = name, "main network already exists");
        return Ok(());
    }
    docker
        .create_network(CreateNetworkOptions {
            name: name.to_string(),
            driver: "bridge".to_string(),
            ..Default::default()
        })
        .await
        .map_err(|e| OrchestratorError::wrap(ErrorKind::DockerConnectionFailed, e))?;
    info!(network = name, "created main docker network");
    Ok(())
}

/// Ensure the isolated bridge exists: `internal=true`, ICC disabled,
/// IP-masquerade disabled, MTU 1500, subnet 172.20.0.0/16 (spec §4.6).
pub async fn ensure_isolated_network(docker: &Docker) -> Result<(), OrchestratorError> {
    if network_exists(docker, ISOLATED_NETWORK_NAME).await? {
        debug!(network = ISOLATED_NETWORK_NAME, "isolated network already exists");
        return Ok(());
    }

    let mut options = HashMap::new();
    options.insert("com.docker.network.bridge.enable_icc".to_string(), "false".to_string());
    options.insert(
        "com.docker.network.bridge.enable_ip_masquerade".to_string(),
        "false".to_string(),
    );
    options.insert("com.docker.network.driver.mtu".to_string(), "1500".to_string());

    docker
        .create_network(CreateNetworkOptions {
            name: ISOLATED_NETWORK_NAME.to_string(),
            driver: "bridge".to_string(),
            internal: true,
            options,
            ipam: Ipam {
                config: Some(vec![IpamConfig {
                    subnet: Some(ISOLATED_SUBNET.to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            ..Default::default()
        })
        .await
        .map_err(|e| OrchestratorError::wrap(ErrorKind::DockerConnectionFailed, e))?;
    info!(network = ISOLATED_NETWORK_NAME, subnet = ISOLATED_SUBNET, "created isolated docker network");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolated_network_name_matches_spec() {
        assert_eq!(ISOLATED_NETWORK_NAME, "cloud-ide-isolated");
    }
}
