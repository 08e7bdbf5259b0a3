//! The route registrar (C7, spec §4.7): computes the label set a
//! container must carry to be routed, probes reachability over HTTP, and
//! tracks route state for the orchestrator's own bookkeeping
//! (`getRegisteredRoutes`, idempotent register/unregister).

use crate::labels::{compute_routing_labels, RoutingLabelOptions, DEFAULT_MIDDLEWARE_CHAIN, DEFAULT_PRIORITY};
use crate::subdomain::{derive_subdomain, derive_url};
use async_trait::async_trait;
use error_kernel::{ErrorKind, OrchestratorError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub container_id: String,
    pub subdomain: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub domain: String,
    pub enable_tls: bool,
    pub acme_email: Option<String>,
    pub dashboard_enabled: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            domain: "localhost".to_string(),
            enable_tls: false,
            acme_email: None,
            dashboard_enabled: false,
        }
    }
}

const ROUTE_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// The proxy registrar surface (spec §4.7). A trait so `session-manager`
/// can test against an in-memory implementation; the Docker labels it
/// computes are the only thing a real Traefik deployment needs to read.
#[async_trait]
pub trait RouteRegistrar: Send + Sync {
    /// Pure: compute the labels a container must carry and the `RouteInfo`
    /// that will describe it, without registering anything yet. Called by
    /// `session-manager` *before* `container-runtime` creates the
    /// container, so the labels can be merged into the create request.
    fn prepare_route(&self, container_hint: &str, user_id: u64, repository_id: u64, branch: &str) -> (RouteInfo, HashMap<String, String>);

    /// Idempotent by container id (spec §4.7, §8): registering the same
    /// container twice leaves exactly one route.
    async fn register_route(&self, route: RouteInfo) -> Result<RouteInfo, OrchestratorError>;

    async fn unregister_route(&self, container_id: &str) -> Result<(), OrchestratorError>;

    async fn registered_routes(&self) -> Vec<RouteInfo>;

    async fn route_for_container(&self, container_id: &str) -> Option<RouteInfo>;

    /// HEAD with a 5s deadline; ok iff the response status is 2xx (spec
    /// §4.7 `testRoute`).
    async fn test_route(&self, url: &str) -> Result<bool, OrchestratorError>;

    fn dashboard_url(&self) -> Option<String>;
}

pub struct HttpRouteRegistrar {
    config: ProxyConfig,
    client: reqwest::Client,
    routes: RwLock<HashMap<String, RouteInfo>>,
}

impl HttpRouteRegistrar {
    pub fn new(config: ProxyConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(ROUTE_TEST_TIMEOUT)
            .build()
            .expect("reqwest client with a fixed timeout always builds");
        Self { config, client, routes: RwLock::new(HashMap::new()) }
    }
}

#[async_trait]
impl RouteRegistrar for HttpRouteRegistrar {
    fn prepare_route(
        &self,
        container_hint: &str,
        user_id: u64,
        repository_id: u64,
        branch: &str,
    ) -> (RouteInfo, HashMap<String, String>) {
        let subdomain = derive_subdomain(user_id, repository_id, branch);
        let url = derive_url(&subdomain, &self.config.domain, self.config.enable_tls);
        let host = format!("{subdomain}.{}", self.config.domain);

        let labels = compute_routing_labels(&RoutingLabelOptions {
            router_name: &subdomain,
            host: &host,
            isolated_network: "cloud-ide-isolated",
            enable_tls: self.config.enable_tls,
            acme_email: self.config.acme_email.as_deref(),
            middlewares: DEFAULT_MIDDLEWARE_CHAIN,
            priority: DEFAULT_PRIORITY,
        });

        let route = RouteInfo { container_id: container_hint.to_string(), subdomain, url };
        (route, labels)
    }

    async fn register_route(&self, route: RouteInfo) -> Result<RouteInfo, OrchestratorError> {
        let mut routes = self.routes.write();
        let existing = routes.entry(route.container_id.clone()).or_insert_with(|| route.clone());
        debug!(container_id = %existing.container_id, subdomain = %existing.subdomain, "route registered");
        Ok(existing.clone())
    }

    async fn unregister_route(&self, container_id: &str) -> Result<(), OrchestratorError> {
        self.routes.write().remove(container_id);
        Ok(())
    }

    async fn registered_routes(&self) -> Vec<RouteInfo> {
        self.routes.read().values().cloned().collect()
    }

    async fn route_for_container(&self, container_id: &str) -> Option<RouteInfo> {
        self.routes.read().get(container_id).cloned()
    }

    async fn test_route(&self, url: &str) -> Result<bool, OrchestratorError> {
        match self.client.head(url).timeout(ROUTE_TEST_TIMEOUT).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                warn!(url, error = %e, "route connectivity probe failed");
                Err(OrchestratorError::wrap(ErrorKind::NetworkError, e))
            }
        }
    }

    fn dashboard_url(&self) -> Option<String> {
        if !self.config.dashboard_enabled {
            return None;
        }
        let scheme = if self.config.enable_tls { "https" } else { "http" };
        Some(format!("{scheme}://traefik.{}", self.config.domain))
    }
}

/// Pure in-memory implementation used by `#[cfg(test)]` code elsewhere in
/// the workspace; identical semantics to `HttpRouteRegistrar` minus the
/// live HTTP probe, which always reports `true`.
pub struct InMemoryRouteRegistrar {
    inner: HttpRouteRegistrar,
}

impl InMemoryRouteRegistrar {
    pub fn new(config: ProxyConfig) -> Self {
        Self { inner: HttpRouteRegistrar::new(config) }
    }
}

#[async_trait]
impl RouteRegistrar for InMemoryRouteRegistrar {
    fn prepare_route(&self, container_hint: &str, user_id: u64, repository_id: u64, branch: &str) -> (RouteInfo, HashMap<String, String>) {
        self.inner.prepare_route(container_hint, user_id, repository_id, branch)
    }

    async fn register_route(&self, route: RouteInfo) -> Result<RouteInfo, OrchestratorError> {
        self.inner.register_route(route).await
    }

    async fn unregister_route(&self, container_id: &str) -> Result<(), OrchestratorError> {
        self.inner.unregister_route(container_id).await
    }

    async fn registered_routes(&self) -> Vec<RouteInfo> {
        self.inner.registered_routes().await
    }

    async fn route_for_container(&self, container_id: &str) -> Option<RouteInfo> {
        self.inner.route_for_container(container_id).await
    }

    async fn test_route(&self, _url: &str) -> Result<bool, OrchestratorError> {
        Ok(true)
    }

    fn dashboard_url(&self) -> Option<String> {
        self.inner.dashboard_url()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registrar() -> InMemoryRouteRegistrar {
        InMemoryRouteRegistrar::new(ProxyConfig::default())
    }

    #[tokio::test]
    async fn register_is_idempotent_by_container_id() {
        let registrar = registrar();
        let (route, _labels) = registrar.prepare_route("c1", 1, 1, "main");
        registrar.register_route(route.clone()).await.unwrap();
        registrar.register_route(route).await.unwrap();
        assert_eq!(registrar.registered_routes().await.len(), 1);
    }

    #[tokio::test]
    async fn unregister_leaves_no_route_for_that_container() {
        let registrar = registrar();
        let (route, _labels) = registrar.prepare_route("c1", 1, 1, "main");
        registrar.register_route(route.clone()).await.unwrap();
        registrar.unregister_route(&route.container_id).await.unwrap();
        assert!(registrar.route_for_container("c1").await.is_none());
        assert!(registrar.registered_routes().await.is_empty());
    }

    #[tokio::test]
    async fn prepare_route_derives_the_expected_host_and_url() {
        let registrar = registrar();
        let (route, labels) = registrar.prepare_route("c1", 1, 1, "main");
        assert_eq!(route.subdomain, "ide-u1-r1-main");
        assert_eq!(route.url, "http://ide-u1-r1-main.localhost");
        assert_eq!(
            labels.get("traefik.http.routers.ide-u1-r1-main.rule").unwrap(),
            "Host(`ide-u1-r1-main.localhost`)"
        );
    }

    #[test]
    fn dashboard_url_is_none_when_disabled() {
        let registrar = registrar();
        assert!(registrar.dashboard_url().is_none());
    }

    #[test]
    fn dashboard_url_uses_the_configured_domain_when_enabled() {
        let registrar = InMemoryRouteRegistrar::new(ProxyConfig {
            dashboard_enabled: true,
            domain: "example.com".to_string(),
            ..Default::default()
        });
        assert_eq!(registrar.dashboard_url().as_deref(), Some("http://traefik.example.com"));
    }
}
