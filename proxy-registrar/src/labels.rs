//! Traefik-style routing label computation (spec §4.7, §6). These labels
//! are the single authoritative way a route is expressed (spec §9 open
//! question (a)): `container-runtime` merges whatever this module computes
//! into the container's creation-time labels rather than mutating them
//! afterward, since Docker container labels are immutable post-creation.

use std::collections::HashMap;

/// Default middleware chain (spec §6): `security-headers -> rate-limit ->
/// ide-session`.
pub const DEFAULT_MIDDLEWARE_CHAIN: &[&str] = &["security-headers", "rate-limit", "ide-session"];

pub const DEFAULT_PRIORITY: u32 = 100;

#[derive(Debug, Clone)]
pub struct RoutingLabelOptions<'a> {
    pub router_name: &'a str,
    pub host: &'a str,
    pub isolated_network: &'a str,
    pub enable_tls: bool,
    pub acme_email: Option<&'a str>,
    pub middlewares: &'a [&'a str],
    pub priority: u32,
}

/// Build the `traefik.*` label set for one container (spec §4.7):
/// `enable`, the `Host()` rule, the `websecure` entrypoint, the
/// loadbalancer port, the attached network, and — when TLS is on — the
/// certresolver. The middleware chain and priority are always set.
pub fn compute_routing_labels(options: &RoutingLabelOptions<'_>) -> HashMap<String, String> {
    let n = options.router_name;
    let mut labels = HashMap::new();
    labels.insert("traefik.enable".to_string(), "true".to_string());
    labels.insert(format!("traefik.http.routers.{n}.rule"), format!("Host(`{}`)", options.host));
    labels.insert(format!("traefik.http.routers.{n}.entrypoints"), "websecure".to_string());
    labels.insert(format!("traefik.http.services.{n}.loadbalancer.server.port"), "8080".to_string());
    labels.insert("traefik.docker.network".to_string(), options.isolated_network.to_string());
    labels.insert(format!("traefik.http.routers.{n}.priority"), options.priority.to_string());

    if !options.middlewares.is_empty() {
        labels.insert(
            format!("traefik.http.routers.{n}.middlewares"),
            options.middlewares.join(","),
        );
    }

    if options.enable_tls {
        labels.insert(format!("traefik.http.routers.{n}.tls"), "true".to_string());
        if options.acme_email.is_some() {
            labels.insert(
                format!("traefik.http.routers.{n}.tls.certresolver"),
                "letsencrypt".to_string(),
            );
        }
    }

    labels
}

/// Extract the `Host(...)` value this router's rule label carries, used to
/// reconstruct a `RouteInfo` from labels already on a container (spec §4.7
/// "Route state is derived from container labels").
pub fn host_from_rule_label(router_name: &str, labels: &HashMap<String, String>) -> Option<String> {
    let rule = labels.get(&format!("traefik.http.routers.{router_name}.rule"))?;
    let start = rule.find("Host(`")? + "Host(`".len();
    let end = rule[start..].find('`')? + start;
    Some(rule[start..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options<'a>(router_name: &'a str, host: &'a str) -> RoutingLabelOptions<'a> {
        RoutingLabelOptions {
            router_name,
            host,
            isolated_network: "cloud-ide-isolated",
            enable_tls: false,
            acme_email: None,
            middlewares: DEFAULT_MIDDLEWARE_CHAIN,
            priority: DEFAULT_PRIORITY,
        }
    }

    #[test]
    fn builds_the_required_label_set() {
        let labels = compute_routing_labels(&options("ide-u1-r1-main", "ide-u1-r1-main.localhost"));
        assert_eq!(labels.get("traefik.enable").unwrap(), "true");
        assert_eq!(
            labels.get("traefik.http.routers.ide-u1-r1-main.rule").unwrap(),
            "Host(`ide-u1-r1-main.localhost`)"
        );
        assert_eq!(
            labels.get("traefik.http.services.ide-u1-r1-main.loadbalancer.server.port").unwrap(),
            "8080"
        );
        assert!(!labels.contains_key("traefik.http.routers.ide-u1-r1-main.tls"));
    }

    #[test]
    fn tls_adds_certresolver_only_with_an_acme_email() {
        let mut opts = options("r", "host.example.com");
        opts.enable_tls = true;
        opts.acme_email = Some("ops@example.com");
        let labels = compute_routing_labels(&opts);
        assert_eq!(labels.get("traefik.http.routers.r.tls").unwrap(), "true");
        assert_eq!(labels.get("traefik.http.routers.r.tls.certresolver").unwrap(), "letsencrypt");
    }

    #[test]
    fn host_roundtrips_through_the_rule_label() {
        let labels = compute_routing_labels(&options("r", "ide-u1-r1-main.localhost"));
        assert_eq!(host_from_rule_label("r", &labels).as_deref(), Some("ide-u1-r1-main.localhost"));
    }
}
