//! Reverse-proxy route registration (C7, spec §4.7): derives the
//! per-session subdomain, computes the Traefik labels that make a
//! container routable, and tracks registered routes for the orchestrator.

pub mod labels;
pub mod registrar;
pub mod subdomain;

pub use labels::{compute_routing_labels, host_from_rule_label, RoutingLabelOptions, DEFAULT_MIDDLEWARE_CHAIN, DEFAULT_PRIORITY};
pub use registrar::{HttpRouteRegistrar, InMemoryRouteRegistrar, ProxyConfig, RouteInfo, RouteRegistrar};
pub use subdomain::{derive_subdomain, derive_url};
