//! Environment-driven startup configuration (spec §6), loaded once at
//! process start and handed down to every other crate's `Config`/`Options`
//! struct rather than each of them reading the environment itself.
//!
//! Validation failures here are config errors (exit code `1`, spec §6);
//! reachability failures against an external dependency (the Docker
//! socket) are a separate check the binary crate runs after loading,
//! mapped to exit code `2` — see [`ConfigError::exit_code`] and DESIGN.md.

use security_engine::parse_size_bytes;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraefikLogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl TraefikLogLevel {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_uppercase().as_str() {
            "DEBUG" => Some(Self::Debug),
            "INFO" => Some(Self::Info),
            "WARN" => Some(Self::Warn),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidBool { var: &'static str, value: String },
    InvalidNumber { var: &'static str, value: String },
    InvalidSize { var: &'static str, value: String },
    InvalidDomain { value: String },
    InvalidEnumValue { var: &'static str, value: String },
    DockerSocketUnreachable { path: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidBool { var, value } => write!(f, "{var}='{value}' is not a valid boolean"),
            ConfigError::InvalidNumber { var, value } => write!(f, "{var}='{value}' is not a valid number"),
            ConfigError::InvalidSize { var, value } => write!(f, "{var}='{value}' is not a valid size (expected e.g. 2g, 512m, 100k)"),
            ConfigError::InvalidDomain { value } => write!(f, "DOMAIN='{value}' is not a valid hostname"),
            ConfigError::InvalidEnumValue { var, value } => write!(f, "{var}='{value}' is not one of the allowed values"),
            ConfigError::DockerSocketUnreachable { path } => write!(f, "Docker socket at '{path}' is not reachable"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ConfigError {
    /// Process exit code per spec §6's "operational surface". Format/range
    /// errors discovered while parsing the environment are configuration
    /// errors (`1`); an unreachable Docker socket is only discoverable by
    /// dialing out, so it is a runtime initialization failure (`2`).
    pub fn exit_code(&self) -> i32 {
        match self {
            ConfigError::DockerSocketUnreachable { .. } => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub docker_socket_path: String,
    pub docker_network_name: String,
    pub code_server_image: String,
    pub session_timeout: Duration,
    pub max_containers: u64,
    pub default_memory_limit: String,
    pub default_cpu_limit: f64,
    pub max_disk_per_container: String,
    pub domain: String,
    pub enable_tls: bool,
    pub acme_email: Option<String>,
    pub traefik_dashboard: bool,
    pub traefik_log_level: TraefikLogLevel,
    pub git_base_dir: String,
    pub extensions_path: String,
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool { var, value: raw.to_string() }),
    }
}

/// A pragmatic hostname check: non-empty, ASCII, no whitespace or `/`,
/// matching the `{DOMAIN}` slot in spec §4.7's `ide-u{u}-r{r}-{branch}.{DOMAIN}`
/// routing pattern.
fn is_valid_domain(value: &str) -> bool {
    !value.is_empty()
        && value.is_ascii()
        && !value.chars().any(|c| c.is_whitespace() || c == '/')
        && value != "."
}

impl OrchestratorConfig {
    /// Load and validate every variable from spec §6, applying its
    /// documented defaults. Returns a format/range `ConfigError` (exit code
    /// `1`) on the first invalid value; never touches the network or
    /// filesystem.
    pub fn from_env() -> Result<Self, ConfigError> {
        let docker_socket_path = env_or("DOCKER_SOCKET_PATH", "/var/run/docker.sock");
        let docker_network_name = env_or("DOCKER_NETWORK_NAME", "cloud-ide-network");
        let code_server_image = env_or("CODE_SERVER_IMAGE", "codercom/code-server:latest");

        let session_timeout_minutes_raw = env_or("SESSION_TIMEOUT_MINUTES", "60");
        let session_timeout_minutes = session_timeout_minutes_raw.parse::<u64>().map_err(|_| ConfigError::InvalidNumber {
            var: "SESSION_TIMEOUT_MINUTES",
            value: session_timeout_minutes_raw.clone(),
        })?;
        let session_timeout = Duration::from_secs(session_timeout_minutes * 60);

        let max_containers_raw = env_or("MAX_CONTAINERS", "50");
        let max_containers = max_containers_raw.parse::<u64>().map_err(|_| ConfigError::InvalidNumber {
            var: "MAX_CONTAINERS",
            value: max_containers_raw.clone(),
        })?;

        let default_memory_limit = env_or("DEFAULT_MEMORY_LIMIT", "2g");
        if parse_size_bytes(&default_memory_limit).is_none() {
            return Err(ConfigError::InvalidSize { var: "DEFAULT_MEMORY_LIMIT", value: default_memory_limit });
        }

        let default_cpu_limit_raw = env_or("DEFAULT_CPU_LIMIT", "1.0");
        let default_cpu_limit = default_cpu_limit_raw.parse::<f64>().ok().filter(|v| *v > 0.0).ok_or_else(|| {
            ConfigError::InvalidNumber { var: "DEFAULT_CPU_LIMIT", value: default_cpu_limit_raw.clone() }
        })?;

        let max_disk_per_container = env_or("MAX_DISK_PER_CONTAINER", "5g");
        if parse_size_bytes(&max_disk_per_container).is_none() {
            return Err(ConfigError::InvalidSize { var: "MAX_DISK_PER_CONTAINER", value: max_disk_per_container });
        }

        let domain = env_or("DOMAIN", "localhost");
        if !is_valid_domain(&domain) {
            return Err(ConfigError::InvalidDomain { value: domain });
        }

        let enable_tls_raw = env_or("ENABLE_TLS", "false");
        let enable_tls = parse_bool("ENABLE_TLS", &enable_tls_raw)?;

        let acme_email = std::env::var("ACME_EMAIL").ok().filter(|s| !s.is_empty());

        let traefik_dashboard_raw = env_or("TRAEFIK_DASHBOARD", "false");
        let traefik_dashboard = parse_bool("TRAEFIK_DASHBOARD", &traefik_dashboard_raw)?;

        let traefik_log_level_raw = env_or("TRAEFIK_LOG_LEVEL", "INFO");
        let traefik_log_level = TraefikLogLevel::parse(&traefik_log_level_raw).ok_or_else(|| ConfigError::InvalidEnumValue {
            var: "TRAEFIK_LOG_LEVEL",
            value: traefik_log_level_raw.clone(),
        })?;

        let git_base_dir = env_or("GIT_BASE_DIR", "/srv/git");
        let extensions_path = env_or("EXTENSIONS_PATH", "/srv/extensions");

        Ok(Self {
            docker_socket_path,
            docker_network_name,
            code_server_image,
            session_timeout,
            max_containers,
            default_memory_limit,
            default_cpu_limit,
            max_disk_per_container,
            domain,
            enable_tls,
            acme_email,
            traefik_dashboard,
            traefik_log_level,
            git_base_dir,
            extensions_path,
        })
    }

    /// Runtime-initialization check (exit code `2`): is the configured
    /// Docker socket actually present? `bollard`'s own connect error is
    /// surfaced too late to distinguish "bad config" from "Docker is down",
    /// so this runs as an explicit pre-flight before any other
    /// collaborator is wired up.
    pub fn verify_docker_socket_reachable(&self) -> Result<(), ConfigError> {
        if self.docker_socket_path.starts_with("tcp://") || self.docker_socket_path.starts_with("http://") {
            return Ok(());
        }
        std::fs::metadata(&self.docker_socket_path)
            .map(|_| ())
            .map_err(|_| ConfigError::DockerSocketUnreachable { path: self.docker_socket_path.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Environment variables are process-global; serialize the tests that
    /// touch them so they don't race each other under `cargo test`'s
    /// default multi-threaded runner.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for var in [
            "DOCKER_SOCKET_PATH",
            "DOCKER_NETWORK_NAME",
            "CODE_SERVER_IMAGE",
            "SESSION_TIMEOUT_MINUTES",
            "MAX_CONTAINERS",
            "DEFAULT_MEMORY_LIMIT",
            "DEFAULT_CPU_LIMIT",
            "MAX_DISK_PER_CONTAINER",
            "DOMAIN",
            "ENABLE_TLS",
            "ACME_EMAIL",
            "TRAEFIK_DASHBOARD",
            "TRAEFIK_LOG_LEVEL",
            "GIT_BASE_DIR",
            "EXTENSIONS_PATH",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn defaults_match_spec_when_nothing_is_set() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        let config = OrchestratorConfig::from_env().expect("defaults should be valid");
        assert_eq!(config.docker_socket_path, "/var/run/docker.sock");
        assert_eq!(config.docker_network_name, "cloud-ide-network");
        assert_eq!(config.code_server_image, "codercom/code-server:latest");
        assert_eq!(config.session_timeout, Duration::from_secs(60 * 60));
        assert_eq!(config.max_containers, 50);
        assert_eq!(config.default_memory_limit, "2g");
        assert_eq!(config.default_cpu_limit, 1.0);
        assert_eq!(config.max_disk_per_container, "5g");
        assert_eq!(config.domain, "localhost");
        assert!(!config.enable_tls);
        assert_eq!(config.git_base_dir, "/srv/git");
        assert_eq!(config.extensions_path, "/srv/extensions");
    }

    #[test]
    fn rejects_an_invalid_memory_limit() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        std::env::set_var("DEFAULT_MEMORY_LIMIT", "not-a-size");
        let err = OrchestratorConfig::from_env().expect_err("garbage memory limit should fail");
        assert_eq!(err.exit_code(), 1);
        std::env::remove_var("DEFAULT_MEMORY_LIMIT");
    }

    #[test]
    fn rejects_a_non_numeric_session_timeout() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        std::env::set_var("SESSION_TIMEOUT_MINUTES", "soon");
        let err = OrchestratorConfig::from_env().expect_err("non-numeric session timeout should fail");
        assert_eq!(err.exit_code(), 1);
        std::env::remove_var("SESSION_TIMEOUT_MINUTES");
    }

    #[test]
    fn rejects_a_negative_cpu_limit() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        std::env::set_var("DEFAULT_CPU_LIMIT", "-1");
        let err = OrchestratorConfig::from_env().expect_err("negative cpu limit should fail");
        assert_eq!(err.exit_code(), 1);
        std::env::remove_var("DEFAULT_CPU_LIMIT");
    }

    #[test]
    fn rejects_a_domain_with_whitespace() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        std::env::set_var("DOMAIN", "not a domain");
        let err = OrchestratorConfig::from_env().expect_err("domain with whitespace should fail");
        assert_eq!(err.exit_code(), 1);
        std::env::remove_var("DOMAIN");
    }

    #[test]
    fn docker_socket_check_fails_fast_for_a_missing_path() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        std::env::set_var("DOCKER_SOCKET_PATH", "/nonexistent/docker.sock");
        let config = OrchestratorConfig::from_env().unwrap();
        let err = config.verify_docker_socket_reachable().expect_err("missing socket should fail");
        assert_eq!(err.exit_code(), 2);
        std::env::remove_var("DOCKER_SOCKET_PATH");
    }
}
