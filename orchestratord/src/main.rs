//! `cloud-ide-orchestratord`: the process entrypoint (C10). Loads
//! configuration (spec §6), wires C1-C9 together, runs the monitoring
//! tick, recovery processor, and idle-session sweep as background tasks,
//! and drives graceful shutdown on SIGTERM/Ctrl+C.
//!
//! Exit codes (spec §6's "operational surface"): `0` normal shutdown, `1`
//! configuration error, `2` runtime initialization failure, `3` critical
//! unhandled error.

mod metrics_source;
mod permissions;
mod recovery_adapter;

use clap::Parser;
use container_runtime::{BollardContainerRuntime, ContainerRuntime, RuntimeLimits};
use futures::FutureExt;
use metrics_source::{AppMetricsSource, ErrorRecorder};
use monitoring::{AlertEngine, Monitor};
use orchestrator_config::OrchestratorConfig;
use permissions::StaticPermissionsProvider;
use proxy_registrar::{HttpRouteRegistrar, ProxyConfig, RouteRegistrar};
use recovery_adapter::SessionManagerRecreator;
use recovery_service::RecoveryService;
use security_engine::ResourceDefaults;
use session_manager::{PermissionsProvider, SessionManager, SessionManagerConfig};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vcs_worktree::{Git2WorktreeProvider, WorktreeProvider};

/// Background sweep for containers idle past `session_timeout` (spec §4.6).
const CLEANUP_TICK: Duration = Duration::from_secs(5 * 60);

#[derive(Parser, Debug)]
#[command(name = "cloud-ide-orchestratord", about = "Cloud IDE orchestrator daemon")]
struct Cli {
    /// Load and validate configuration, print it, and exit without starting
    /// any background task or touching Docker.
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() {
    orchestrator_logging::init_tracing();
    let exit_code = match AssertUnwindSafe(run()).catch_unwind().await {
        Ok(code) => code,
        Err(_) => {
            tracing::error!("unhandled panic reached main; exiting with critical status");
            3
        }
    };
    std::process::exit(exit_code);
}

async fn run() -> i32 {
    let cli = Cli::parse();

    let config = match OrchestratorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            return e.exit_code();
        }
    };

    if cli.print_config {
        println!("{config:#?}");
        return 0;
    }

    if let Err(e) = config.verify_docker_socket_reachable() {
        tracing::error!(error = %e, "runtime initialization failure");
        return e.exit_code();
    }

    let docker = match bollard::Docker::connect_with_socket_defaults() {
        Ok(docker) => docker,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to the Docker daemon");
            return 2;
        }
    };

    if let Err(e) = container_runtime::ensure_main_network(&docker, &config.docker_network_name).await {
        tracing::error!(error = %e, "failed to ensure the main docker network exists");
        return 2;
    }
    if let Err(e) = container_runtime::ensure_isolated_network(&docker).await {
        tracing::error!(error = %e, "failed to ensure the isolated docker network exists");
        return 2;
    }

    let runtime: Arc<dyn ContainerRuntime> = Arc::new(BollardContainerRuntime::new(
        docker,
        RuntimeLimits { max_containers: config.max_containers, ..RuntimeLimits::default() },
    ));
    let worktree: Arc<dyn WorktreeProvider> = Arc::new(Git2WorktreeProvider::new(config.git_base_dir.clone()));
    let registrar: Arc<dyn RouteRegistrar> = Arc::new(HttpRouteRegistrar::new(ProxyConfig {
        domain: config.domain.clone(),
        enable_tls: config.enable_tls,
        acme_email: config.acme_email.clone(),
        dashboard_enabled: config.traefik_dashboard,
    }));
    let permissions: Arc<dyn PermissionsProvider> = Arc::new(StaticPermissionsProvider::default());

    let session_config = SessionManagerConfig {
        image: config.code_server_image.clone(),
        resource_defaults: ResourceDefaults {
            memory: config.default_memory_limit.clone(),
            cpu: config.default_cpu_limit,
            disk_quota: config.max_disk_per_container.clone(),
        },
        session_timeout: config.session_timeout,
        extensions_path: config.extensions_path.clone(),
        ..SessionManagerConfig::default()
    };
    let session_manager = Arc::new(SessionManager::new(
        session_config,
        worktree,
        runtime.clone(),
        registrar,
        permissions,
    ));

    let error_recorder = Arc::new(ErrorRecorder::new());
    let recreator: Arc<dyn recovery_service::SessionRecreator> =
        Arc::new(SessionManagerRecreator(session_manager.clone()));
    let recovery = Arc::new(RecoveryService::with_default_rules(runtime.clone(), recreator, error_recorder.clone()));

    let monitor = Arc::new(Monitor::new(AlertEngine::new(monitoring::alerts::default_rules())));
    let metrics_source = Arc::new(AppMetricsSource {
        sessions: session_manager.clone(),
        errors: error_recorder,
        started_at: Instant::now(),
    });

    let monitor_task = tokio::spawn({
        let monitor = monitor.clone();
        async move { monitor.run(metrics_source).await }
    });
    let recovery_task = tokio::spawn({
        let recovery = recovery.clone();
        async move { recovery.run_forever().await }
    });
    let cleanup_task = tokio::spawn({
        let session_manager = session_manager.clone();
        async move {
            let mut ticker = tokio::time::interval(CLEANUP_TICK);
            loop {
                ticker.tick().await;
                match session_manager.cleanup_inactive_sessions().await {
                    Ok(outcome) => {
                        if !outcome.succeeded.is_empty() || !outcome.failed.is_empty() {
                            tracing::info!(
                                removed = outcome.succeeded.len(),
                                failed = outcome.failed.len(),
                                "idle session sweep completed"
                            );
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "idle session sweep failed"),
                }
            }
        }
    });

    tracing::info!(domain = %config.domain, max_containers = config.max_containers, "orchestrator started");
    shutdown_signal().await;
    tracing::info!("shutdown signal received");

    let outcome = session_manager.shutdown().await;
    tracing::info!(succeeded = outcome.succeeded.len(), failed = outcome.failed.len(), "session shutdown complete");

    monitor_task.abort();
    recovery_task.abort();
    cleanup_task.abort();

    0
}

/// Waits for either Ctrl+C or SIGTERM (spec §6: "graceful shutdown via
/// SIGTERM triggers `shutdown()` on the Session Manager").
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
