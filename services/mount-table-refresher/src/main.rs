//! Mount Table Refresher
//!
//! Single-binary service that:
//! 1. Primes a cache of router admin clients and keeps it swept
//! 2. Periodically pushes a mount table refresh to every known router admin
//! 3. Serves an admin API for health, metrics, manual refresh and the router list

mod admin;
mod config;
mod managers;
mod metrics;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mount_table::{
    CacheLifecycle, ClassifyingTaskFactory, RefreshOrchestrator, StaticRouterStore,
    spawn_refresh_loop,
};
use router_admin::RouterClient;

use crate::admin::{AdminState, build_admin_router};
use crate::config::Config;
use crate::managers::HttpManagerFactory;

/// Upper bound on draining admin requests after the shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting mount-table-refresher");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder()?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.admin.listen_addr,
        local_admin_url = %config.admin.local_admin_url,
        routers = config.routers.len(),
        refresh_timeout_ms = config.refresher.refresh_timeout_ms,
        client_max_live_ms = config.refresher.client_max_live_ms,
        refresh_interval_secs = config.refresher.refresh_interval_secs,
        "configuration loaded"
    );

    let http = reqwest::Client::builder()
        .timeout(config.admin.request_timeout())
        .build()
        .context("failed to build HTTP client")?;

    let service = Service::build(&config, http, prometheus_handle).await?;
    service.run(shutdown_signal()).await
}

/// Fully wired service whose client cache has not been primed yet.
///
/// Everything that can fail happens in `build`. `run` primes the cache, so
/// once clients exist the only exit is through `CacheLifecycle::stop`.
struct Service {
    lifecycle: CacheLifecycle<RouterClient>,
    orchestrator: Arc<RefreshOrchestrator>,
    admin_state: AdminState,
    listener: TcpListener,
    refresh_interval: Duration,
    max_connections: usize,
}

impl Service {
    async fn build(
        config: &Config,
        http: reqwest::Client,
        prometheus: PrometheusHandle,
    ) -> Result<Self> {
        let store = Arc::new(StaticRouterStore::from_addresses(config.router_addresses()));
        metrics::set_known_routers(config.routers.len());

        let cache = Arc::new(managers::client_cache(
            config.refresher.client_max_live(),
            http.clone(),
        ));
        let lifecycle = CacheLifecycle::new(store.clone(), cache.clone());

        let managers = Arc::new(HttpManagerFactory::new(
            cache.clone(),
            &config.admin.local_admin_url,
            http,
        ));
        let tasks = Arc::new(ClassifyingTaskFactory::new(
            managers,
            config.refresher.local_marker.clone(),
        ));
        let orchestrator = Arc::new(
            RefreshOrchestrator::new(
                store.clone(),
                tasks,
                cache.clone(),
                config.refresher.to_refresh_config(),
            )
            .context("invalid refresh configuration")?,
        );

        let admin_state = AdminState::new(orchestrator.clone(), store, cache, prometheus);

        let listen_addr = config.admin.listen_addr;
        let listener = TcpListener::bind(listen_addr)
            .await
            .with_context(|| format!("failed to bind to {listen_addr}"))?;

        Ok(Self {
            lifecycle,
            orchestrator,
            admin_state,
            listener,
            refresh_interval: config.refresher.refresh_interval(),
            max_connections: config.admin.max_connections,
        })
    }

    /// Prime the cache, serve until `shutdown` resolves, then release every client.
    async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let Service {
            lifecycle,
            orchestrator,
            admin_state,
            listener,
            refresh_interval,
            max_connections,
        } = self;

        lifecycle
            .start()
            .await
            .context("failed to start router client cache")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let loop_state = admin_state.clone();
        let refresh_loop = spawn_refresh_loop(
            orchestrator,
            refresh_interval,
            shutdown_rx.clone(),
            move |result| loop_state.record_cycle(result),
        );

        let app = build_admin_router(admin_state, max_connections);
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "admin API listening");
        }

        let mut server_shutdown = shutdown_rx;
        let server_handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = server_shutdown.wait_for(|stop| *stop).await;
                })
                .await
        });

        shutdown.await;

        // Stops the refresh loop and starts draining the admin listener
        let _ = shutdown_tx.send(true);

        // The drain timeout starts at signal receipt
        match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
            Ok(Ok(Ok(()))) => info!("admin requests drained"),
            Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
            Ok(Err(e)) => error!(error = %e, "server task panicked"),
            Err(_) => warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            ),
        }

        // An in-flight cycle finishes within refresh_timeout before the loop exits
        if let Err(e) = refresh_loop.await {
            error!(error = %e, "refresh loop ended abnormally");
        }

        let released = lifecycle.stop().await;
        info!(released, "shutdown complete");
        Ok(())
    }
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
