//! # Initialization
//!
//! Controller initialization logic including rustls setup, tracing,
//! metrics, server startup, and Kubernetes client setup.

use crate::config::ControllerConfig;
use crate::constants::DEFAULT_SERVER_POLL_INTERVAL_MS;
use crate::controller::cluster::KubeBackend;
use crate::controller::reconciler::Reconciler;
use crate::controller::vault::HttpConnector;
use crate::observability::PrometheusMetrics;
use crate::runtime::error_policy::BackoffStates;
use crate::runtime::watch_loop::{ControllerContext, WatchScope};
use crate::server::{start_server, ServerState};
use anyhow::{Context, Result};
use kube::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Everything the watch loop needs, built once at startup
pub struct InitializationResult {
    pub client: Client,
    pub config: ControllerConfig,
    pub scope: WatchScope,
    pub context: Arc<ControllerContext>,
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("scope", &self.scope)
            .field(
                "server_ready",
                &self
                    .server_state
                    .is_ready
                    .load(std::sync::atomic::Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - Reconciler setup
pub async fn initialize() -> Result<InitializationResult> {
    // Must happen before anything builds a TLS client
    let provider_installed = rustls::crypto::ring::default_provider()
        .install_default()
        .is_ok();

    let config = ControllerConfig::from_env();
    init_tracing(&config);

    if !provider_installed {
        warn!("rustls crypto provider was already installed, keeping the existing one");
    }

    info!("Starting Vault Unseal Controller");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    info!(config = ?config, "Loaded controller configuration");

    let metrics = Arc::new(PrometheusMetrics::new().context("Failed to register metrics")?);
    let server_state = Arc::new(ServerState::new(Arc::clone(&metrics)));

    let server_state_clone = Arc::clone(&server_state);
    let server_port = config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });

    wait_for_server_ready(
        &server_state,
        &server_handle,
        config.server_startup_timeout(),
        Duration::from_millis(DEFAULT_SERVER_POLL_INTERVAL_MS),
    )
    .await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let backend = Arc::new(KubeBackend::new(client.clone()));
    let reconciler = Reconciler::new(
        Arc::<KubeBackend>::clone(&backend),
        Arc::<KubeBackend>::clone(&backend),
        backend,
        Arc::new(HttpConnector::new(config.vault_request_timeout())),
        metrics,
        config.default_reconcile_interval(),
    );
    let context = Arc::new(ControllerContext {
        reconciler,
        backoff: BackoffStates::from_config(&config),
    });
    let scope = WatchScope::from_option(config.watch_namespace.clone());

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        config,
        scope,
        context,
        server_state,
    })
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_tracing(config: &ControllerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("vault_unseal_controller={}", config.log_level.to_lowercase()).into()
    });

    let result = if config.log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    if let Err(e) = result {
        // Tests and embedders may have installed their own subscriber
        warn!("Tracing subscriber init returned error: {}", e);
    }
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    startup_timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state
            .is_ready
            .load(std::sync::atomic::Ordering::Relaxed)
        {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }
}
