//! Gateway entry point.
//!
//! - Loads and validates configuration (a corrupt or missing file is fatal
//!   before the listener binds).
//! - Initializes structured logging and the Prometheus exporter.
//! - Constructs the security gateway and validation middleware.
//! - Spawns the maintenance sweep and the config hot-reload watcher.
//! - Serves the WebSocket endpoint with graceful shutdown.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use live_gateway::config::{load_config, watcher::ConfigWatcher, GatewayConfig};
use live_gateway::gateway::middleware::{HandlerRegistry, ValidationMiddleware};
use live_gateway::gateway::SecurityGateway;
use live_gateway::http::{create_router, AppState};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "live-gateway")]
#[command(about = "Admission-control gateway for live-event messaging", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Configuration comes first: a bad config must stop the process before
    // anything binds.
    let config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load configuration from {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => GatewayConfig::default(),
    };

    let default_filter = format!(
        "live_gateway={},tower_http=warn",
        config.observability.log_level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        bind_address = %config.listener.bind_address,
        origins = config.origins.allowed.len(),
        events = config.events.len(),
        audit = config.audit.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => {
                if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
                    tracing::error!("Failed to start Prometheus exporter: {}", e);
                } else {
                    tracing::info!(address = %addr, "Prometheus exporter started");
                }
            }
            Err(_) => {
                tracing::error!(
                    metrics_address = %config.observability.metrics_address,
                    "Failed to parse metrics address"
                );
            }
        }
    }

    let bind_address = config.listener.bind_address.clone();
    let gateway = SecurityGateway::new(config);

    // Event delivery is the host application's concern; handlers registered
    // here receive validated, sanitized payloads.
    let handlers = Arc::new(HandlerRegistry::new());
    let middleware = ValidationMiddleware::new(gateway.clone(), handlers);

    let maintenance = tokio::spawn(gateway.clone().run_maintenance());

    // Hot reload: a validated config file replaces the running config; an
    // invalid one is rejected by the watcher and logged.
    let mut _watcher = None;
    if let Some(path) = &cli.config {
        let (config_watcher, mut updates) = ConfigWatcher::new(path);
        match config_watcher.run() {
            Ok(handle) => {
                _watcher = Some(handle);
                let reload_gateway = gateway.clone();
                tokio::spawn(async move {
                    while let Some(new_config) = updates.recv().await {
                        reload_gateway.apply_config(new_config);
                    }
                });
            }
            Err(e) => tracing::error!("Failed to start config watcher: {}", e),
        }
    }

    let state = Arc::new(AppState { middleware });
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind to {}: {}", bind_address, e);
            std::process::exit(1);
        });
    tracing::info!(address = %bind_address, "Gateway listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    maintenance.abort();
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received terminate signal"),
    }
}
