use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

use loadgen_node::config::LoadbeatConfig;
use loadgen_node::generator::SimulationManager;
use loadgen_node::hub::BroadcastHub;
use loadgen_node::management::start_management_api;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loadgen_node=info".into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!(
        "Starting Loadbeat load generation node v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration from file if available, otherwise use defaults
    let config = match LoadbeatConfig::from_file("config/default") {
        Ok(config) => {
            info!("Configuration loaded from config/default.toml");
            config
        }
        Err(e) => {
            warn!("Failed to load config file: {}, using defaults", e);
            LoadbeatConfig::default()
        }
    };

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    if config.metrics_enabled() {
        let addr: SocketAddr = config
            .metrics
            .listen_addr
            .parse()
            .context("Invalid metrics listen address")?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        initialize_metrics();
        info!(listen_addr = %addr, "Prometheus exporter started");
    } else {
        info!("Metrics export disabled");
    }

    let (hub, _hub_task) = BroadcastHub::spawn();
    let manager = Arc::new(SimulationManager::new(config.engine.clone(), hub.clone()));

    let api_config = config.management.clone();
    let api_manager = Arc::clone(&manager);
    let api_hub = hub.clone();
    let observer_buffer = config.engine.observer_buffer_size;
    let api_task = tokio::spawn(async move {
        start_management_api(api_config, api_manager, api_hub, observer_buffer).await
    });

    tokio::select! {
        result = api_task => {
            match result {
                Ok(Ok(())) => info!("Management API server exited"),
                Ok(Err(e)) => error!(error = %e, "Management API server failed"),
                Err(e) => error!(error = %e, "Management API task panicked"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, cancelling active simulations");
            manager.shutdown().await;
        }
    }

    Ok(())
}

/// Register metric descriptions with the exporter
fn initialize_metrics() {
    describe_counter!("loadgen_simulations_started", "Total simulations started");
    describe_counter!(
        "loadgen_simulations_finished",
        "Total simulations reaching a terminal state"
    );
    describe_counter!(
        "loadgen_requests_dispatched",
        "Requests dispatched across all simulations"
    );
    describe_counter!(
        "loadgen_dispatches_skipped",
        "Dispatches skipped due to worker pool saturation"
    );
    describe_counter!(
        "hub_messages_dropped",
        "Hub messages dropped for saturated observers"
    );
    describe_gauge!(
        "hub_connected_observers",
        "Currently connected hub observers"
    );
}
