//! Parking Gateway - LPR-driven parking session tracking and billing
//!
//! Single-binary gateway for a parking lot: embedded MQTT broker, LPR
//! observation ingest, session ledger with billing, occupancy tracking,
//! and Prometheus metrics.
//!
//! Module structure:
//! - `domain/` - Core business types (ParkingSession, PlateId, wire formats)
//! - `io/` - External interfaces (MQTT, session store, Prometheus)
//! - `services/` - Business logic (Pipeline, SessionLedger, Deduplicator, Occupancy)
//! - `infra/` - Infrastructure (Config, Metrics, Broker)

use clap::Parser;
use parking_gateway::infra::{Config, Metrics};
use parking_gateway::io::{create_egress_channel, JsonlStore, MqttPublisher};
use parking_gateway::services::Pipeline;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Parking Gateway - LPR session tracking and billing
#[derive(Parser, Debug)]
#[command(name = "parking-gateway", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = env!("GIT_HASH"), "parking-gateway starting");

    // Parse command line arguments using clap
    let args = Args::parse();

    // Load configuration from TOML file (needed for broker config)
    let config = Config::load_from_path(&args.config);

    // Start embedded MQTT broker with config
    parking_gateway::infra::broker::start_embedded_broker(&config);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        observations_topic = %config.observations_topic(),
        commands_topic = %config.commands_topic(),
        total_slots = %config.total_slots(),
        rate_per_hour = %config.rate_per_hour(),
        cooldown_secs = %config.cooldown_secs(),
        store_file = %config.store_file(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());

    // Open the session store, replaying any existing log
    let store = JsonlStore::open(config.store_file())?;

    // Create event channel (bounded for backpressure)
    let (event_tx, event_rx) = mpsc::channel(1000);

    // Start MQTT client
    let mqtt_config = config.clone();
    let mqtt_metrics = metrics.clone();
    let mqtt_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = parking_gateway::io::mqtt::start_mqtt_client(
            &mqtt_config,
            event_tx,
            mqtt_metrics,
            mqtt_shutdown,
        )
        .await
        {
            tracing::error!(error = %e, "MQTT client error");
        }
    });

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = parking_gateway::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_site,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Start metrics reporter (lock-free reads with full summary)
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            let summary = metrics_clone.report();
            summary.log();
        }
    });

    // Create MQTT egress channel and publisher (if enabled)
    let egress_sender = if config.egress_enabled() {
        let (egress_sender, egress_rx) = create_egress_channel(1000, config.site_id().to_string());

        // Start MQTT egress publisher
        let publisher = MqttPublisher::new(&config, egress_rx);
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });

        // Start metrics egress publisher (separate from logging)
        let metrics_egress = egress_sender.clone();
        let metrics_for_egress = metrics.clone();
        let egress_interval = config.egress_metrics_interval_secs();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(egress_interval));
            loop {
                interval.tick().await;
                let summary = metrics_for_egress.report();
                metrics_egress.send_metrics(summary);
            }
        });

        Some(egress_sender)
    } else {
        None
    };

    // Start pipeline (main event processing loop)
    let mut pipeline = Pipeline::new(config, Box::new(store), metrics, egress_sender);
    pipeline.restore_occupancy();
    info!("pipeline_started");

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run pipeline - consumes events until channel closes
    pipeline.run(event_rx).await;

    info!("parking-gateway shutdown complete");
    Ok(())
}
