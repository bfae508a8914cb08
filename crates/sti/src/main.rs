//! sti - Speed Test Influx
//!
//! Runs the configured speed test, iperf and ping probes one at a time in
//! a fixed random order, forever, and writes every result to InfluxDB.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use sti_lib::{
    health::{components, HealthRegistry},
    observability::{AgentMetrics, StructuredLogger},
    Collaborators, Reporter, SchedulerBuilder,
};
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run network probes and store the results in InfluxDB
#[derive(Parser)]
#[command(name = "sti")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file, taking precedence over every other source
    #[arg(long, env = "STI_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::AgentConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?;

    let default_level = if cli.verbose || config.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().json())
        .init();

    let sink_settings = config.sink_settings();
    let host = sink_settings.hostname.clone().unwrap_or_default();
    let logger = StructuredLogger::new(&host);

    let plan = config.plan();
    logger.log_startup(AGENT_VERSION, plan.len());
    info!(
        interval_secs = config.interval.as_secs_f64(),
        sink = %sink_settings.url,
        bucket = %sink_settings.bucket,
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::SCHEDULER).await;
    health_registry.register(components::SINK).await;
    let metrics = AgentMetrics::new();

    let reporter = Reporter::influx(&sink_settings).context("Failed to create InfluxDB client")?;
    let collaborators = Collaborators::system().context("Failed to create probe clients")?;

    let scheduler = SchedulerBuilder::new()
        .probes(plan.build(&collaborators))
        .reporter(reporter)
        .interval(config.interval)
        .probe_timeout(config.probe_timeout)
        .logger(logger.clone())
        .metrics(metrics.clone())
        .health(health_registry.clone())
        .build()?;

    if let Some(port) = config.metrics_port {
        let app_state = Arc::new(api::AppState::new(
            health_registry.clone(),
            metrics.clone(),
            scheduler.sequence().describe(),
            config.interval,
        ));
        tokio::spawn(async move {
            if let Err(e) = api::serve(port, app_state).await {
                error!(error = %e, port, "API server stopped");
            }
        });
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let signal_logger = logger.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                signal_logger.log_shutdown("SIGINT received");
                let _ = shutdown_tx.send(());
            }
            Err(e) => error!(error = %e, "Failed to listen for ctrl-c"),
        }
    });

    scheduler.run(shutdown_rx).await;
    info!("Shutting down");

    Ok(())
}
