//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the SAR fleet daemon."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use sar_common::config::AppConfig;
use sar_common::logging::init_tracing;
use sar_core::{
    BroadcastHub, BroadcastScheduler, EngineSettings, SituationEngine, StaleSweeper,
    TelemetryIngress,
};
use sar_metrics::{new_registry, DaemonMetrics, EngineMetrics};
use sar_net::FleetServerBuilder;
use sar_sim::MissionSimulator;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Search-and-rescue fleet state daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "ADDR", help = "Override the HTTP/WebSocket listen address")]
    listen: Option<SocketAddr>,

    #[arg(long, help = "Do not start the built-in mission simulator")]
    no_sim: bool,

    #[arg(long, help = "Override the simulator seed")]
    seed: Option<u64>,

    #[arg(long, value_name = "DIR", help = "Directory for rolling log files")]
    log_dir: Option<PathBuf>,

    #[arg(
        long,
        value_name = "FILTER",
        help = "Log filter (e.g. debug,sar_net=trace); wins over SAR_LOG and RUST_LOG"
    )]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/sard.toml"));
    candidates.push(PathBuf::from("configs/sard.example.toml"));

    let load_started = Instant::now();
    let loaded_config = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded_config.config;
    let load_duration = load_started.elapsed();

    let metrics_registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(metrics_registry.clone())?;
    daemon_metrics.observe_config_load(load_duration.as_secs_f64());
    daemon_metrics.inc_start();

    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    if cli.no_sim {
        config.simulation.enabled = false;
    }
    if let Some(seed) = cli.seed {
        config.simulation.seed = seed;
    }
    if let Some(dir) = cli.log_dir {
        config.logging.directory = dir;
    }
    let _log_guards = init_tracing("sard", &config.logging, cli.log_level.as_deref())?;

    match &loaded_config.source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; running with defaults"),
    }

    let engine_metrics = EngineMetrics::new(metrics_registry.clone())?;
    let engine = Arc::new(
        SituationEngine::new(EngineSettings::from(&config)).with_metrics(engine_metrics),
    );
    let hub = BroadcastHub::new(config.broadcast.channel_capacity);
    let ingress = TelemetryIngress::new(engine.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut tasks: Vec<JoinHandle<()>> = vec![
        tokio::spawn(BroadcastScheduler::new(engine.clone(), hub.clone()).run(shutdown_rx.clone())),
        tokio::spawn(StaleSweeper::new(engine.clone()).run(shutdown_rx.clone())),
    ];

    if config.simulation.enabled {
        let simulator = MissionSimulator::new(ingress.clone(), &config.simulation)
            .context("failed to build mission simulator")?;
        info!(
            seed = config.simulation.seed,
            drones = config.simulation.drone_count,
            "mission simulator enabled"
        );
        tasks.push(tokio::spawn(simulator.run(shutdown_rx.clone())));
    } else {
        info!("mission simulator disabled; waiting for external drone links");
    }

    let server = FleetServerBuilder::new(config.server.listen, ingress, hub)
        .with_limits(config.server.max_observers, config.server.max_drone_links)
        .with_metrics_registry(metrics_registry)
        .spawn()
        .await?;
    info!(address = %server.local_addr(), "daemon running; waiting for termination signal");

    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");
    let _ = shutdown_tx.send(true);
    server.shutdown().await?;
    for task in tasks {
        if let Err(err) = task.await {
            warn!(error = %err, "background task ended abnormally");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn logging_flags_are_optional_overrides() {
        let cli = Cli::try_parse_from(["sard", "--log-dir", "/var/log/sard", "--log-level", "debug"])
            .unwrap();
        assert_eq!(cli.log_dir, Some(PathBuf::from("/var/log/sard")));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));

        let bare = Cli::try_parse_from(["sard"]).unwrap();
        assert!(bare.log_dir.is_none() && bare.log_level.is_none());
    }
}
