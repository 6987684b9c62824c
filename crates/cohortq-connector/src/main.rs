//! CLI binary entry point for the cohortq connector.
//!
//! Usage:
//!   cohortq-connector [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>    Path to configuration TOML file
//!   -t, --topology <FILE>  Path to topology TOML file (overrides config)
//!   -v, --verbose          Increase logging verbosity
//!   --once                 Load the topology, print the tree status as JSON and exit

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use cohortq_connector::config::ConnectorConfig;
use cohortq_connector::logging::init_logging;
use cohortq_connector::{ConfigSync, QuotaCache, Topology};

/// cohortq connector - keeps a quota hierarchy in sync with its topology.
#[derive(Parser, Debug)]
#[command(name = "cohortq-connector")]
#[command(about = "Quota hierarchy cache fed from a topology source")]
#[command(version)]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to topology TOML file.
    #[arg(short, long, value_name = "FILE")]
    topology: Option<PathBuf>,

    /// Increase logging verbosity (can be repeated: -v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print the tree status as JSON after loading and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ConnectorConfig::load(cli.config.as_deref())?;
    if let Some(topology) = cli.topology {
        config.topology.path = Some(topology);
    }

    init_logging(&config.logging, cli.verbose)?;

    tracing::info!(
        topology = ?config.topology.path,
        max_pending = config.sync.max_pending,
        "Starting cohortq connector"
    );

    let cache = QuotaCache::new();
    let (actor, handle) = ConfigSync::new(cache.clone(), &config.sync);
    let sync_task = tokio::spawn(actor.run());

    let mut current = Topology::default();
    match &config.topology.path {
        Some(path) => {
            let topology = Topology::from_file(path)?;
            let sent = handle.push_topology(&current, &topology).await?;
            current = topology;
            let stats = handle.flush().await?;
            tracing::info!(
                events = sent,
                applied = stats.applied,
                parked = stats.parked,
                rejected = stats.rejected,
                "Topology loaded"
            );
        }
        None => tracing::warn!("No topology configured, starting with an empty tree"),
    }

    if cli.once {
        println!("{}", serde_json::to_string_pretty(&cache.status()?)?);
        drop(handle);
        sync_task.await?;
        return Ok(());
    }

    let status_secs = config.sync.status_interval_secs;
    let reload_secs = config.topology.reload_interval_secs;
    let mut status_tick = tokio::time::interval(Duration::from_secs(status_secs.max(1)));
    let mut reload_tick = tokio::time::interval(Duration::from_secs(reload_secs.max(1)));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                break;
            }
            _ = status_tick.tick(), if status_secs > 0 => {
                let stats = handle.stats().await;
                tracing::info!(
                    queues = cache.queue_ids().len(),
                    received = stats.received,
                    applied = stats.applied,
                    parked = stats.parked,
                    pending_deletions = stats.pending_deletions,
                    "Sync status"
                );
            }
            _ = reload_tick.tick(), if reload_secs > 0 => {
                let Some(path) = &config.topology.path else { continue };
                match Topology::from_file(path) {
                    Ok(next) => {
                        let sent = handle.push_topology(&current, &next).await?;
                        if sent > 0 {
                            tracing::info!(events = sent, "Topology changed, events sent");
                            current = next;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Topology reload failed, keeping previous"),
                }
            }
        }
    }

    drop(handle);
    sync_task.await?;
    Ok(())
}
