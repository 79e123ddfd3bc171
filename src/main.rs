//! Palisade CLI entry point.
//!
//! Provides `run` and `list` subcommands for executing the registered
//! compliance probes against the configured cluster or listing them without
//! touching a cluster. The process exit code is the maximum exit status
//! across all probes (zero means every probe completed successfully).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use palisade::audit::{AuditSettings, Summary};
use palisade::cluster::{ClusterClient, KubeApiClient, PodLifecycle, ReasonTable};
use palisade::config::PalisadeConfig;
use palisade::engine::ProbeRegistry;
use palisade::{logging, probes};

/// Exit code reported when the run is interrupted before completion.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Palisade — compliance-probe runner with a tamper-resistant audit trail.
#[derive(Parser)]
#[command(name = "palisade", version, about)]
struct Cli {
    /// Subcommand to execute; defaults to `run`.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Execute all registered probes against the configured cluster.
    Run,
    /// List the registered probes without contacting a cluster.
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let code = handle_run().await?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Command::List => handle_list(),
    }
}

/// Execute all probes and return the process exit code.
async fn handle_run() -> anyhow::Result<i32> {
    let config = PalisadeConfig::load().context("failed to load configuration")?;
    let guard = logging::init_production(Path::new(&config.audit.logs_dir))?;
    info!("palisade starting");

    let summary = Arc::new(Summary::new(AuditSettings::from_config(&config.audit)));
    let client: Arc<dyn ClusterClient> = Arc::new(
        KubeApiClient::new(&config.cluster).context("failed to construct cluster client")?,
    );
    let lifecycle = Arc::new(PodLifecycle::new(
        client,
        ReasonTable::default(),
        Duration::from_secs(config.engine.wait_timeout_seconds),
    ));

    let registry = ProbeRegistry::new(config.engine.tag_exclusions.clone());
    probes::register_builtin(&registry, &summary, &lifecycle, &config);
    info!(probes = registry.len(), "probe registry populated");

    // The interrupt listener is the only concurrent arm: probes themselves
    // run one at a time. An in-flight pod wait is abandoned, not cancelled;
    // created workloads are removed best-effort before exiting.
    let status = tokio::select! {
        result = registry.run_all(&summary) => result.context("probe run halted")?,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupt received, cleaning up probe workloads");
            lifecycle.cleanup().await;
            drop(guard);
            return Ok(INTERRUPTED_EXIT_CODE);
        }
    };

    summary.set_status();
    summary.print_summary();
    info!(status, "overall probe completion status");
    drop(guard);
    Ok(status)
}

/// Print every registered probe as `group/name`.
fn handle_list() -> anyhow::Result<()> {
    logging::init_cli();
    for descriptor in probes::builtin_descriptors() {
        println!("{}/{}", descriptor.group, descriptor.name);
    }
    Ok(())
}
