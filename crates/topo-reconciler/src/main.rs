//! topo-reconcile: applies a host network snapshot to a topology state file.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use topo_reconciler::{Reconciler, ReconcilerConfig, Snapshot, DEFAULT_CONFIG_PATH};
use topo_store::{MemoryStore, NodeStatus, SharedStore};
use tracing::{error, info};

/// Reconcile a host's network snapshot against the topology graph
#[derive(Parser, Debug)]
#[command(name = "topo-reconcile")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Snapshot JSON reported by the host
    #[arg(short = 's', long)]
    snapshot: PathBuf,

    /// Topology state file (JSON), created when missing
    #[arg(long)]
    state: PathBuf,

    /// Hostname of the node the snapshot belongs to
    #[arg(short = 'H', long)]
    hostname: String,

    /// Lifecycle status used when the node is registered
    #[arg(long, default_value = "commissioning")]
    status: NodeStatus,

    /// Reconciler configuration (TOML)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Report changes without writing the state file
    #[arg(long)]
    dry_run: bool,
}

fn init_logging(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();
}

fn load_state(path: &Path) -> Result<MemoryStore> {
    match fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text)
            .with_context(|| format!("failed to parse state file {}", path.display())),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "State file not found, starting from an empty graph");
            Ok(MemoryStore::new())
        }
        Err(e) => Err(e).with_context(|| format!("failed to read state file {}", path.display())),
    }
}

fn save_state(path: &Path, store: &MemoryStore) -> Result<()> {
    let text = serde_json::to_string_pretty(store.state())?;
    fs::write(path, text)
        .with_context(|| format!("failed to write state file {}", path.display()))?;
    Ok(())
}

fn run(args: &Args) -> Result<()> {
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = ReconcilerConfig::load_or_default(&config_path)
        .with_context(|| format!("failed to load configuration {}", config_path.display()))?;
    let snapshot = Snapshot::load(&args.snapshot)
        .with_context(|| format!("failed to load snapshot {}", args.snapshot.display()))?;

    let shared = SharedStore::new(load_state(&args.state)?);
    let report = Reconciler::new(config)
        .reconcile_host(&shared, &args.hostname, args.status, &snapshot)
        .with_context(|| format!("failed to reconcile {}", args.hostname))?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if args.dry_run {
        info!(mutations = report.mutations, "Dry run, state file left unchanged");
    } else {
        save_state(&args.state, &shared.into_inner())?;
        info!(path = %args.state.display(), mutations = report.mutations, "Saved state");
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
