//! lotflow CLI - run scripted engine operations and check configuration.
//!
//! # Usage
//!
//! ```bash
//! # Apply a seed, then every scripted operation; one JSON result per line
//! lotflow run --seed seed.json --script ops.json
//!
//! # Same, with configuration from a file instead of LOTFLOW_* variables
//! lotflow run --config lotflow.json --script ops.json
//!
//! # Validate configuration
//! lotflow check-config
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use lotflow_core::ActorId;
use lotflow_events::{EventBus, EventEnvelope, InMemoryEventBus};
use lotflow_infra::{EngineConfig, InMemoryStore, InventoryEngine, ensure_system_warehouses};
use lotflow_observability::LogFormat;

mod script;

use script::{Seed, Step};

#[derive(Parser)]
#[command(name = "lotflow")]
#[command(author, version, about = "Lot-based inventory engine tools")]
struct Cli {
    /// Human-readable logs instead of JSON
    #[arg(long, global = true)]
    pretty_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script of engine operations against an in-memory store
    Run {
        /// Engine configuration file (defaults to LOTFLOW_* variables)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Reference data and opening lots to load first
        #[arg(long)]
        seed: Option<PathBuf>,

        /// JSON array of operations
        #[arg(long)]
        script: PathBuf,

        /// Actor for steps that do not name one
        #[arg(long)]
        actor: Option<ActorId>,
    },
    /// Validate the engine configuration and print it
    CheckConfig {
        /// Engine configuration file (defaults to LOTFLOW_* variables)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let format = if cli.pretty_logs {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    };
    lotflow_observability::init_with(format, "info");

    match cli.command {
        Commands::Run {
            config,
            seed,
            script,
            actor,
        } => run(config.as_deref(), seed.as_deref(), &script, actor),
        Commands::CheckConfig { config } => check_config(config.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => EngineConfig::from_env().context("loading configuration from environment"),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn check_config(path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(path)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    info!(
        central_warehouse = %config.central_warehouse,
        incidents_warehouse = %config.incidents_warehouse,
        embark_buffer_warehouse = %config.embark_buffer_warehouse,
        lock_timeout_ms = config.lock_timeout_ms,
        "configuration is valid"
    );
    Ok(())
}

fn run(
    config: Option<&Path>,
    seed: Option<&Path>,
    script: &Path,
    actor: Option<ActorId>,
) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let steps: Vec<Step> = read_json(script)?;
    let seed: Seed = match seed {
        Some(path) => read_json(path)?,
        None => Seed::default(),
    };

    let store = InMemoryStore::from_config(&config);
    ensure_system_warehouses(&store, &config).context("registering system warehouses")?;
    let bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> = Arc::new(InMemoryEventBus::new());
    let notifications = bus.subscribe();
    let engine = InventoryEngine::new(store, bus, config);

    let actor = actor.unwrap_or_default();
    script::apply_seed(&engine, seed, actor).context("applying seed")?;
    notifications.drain();

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let total = steps.len();
    let mut failed = 0;
    for (index, step) in steps.into_iter().enumerate() {
        let mut report = script::execute(&engine, index, step, actor);
        report.events = notifications
            .drain()
            .iter()
            .map(|envelope| envelope.event_type().to_string())
            .collect();
        if !report.ok {
            failed += 1;
        }
        serde_json::to_writer(&mut out, &report)?;
        writeln!(out)?;
    }
    out.flush()?;

    if failed > 0 {
        warn!(steps = total, failed, "script finished with failed steps");
    } else {
        info!(steps = total, "script finished");
    }
    Ok(())
}
