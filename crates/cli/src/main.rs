//! `cadence` -- lifecycle decision engine toolchain.
//!
//! Subcommands:
//! - `validate`  -- load and validate a snapshot document
//! - `simulate`  -- drive events through an in-memory engine
//! - `serve`     -- run the HTTP API with the periodic scheduler

mod serve;
mod simulate;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};

use cadence_core::Snapshot;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// cadence lifecycle decision engine toolchain.
#[derive(Parser)]
#[command(name = "cadence", version, about = "cadence lifecycle decision engine toolchain")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a snapshot document
    Validate {
        /// Path to the snapshot JSON file
        snapshot: PathBuf,
    },

    /// Drive events through an in-memory engine and print the outcomes
    Simulate {
        /// Path to the snapshot JSON file
        snapshot: PathBuf,
        /// User to process events for
        #[arg(long, default_value = "sim-user")]
        user: String,
        /// Event tag (e.g. GENERATION_COMPLETED)
        #[arg(long, conflicts_with = "script")]
        event: Option<String>,
        /// Inline JSON event payload
        #[arg(long, default_value = "{}")]
        payload: String,
        /// Path to a JSON script: an array of {"event", "payload"} steps
        #[arg(long)]
        script: Option<PathBuf>,
        /// Run a sweep tick after the events
        #[arg(long)]
        sweep: bool,
    },

    /// Start the cadence HTTP API server
    Serve {
        /// Path to the snapshot JSON file
        snapshot: PathBuf,
        /// Port to listen on
        #[arg(long, default_value = "8080")]
        port: u16,
        /// Seconds between scheduler sweeps
        #[arg(long, default_value = "60")]
        sweep_interval: u64,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Validate { snapshot } => run_validate(&snapshot, cli.output),
        Commands::Simulate {
            snapshot,
            user,
            event,
            payload,
            script,
            sweep,
        } => simulate::run(&snapshot, &user, event.as_deref(), &payload, script.as_deref(), sweep).await,
        Commands::Serve {
            snapshot,
            port,
            sweep_interval,
        } => serve::run(&snapshot, port, sweep_interval).await,
    };
    process::exit(code);
}

/// Load and validate a snapshot, reporting what it contains.
fn run_validate(path: &Path, output: OutputFormat) -> i32 {
    let snapshot = match load_snapshot(path) {
        Ok(snapshot) => snapshot,
        Err(message) => {
            match output {
                OutputFormat::Text => eprintln!("invalid snapshot: {}", message),
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::json!({ "valid": false, "error": message })
                ),
            }
            return 1;
        }
    };

    let summary = serde_json::json!({
        "valid": true,
        "activeVersion": { "id": snapshot.version.id, "name": snapshot.version.name },
        "retainedVersions": snapshot.retained.len(),
        "states": snapshot.version.states.len(),
        "transitions": snapshot.version.transitions.len(),
        "rules": snapshot.rules.len(),
        "overlays": snapshot.overlays.len(),
    });
    match output {
        OutputFormat::Text => {
            println!(
                "snapshot OK: version {} '{}' ({} states, {} transitions), {} rules, {} overlays",
                snapshot.version.id,
                snapshot.version.name,
                snapshot.version.states.len(),
                snapshot.version.transitions.len(),
                snapshot.rules.len(),
                snapshot.overlays.len(),
            );
        }
        OutputFormat::Json => match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("failed to render summary: {}", e),
        },
    }
    0
}

/// Read and validate a snapshot file.
pub(crate) fn load_snapshot(path: &Path) -> Result<Snapshot, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    Snapshot::from_str(&text).map_err(|e| e.to_string())
}
