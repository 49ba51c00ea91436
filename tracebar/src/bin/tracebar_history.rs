//! Offline inspection of a tracebar snapshot history directory.

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::path::PathBuf;
use std::process::ExitCode;

use tracebar::{FileStorage, SnapshotStorage};

#[derive(Parser, Debug)]
#[command(
    name = "tracebar-history",
    version,
    about = "Inspect and prune persisted tracebar snapshots"
)]
struct Cli {
    /// History directory (defaults to TRACEBAR_HISTORY_DIR)
    #[arg(long, env = "TRACEBAR_HISTORY_DIR")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List recent snapshots, newest first
    List {
        #[arg(default_value_t = 20)]
        limit: usize,
    },

    /// Print one snapshot as JSON
    Show { id: String },

    /// Keep only the newest <max> snapshots
    Prune { max: usize },
}

fn run(cli: Cli) -> Result<(), String> {
    let storage = FileStorage::open(&cli.dir).map_err(|e| e.to_string())?;

    match cli.command {
        Command::List { limit } => {
            let entries = storage.list_snapshots(limit).map_err(|e| e.to_string())?;
            if entries.is_empty() {
                println!("No snapshots in {}", cli.dir.display());
            }
            for meta in entries {
                let elapsed = meta
                    .elapsed_ms
                    .map(|ms| format!("{ms} ms"))
                    .unwrap_or_else(|| "-".to_string());
                let size = meta
                    .size
                    .map(|bytes| format!("{bytes} B"))
                    .unwrap_or_else(|| "-".to_string());
                println!("{}  {}  {:>12}  {:>10}", meta.id, meta.ts, elapsed, size);
            }
        }
        Command::Show { id } => match storage.load_snapshot(&id).map_err(|e| e.to_string())? {
            Some(payload) => {
                let text = serde_json::to_string_pretty(&payload).map_err(|e| e.to_string())?;
                println!("{text}");
            }
            None => return Err(format!("snapshot '{id}' not found")),
        },
        Command::Prune { max } => {
            let removed = storage.enforce_retention(max).map_err(|e| e.to_string())?;
            println!("Removed {removed} snapshot(s)");
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    dotenv().ok();
    env_logger::init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("Error: {msg}");
            ExitCode::FAILURE
        }
    }
}
