use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Federated coordinator node for a two-chain atomic-swap DEX.
#[derive(Parser)]
#[command(name = "dex-coordinator", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the coordinator: block interleaving, the pipeline, and the
    /// query API all run in the same process.
    Run {
        /// Path to the node's JSON config file.
        config: PathBuf,

        /// Query API bind host.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Query API bind port.
        #[arg(long, default_value = "8080")]
        port: u16,
    },

    /// Load and validate a config file, then exit.
    Validate {
        /// Path to the JSON config file.
        config: PathBuf,
    },

    /// Inspect persisted order book snapshots without starting the node.
    Snapshot {
        #[command(subcommand)]
        action: SnapshotCommand,
    },

    /// Serve the read-only query API against a snapshot file, standalone.
    Api {
        /// Path to the node's JSON config file (for API tuning knobs).
        config: PathBuf,

        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, default_value = "8080")]
        port: u16,
    },
}

#[derive(Subcommand)]
pub enum SnapshotCommand {
    /// List backup snapshots in a backup directory, newest first.
    List {
        /// Directory of `snapshot-<height>.json` backups.
        dir: PathBuf,
    },

    /// Print a summary of one snapshot file: order counts and chain heights.
    Inspect {
        /// Path to a snapshot JSON file.
        file: PathBuf,
    },
}
