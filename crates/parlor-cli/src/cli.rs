//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Live milking parlor monitor.
///
/// Tracks which animal occupies each slot, how much it has produced and
/// how long it has been there, from a polled store, a push stream or a
/// simulation.
#[derive(Debug, Parser)]
#[command(name = "parlor", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Poll the measurement store once and print the slot table.
    Status {
        /// Print the snapshot as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Poll a measurement source continuously.
    ///
    /// Reads `add N`, `remove N` and `quit` from stdin.
    Watch {
        /// Where open runs come from.
        #[arg(long, value_enum, default_value_t = SourceKind::Db)]
        source: SourceKind,

        /// Stop after this many poll ticks.
        #[arg(long)]
        ticks: Option<u64>,

        /// Print snapshots as JSON lines.
        #[arg(long)]
        json: bool,
    },

    /// Apply START/UPDATE/STOP events, one JSON object per line.
    ///
    /// Reads stdin unless `--address` (or `push.address`) names a TCP peer.
    Listen {
        /// TCP address of the event stream, e.g. `127.0.0.1:7070`.
        #[arg(long)]
        address: Option<String>,

        /// Stop after this many events.
        #[arg(long)]
        ticks: Option<u64>,

        /// Print snapshots as JSON lines.
        #[arg(long)]
        json: bool,
    },

    /// Run a synthetic parlor.
    ///
    /// Reads `add N`, `remove N` and `quit` from stdin.
    Simulate {
        /// Seed for a reproducible session.
        #[arg(long)]
        seed: Option<u64>,

        /// Stop after this many simulation ticks.
        #[arg(long)]
        ticks: Option<u64>,

        /// Print snapshots as JSON lines.
        #[arg(long)]
        json: bool,
    },
}

/// Poll source for `watch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// The SQLite measurement store at `database_path`.
    Db,
    /// The HTTP relay at `live_url`.
    Live,
}
