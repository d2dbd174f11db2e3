use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Parser)]
#[command(name = "respcache", about = "Inspect and maintain an HTTP response cache")]
pub struct Cli {
    /// Path to the configuration file (defaults to ./respcache.toml if present).
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Print entry counts and bytes in use.
    Stats,
    /// Remove expired entries, up to the configured batch size.
    Sweep,
    /// Remove every cached entry.
    Purge,
    /// Print cache metrics in the Prometheus text format.
    Metrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}
