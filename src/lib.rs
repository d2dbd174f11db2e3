pub mod cache;
pub mod cli;
pub mod http;
pub mod io_util;
pub mod logging;
pub mod metrics;
pub mod settings;

use std::io::Write;

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::Command;
use crate::settings::Settings;

pub use crate::cache::{
    CacheConfig, CacheError, CacheRoot, CacheStats, HttpCache, StorageError, SweepStats,
};
pub use crate::http::{CacheRequest, CacheResponse, ResponseResolver};

/// Opens the configured cache and runs one maintenance command, writing the
/// result to `out`.
pub fn run(settings: &Settings, command: Command, out: &mut dyn Write) -> Result<()> {
    let config = settings.cache_config()?;
    let cache = HttpCache::new(config).context("failed to open cache")?;

    match command {
        Command::Stats => {
            writeln!(out, "{cache}")?;
        }
        Command::Sweep => {
            let stats = cache.sweep_expired(settings.sweep_batch_size);
            info!(
                cache = cache.name(),
                removed = stats.removed,
                bytes = stats.bytes_reclaimed,
                "sweep finished"
            );
            writeln!(
                out,
                "removed {} expired entries, reclaimed {} bytes",
                stats.removed, stats.bytes_reclaimed
            )?;
        }
        Command::Purge => {
            let removed = cache.purge();
            info!(cache = cache.name(), removed, "cache purged");
            writeln!(out, "purged {removed} entries")?;
        }
        Command::Metrics => {
            write!(out, "{}", metrics::gather_text())?;
        }
    }
    Ok(())
}
