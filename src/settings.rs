use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail, ensure};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::cache::{CacheConfig, CacheRoot, DEFAULT_MAX_ENTRIES, DEFAULT_MAX_TOTAL_BYTES};
use crate::cli::{Cli, LogFormat};

fn default_name() -> String {
    "respcache".to_string()
}

fn default_expiry_ms() -> i64 {
    60_000
}

fn default_max_total_bytes() -> i64 {
    DEFAULT_MAX_TOTAL_BYTES as i64
}

fn default_max_entries() -> i64 {
    DEFAULT_MAX_ENTRIES as i64
}

fn default_sweep_batch_size() -> usize {
    1000
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Numeric limits are signed so that negative input is reported by
/// [`Settings::validate`] instead of failing deserialization.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_name")]
    pub name: String,
    /// Absent for an in-memory cache.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_expiry_ms")]
    pub default_expiry_ms: i64,
    /// 0 for unbounded.
    #[serde(default = "default_max_total_bytes")]
    pub max_total_bytes: i64,
    /// 0 for unbounded.
    #[serde(default = "default_max_entries")]
    pub max_entries: i64,
    #[serde(default)]
    pub persistent: bool,
    #[serde(default = "default_log_format")]
    pub log: LogFormat,
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: usize,
}

impl Settings {
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = Config::builder();
        let config_path = resolve_config_path(cli)?;

        builder = builder.add_source(File::from(config_path.clone()).required(true));

        builder = builder.add_source(
            Environment::with_prefix("RESPCACHE")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().map_err(to_anyhow)?;
        let mut settings: Settings = cfg.try_deserialize().map_err(to_anyhow)?;
        settings.apply_base_dir(&config_path);
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.name.trim().is_empty(), "cache name must not be empty");
        ensure!(
            self.default_expiry_ms >= 0,
            "negative expiry time (got {})",
            self.default_expiry_ms
        );
        ensure!(
            self.max_total_bytes >= 0,
            "negative maximum cache size (got {})",
            self.max_total_bytes
        );
        ensure!(
            self.max_entries >= 0,
            "negative maximum number of cached entries (got {})",
            self.max_entries
        );
        ensure!(
            self.sweep_batch_size > 0,
            "sweep_batch_size must be greater than 0 (got {})",
            self.sweep_batch_size
        );
        if self.persistent && self.cache_dir.is_none() {
            bail!("persistent caches need a cache_dir");
        }
        Ok(())
    }

    pub fn default_expiry(&self) -> Duration {
        Duration::from_millis(self.default_expiry_ms.max(0) as u64)
    }

    pub fn cache_config(&self) -> Result<CacheConfig> {
        self.validate()?;
        let root = match &self.cache_dir {
            Some(dir) => CacheRoot::Directory(dir.clone()),
            None => CacheRoot::Memory,
        };
        let max_entries =
            usize::try_from(self.max_entries).context("max_entries does not fit this platform")?;
        Ok(CacheConfig::new(self.name.clone(), root)
            .with_default_expiry(self.default_expiry())
            .with_max_total_bytes(self.max_total_bytes as u64)
            .with_max_entries(max_entries)
            .with_persistence(self.persistent))
    }

    fn apply_base_dir(&mut self, config_path: &Path) {
        let base_dir = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        if let Some(cache_dir) = self.cache_dir.clone() {
            self.cache_dir = Some(absolutize(&cache_dir, base_dir));
        }
    }
}

fn to_anyhow(err: ConfigError) -> anyhow::Error {
    anyhow::anyhow!(err)
}

fn resolve_config_path(cli: &Cli) -> Result<PathBuf> {
    if let Some(path) = cli.config.as_deref() {
        return Ok(path.to_path_buf());
    }

    for candidate in default_config_candidates() {
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    bail!(
        "no configuration file provided via --config and none found in default locations: {}",
        default_config_candidates()
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
}

fn default_config_candidates() -> [PathBuf; 2] {
    [
        PathBuf::from("/etc/respcache/respcache.toml"),
        PathBuf::from("respcache.toml"),
    ]
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
