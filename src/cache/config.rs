use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use super::CacheError;

pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_TOTAL_BYTES: u64 = 64 * 1024 * 1024;
pub const DEFAULT_MAX_ENTRIES: usize = 4096;

/// Where cached bodies live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheRoot {
    Memory,
    /// Bodies are written below `<dir>/<cache name>`.
    Directory(PathBuf),
}

impl fmt::Display for CacheRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheRoot::Memory => f.write_str("memory"),
            CacheRoot::Directory(dir) => write!(f, "{}", dir.display()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Diagnostic name; also the subdirectory of a directory root.
    pub name: String,
    pub root: CacheRoot,
    /// Lifetime of responses that carry no freshness information.
    pub default_expiry: Duration,
    /// Budget for the sum of stored bodies, 0 for unbounded.
    pub max_total_bytes: u64,
    /// Budget for the number of stored variants, 0 for unbounded.
    pub max_entries: usize,
    /// Keep disk entries across restarts and reload them on start.
    pub persistent: bool,
}

impl CacheConfig {
    pub fn new(name: impl Into<String>, root: CacheRoot) -> Self {
        Self {
            name: name.into(),
            root,
            default_expiry: DEFAULT_EXPIRY,
            max_total_bytes: DEFAULT_MAX_TOTAL_BYTES,
            max_entries: DEFAULT_MAX_ENTRIES,
            persistent: false,
        }
    }

    pub fn memory(name: impl Into<String>) -> Self {
        Self::new(name, CacheRoot::Memory)
    }

    pub fn directory(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self::new(name, CacheRoot::Directory(dir.into()))
    }

    pub fn with_default_expiry(mut self, expiry: Duration) -> Self {
        self.default_expiry = expiry;
        self
    }

    pub fn with_max_total_bytes(mut self, max_total_bytes: u64) -> Self {
        self.max_total_bytes = max_total_bytes;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_persistence(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        if self.name.trim().is_empty() {
            return Err(CacheError::Config("cache name is empty".to_string()));
        }
        if !is_single_path_segment(&self.name) {
            return Err(CacheError::Config(format!(
                "cache name '{}' must be a single path segment",
                self.name
            )));
        }
        if let CacheRoot::Directory(dir) = &self.root
            && dir.as_os_str().is_empty()
        {
            return Err(CacheError::Config(
                "cache root directory is empty".to_string(),
            ));
        }
        Ok(())
    }

    pub(super) fn cache_dir(&self) -> Option<PathBuf> {
        match &self.root {
            CacheRoot::Memory => None,
            CacheRoot::Directory(dir) => Some(dir.join(&self.name)),
        }
    }
}

fn is_single_path_segment(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}
