use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tempfile::TempDir;

pub struct TestDirs {
    _temp: TempDir,
    pub cache_root: PathBuf,
    pub config_path: PathBuf,
}

impl TestDirs {
    pub fn new() -> Result<Self> {
        let temp = TempDir::new()?;
        let cache_root = temp.path().join("cache");
        fs::create_dir_all(&cache_root)?;
        let config_path = temp.path().join("respcache.toml");
        Ok(Self {
            _temp: temp,
            cache_root,
            config_path,
        })
    }

    /// Active layout directory of the cache called `name`.
    pub fn active_dir(&self, name: &str) -> PathBuf {
        self.cache_root.join(name).join("v1")
    }

    pub fn write_config(&self, contents: &str) -> Result<()> {
        fs::write(&self.config_path, contents)?;
        Ok(())
    }
}

/// Body files below `dir`, skipping metadata sidecars.
pub fn body_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_files(dir, &mut files)?;
    files.retain(|path| path.extension().is_none());
    files.sort();
    Ok(files)
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}
