use std::collections::HashSet;
use std::fs;
use std::io::{self, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use blake3::Hasher;
use tracing::{debug, info, warn};

use super::entry::{PersistedVariant, Variant, from_millis};
use super::key::CacheKey;
use super::store::{BlobHandle, DiskBlobStore};
use super::{CacheState, SweepStats};

const CACHE_LAYOUT_VERSION: u32 = 1;
const CACHE_VERSION_PREFIX: &str = "v";
const CACHE_TOMBSTONE_PREFIX: &str = "tombstone-";

pub(super) fn cache_version_dir(root: &Path) -> PathBuf {
    root.join(format!("{CACHE_VERSION_PREFIX}{CACHE_LAYOUT_VERSION}"))
}

fn parse_cache_version(name: &str) -> Option<u32> {
    let version = name.strip_prefix(CACHE_VERSION_PREFIX)?;
    if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    version.parse().ok()
}

fn tombstone_dir_name(version_name: &str) -> String {
    format!(
        "{CACHE_TOMBSTONE_PREFIX}{version_name}-{}",
        uuid::Uuid::new_v4()
    )
}

/// Creates `<root>/v<N>` and returns it with directories left over from
/// other layout versions, which are renamed to tombstones first.
///
/// A non-persistent cache starts from an empty root.
pub(super) fn prepare_cache_dir(root: &Path, persistent: bool) -> io::Result<(PathBuf, Vec<PathBuf>)> {
    if !persistent {
        match fs::remove_dir_all(root) {
            Ok(()) => debug!(path = %root.display(), "cleared transient cache dir"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
    }

    let active_name = format!("{CACHE_VERSION_PREFIX}{CACHE_LAYOUT_VERSION}");
    let active_dir = cache_version_dir(root);
    fs::create_dir_all(&active_dir)?;

    let mut cleanup_dirs = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if name_str == active_name {
            continue;
        }
        if name_str.starts_with(CACHE_TOMBSTONE_PREFIX) {
            cleanup_dirs.push(entry.path());
            continue;
        }
        if parse_cache_version(&name_str).is_some() {
            let tombstone_path = root.join(tombstone_dir_name(&name_str));
            if let Err(err) = fs::rename(entry.path(), &tombstone_path) {
                warn!(
                    error = %err,
                    path = %entry.path().display(),
                    "failed to tombstone old cache dir"
                );
                continue;
            }
            cleanup_dirs.push(tombstone_path);
        }
    }

    Ok((active_dir, cleanup_dirs))
}

pub(super) fn remove_cache_dirs(dirs: Vec<PathBuf>) {
    for dir in dirs {
        match fs::remove_dir_all(&dir) {
            Ok(()) => crate::metrics::record_cache_cleanup_dir(),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                warn!(
                    error = %err,
                    path = %dir.display(),
                    "failed to remove old cache dir"
                );
            }
        }
    }
}

/// A persisted variant whose body checked out.
#[derive(Debug)]
pub(super) struct RestoredEntry {
    key: CacheKey,
    variant: Variant,
}

/// Reads every `.meta` file under the store and keeps the entries whose
/// body is present, unexpired and matches its recorded hash.
///
/// Everything else on disk, including orphaned bodies and temp files, is
/// removed. Entries come back oldest first.
pub(super) fn scan_persisted(store: &DiskBlobStore, now: SystemTime) -> io::Result<Vec<RestoredEntry>> {
    store.remove_temp_files()?;

    let mut restored = Vec::new();
    for shard1 in fs::read_dir(store.dir())? {
        let shard1 = shard1?;
        if !shard1.file_type()?.is_dir() {
            continue;
        }
        for shard2 in fs::read_dir(shard1.path())? {
            let shard2 = shard2?;
            if !shard2.file_type()?.is_dir() {
                continue;
            }
            let mut meta_files = Vec::new();
            let mut other_files = Vec::new();
            for entry in fs::read_dir(shard2.path())? {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                let path = entry.path();
                if path.extension().and_then(|ext| ext.to_str()) == Some("meta") {
                    meta_files.push(path);
                } else {
                    other_files.push(path);
                }
            }

            let mut live = HashSet::new();
            for meta in meta_files {
                if let Some(entry) = restore_entry(store, &meta, now) {
                    live.insert(entry.variant.handle.as_str().to_string());
                    restored.push(entry);
                }
            }

            for path in other_files {
                let keep = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| live.contains(name))
                    .unwrap_or(false);
                if !keep {
                    fs::remove_file(&path).ok();
                }
            }

            if fs::read_dir(shard2.path())?.next().is_none() {
                fs::remove_dir(shard2.path()).ok();
            }
        }
        if fs::read_dir(shard1.path())?.next().is_none() {
            fs::remove_dir(shard1.path()).ok();
        }
    }

    restored.sort_by_key(|entry| entry.variant.stored_at);
    Ok(restored)
}

fn restore_entry(store: &DiskBlobStore, meta_path: &Path, now: SystemTime) -> Option<RestoredEntry> {
    let data = match fs::read(meta_path) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, path = %meta_path.display(), "failed to read cache metadata");
            return None;
        }
    };

    let persisted: PersistedVariant = match serde_json::from_slice(&data) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, path = %meta_path.display(), "failed to parse cache metadata");
            fs::remove_file(meta_path).ok();
            return None;
        }
    };

    let stem = meta_path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    let Some(handle) = BlobHandle::parse(stem) else {
        warn!(path = %meta_path.display(), "unexpected cache metadata name; removing entry");
        fs::remove_file(meta_path).ok();
        return None;
    };

    if !valid_content_hash(&persisted.content_hash) {
        warn!(path = %meta_path.display(), "cache metadata has invalid content hash; removing entry");
        fs::remove_file(meta_path).ok();
        return None;
    }

    if now > from_millis(persisted.expires_at_ms) {
        debug!(key = %persisted.key, "dropping expired persisted entry");
        fs::remove_file(meta_path).ok();
        return None;
    }

    let body_path = store.body_path(handle.as_str());
    let Some(variant) = Variant::from_persisted(&persisted, handle, 0) else {
        warn!(path = %meta_path.display(), "cache metadata has unparseable headers; removing entry");
        fs::remove_file(meta_path).ok();
        return None;
    };

    if !body_matches(&body_path, persisted.content_length, &persisted.content_hash) {
        warn!(
            path = %body_path.display(),
            "cached body missing or corrupt; removing entry"
        );
        fs::remove_file(meta_path).ok();
        return None;
    }

    Some(RestoredEntry {
        key: CacheKey::from_string(persisted.key),
        variant,
    })
}

fn valid_content_hash(value: &str) -> bool {
    value.len() == 64 && value.as_bytes().iter().all(|b| b.is_ascii_hexdigit())
}

fn body_matches(path: &Path, expected_len: u64, expected_hex: &str) -> bool {
    let mut file = match fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };
    let mut hasher = Hasher::new();
    let mut buf = [0u8; 8192];
    let mut len = 0u64;
    loop {
        match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                len += n as u64;
                hasher.update(&buf[..n]);
            }
            Err(_) => return false,
        }
    }
    len == expected_len && hasher.finalize().to_hex().as_str() == expected_hex
}

impl CacheState {
    /// Charges restored bodies against the budgets, oldest first, and
    /// indexes them.
    pub(super) fn adopt_restored(&self, entries: Vec<RestoredEntry>) -> usize {
        let mut index = self.index.write();
        let mut adopted = 0;
        for RestoredEntry { key, mut variant } in entries {
            match self.storage.adopt(variant.handle.clone(), variant.content_length) {
                Ok(evicted) => {
                    index.remove_handles(&evicted);
                }
                Err(err) => {
                    warn!(error = %err, key = %key, "dropping persisted entry");
                    self.storage.release(&variant.handle);
                    continue;
                }
            }
            variant.id = self.next_variant_id();
            for displaced in index.store(key, variant) {
                self.storage.release(&displaced.handle);
            }
            adopted += 1;
        }
        if adopted > 0 {
            info!(
                cache = %self.config.name,
                entries = index.len(),
                "restored persisted cache entries"
            );
        }
        adopted
    }

    pub(super) fn sweep_expired(&self, batch_size: usize) -> SweepStats {
        let mut stats = SweepStats::default();
        if batch_size == 0 {
            return stats;
        }
        let now = SystemTime::now();
        let mut index = self.index.write();
        for (key, id) in index.expired(now, batch_size) {
            if let Some(variant) = index.remove_if_id_matches(&key, id) {
                let size = self
                    .storage
                    .size_of(&variant.handle)
                    .unwrap_or(variant.content_length);
                self.storage.release(&variant.handle);
                stats.removed += 1;
                stats.bytes_reclaimed = stats.bytes_reclaimed.saturating_add(size);
            }
        }
        drop(index);

        crate::metrics::record_cache_sweep_run();
        crate::metrics::record_cache_sweep_removed(stats.removed, stats.bytes_reclaimed);
        if stats.removed > 0 {
            debug!(
                removed = stats.removed,
                bytes = stats.bytes_reclaimed,
                "swept expired cache entries"
            );
        }
        stats
    }

    pub(super) fn purge(&self) -> usize {
        let mut index = self.index.write();
        let removed = index.drain().len();
        let bytes = self.storage.clear();
        debug!(variants = removed, bytes, "purged cache");
        removed
    }
}
