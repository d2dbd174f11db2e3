use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::StorageError;
use super::entry::PersistedVariant;

/// Opaque name of a stored body.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(super) struct BlobHandle(String);

impl BlobHandle {
    pub(super) fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Accepts only names `generate` could have produced.
    pub(super) fn parse(id: &str) -> Option<Self> {
        let valid = id.len() == 32 && id.bytes().all(|b| b.is_ascii_hexdigit());
        valid.then(|| Self(id.to_ascii_lowercase()))
    }

    pub(super) fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub(super) trait BlobStore: fmt::Debug + Send + Sync {
    fn write(&self, handle: &BlobHandle, body: &[u8]) -> io::Result<()>;

    fn read(&self, handle: &BlobHandle) -> io::Result<Bytes>;

    /// Removing a missing blob is not an error.
    fn remove(&self, handle: &BlobHandle) -> io::Result<()>;

    /// Records what is needed to restore `handle` after a restart.
    fn write_metadata(&self, _handle: &BlobHandle, _meta: &PersistedVariant) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(super) struct MemoryBlobStore {
    blobs: Mutex<HashMap<BlobHandle, Bytes>>,
}

impl BlobStore for MemoryBlobStore {
    fn write(&self, handle: &BlobHandle, body: &[u8]) -> io::Result<()> {
        self.blobs
            .lock()
            .insert(handle.clone(), Bytes::copy_from_slice(body));
        Ok(())
    }

    fn read(&self, handle: &BlobHandle) -> io::Result<Bytes> {
        self.blobs.lock().get(handle).cloned().ok_or_else(|| {
            io::Error::new(ErrorKind::NotFound, format!("no cached body {handle}"))
        })
    }

    fn remove(&self, handle: &BlobHandle) -> io::Result<()> {
        self.blobs.lock().remove(handle);
        Ok(())
    }
}

/// Bodies under `<dir>/ab/cd/<id>`, metadata next to them as `<id>.meta`.
#[derive(Debug)]
pub(super) struct DiskBlobStore {
    dir: PathBuf,
    remove_on_drop: Option<PathBuf>,
}

impl DiskBlobStore {
    pub(super) fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            remove_on_drop: None,
        }
    }

    /// Deletes `root` recursively once the store is dropped.
    pub(super) fn remove_on_drop(mut self, root: PathBuf) -> Self {
        self.remove_on_drop = Some(root);
        self
    }

    pub(super) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(super) fn body_path(&self, id: &str) -> PathBuf {
        let (first, remainder) = id.split_at(2);
        let (second, _) = remainder.split_at(2);
        self.dir.join(first).join(second).join(id)
    }

    pub(super) fn meta_path(&self, id: &str) -> PathBuf {
        let mut path = self.body_path(id);
        path.set_extension("meta");
        path
    }

    pub(super) fn remove_temp_files(&self) -> io::Result<()> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err),
        };
        for entry in entries {
            let entry = entry?;
            let is_temp = entry
                .file_name()
                .to_str()
                .map(|name| name.starts_with("tmp_"))
                .unwrap_or(false);
            if is_temp && entry.file_type()?.is_file() {
                fs::remove_file(entry.path()).ok();
            }
        }
        Ok(())
    }

    fn write_atomically(&self, target: &Path, data: &[u8]) -> io::Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = self
            .dir
            .join(format!("tmp_{}", uuid::Uuid::new_v4().simple()));
        let result = write_private_file(&temp_path, data).and_then(|()| fs::rename(&temp_path, target));
        if result.is_err() {
            fs::remove_file(&temp_path).ok();
        }
        result
    }

    fn prune_empty_shards(&self, id: &str) {
        let body_path = self.body_path(id);
        let Some(shard2) = body_path.parent() else {
            return;
        };
        if dir_is_empty(shard2) {
            fs::remove_dir(shard2).ok();
        }
        let Some(shard1) = shard2.parent() else {
            return;
        };
        if shard1 != self.dir && dir_is_empty(shard1) {
            fs::remove_dir(shard1).ok();
        }
    }
}

fn write_private_file(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.create(true).truncate(true).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.flush()
}

fn dir_is_empty(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

fn ignore_missing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

impl BlobStore for DiskBlobStore {
    fn write(&self, handle: &BlobHandle, body: &[u8]) -> io::Result<()> {
        self.write_atomically(&self.body_path(handle.as_str()), body)
    }

    fn read(&self, handle: &BlobHandle) -> io::Result<Bytes> {
        fs::read(self.body_path(handle.as_str())).map(Bytes::from)
    }

    fn remove(&self, handle: &BlobHandle) -> io::Result<()> {
        let id = handle.as_str();
        let body = ignore_missing(fs::remove_file(self.body_path(id)));
        let meta = ignore_missing(fs::remove_file(self.meta_path(id)));
        self.prune_empty_shards(id);
        body.and(meta)
    }

    fn write_metadata(&self, handle: &BlobHandle, meta: &PersistedVariant) -> io::Result<()> {
        let data = serde_json::to_vec(meta)?;
        self.write_atomically(&self.meta_path(handle.as_str()), &data)
    }
}

impl Drop for DiskBlobStore {
    fn drop(&mut self) {
        if let Some(root) = self.remove_on_drop.take()
            && let Err(err) = ignore_missing(fs::remove_dir_all(&root))
        {
            warn!(error = %err, path = %root.display(), "failed to remove cache dir");
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageUsage {
    pub bytes: u64,
    pub entries: usize,
}

#[derive(Debug)]
struct Ledger {
    /// Insertion ordered; the least recently used slot is the oldest store.
    blobs: LruCache<BlobHandle, u64>,
    bytes: u64,
}

/// Capacity-bounded body storage.
///
/// Both bounds treat 0 as unbounded. Eviction is by store order, reads never
/// refresh an entry.
#[derive(Debug)]
pub(super) struct CacheStorage {
    backend: Box<dyn BlobStore>,
    max_total_bytes: u64,
    max_entries: usize,
    ledger: Mutex<Ledger>,
}

impl CacheStorage {
    pub(super) fn new(backend: Box<dyn BlobStore>, max_total_bytes: u64, max_entries: usize) -> Self {
        Self {
            backend,
            max_total_bytes,
            max_entries,
            ledger: Mutex::new(Ledger {
                blobs: LruCache::unbounded(),
                bytes: 0,
            }),
        }
    }

    pub(super) fn max_total_bytes(&self) -> u64 {
        self.max_total_bytes
    }

    /// Writes `body` to the backend without charging the budgets; the blob
    /// counts once it is passed to [`CacheStorage::adopt`].
    pub(super) fn write(&self, body: &[u8]) -> Result<BlobHandle, StorageError> {
        self.check_size(body.len() as u64)?;
        let handle = BlobHandle::generate();
        self.backend.write(&handle, body)?;
        Ok(handle)
    }

    /// Charges a blob already present in the backend, evicting the oldest
    /// blobs until both budgets hold. Returns the evicted handles, oldest
    /// first.
    pub(super) fn adopt(&self, handle: BlobHandle, size: u64) -> Result<Vec<BlobHandle>, StorageError> {
        self.check_size(size)?;
        Ok(self.charge(handle, size))
    }

    pub(super) fn get(&self, handle: &BlobHandle) -> io::Result<Bytes> {
        self.backend.read(handle)
    }

    pub(super) fn write_metadata(
        &self,
        handle: &BlobHandle,
        meta: &PersistedVariant,
    ) -> io::Result<()> {
        self.backend.write_metadata(handle, meta)
    }

    pub(super) fn release(&self, handle: &BlobHandle) {
        {
            let mut ledger = self.ledger.lock();
            if let Some(size) = ledger.blobs.pop(handle) {
                ledger.bytes = ledger.bytes.saturating_sub(size);
            }
        }
        self.remove_blob(handle);
    }

    /// Releases every blob; returns how many bytes were freed.
    pub(super) fn clear(&self) -> u64 {
        let (handles, bytes) = {
            let mut ledger = self.ledger.lock();
            let mut handles = Vec::with_capacity(ledger.blobs.len());
            while let Some((handle, _)) = ledger.blobs.pop_lru() {
                handles.push(handle);
            }
            (handles, std::mem::take(&mut ledger.bytes))
        };
        for handle in &handles {
            self.remove_blob(handle);
        }
        bytes
    }

    pub(super) fn size_of(&self, handle: &BlobHandle) -> Option<u64> {
        self.ledger.lock().blobs.peek(handle).copied()
    }

    pub(super) fn usage(&self) -> StorageUsage {
        let ledger = self.ledger.lock();
        StorageUsage {
            bytes: ledger.bytes,
            entries: ledger.blobs.len(),
        }
    }

    fn check_size(&self, size: u64) -> Result<(), StorageError> {
        if self.max_total_bytes > 0 && size > self.max_total_bytes {
            return Err(StorageError::TooLarge {
                size,
                max: self.max_total_bytes,
            });
        }
        Ok(())
    }

    fn charge(&self, handle: BlobHandle, size: u64) -> Vec<BlobHandle> {
        let mut evicted = Vec::new();
        {
            let mut ledger = self.ledger.lock();
            if let Some(previous) = ledger.blobs.push(handle.clone(), size)
                && previous.0 == handle
            {
                ledger.bytes = ledger.bytes.saturating_sub(previous.1);
            }
            ledger.bytes = ledger.bytes.saturating_add(size);

            while self.over_budget(&ledger) {
                let Some((oldest, oldest_size)) = ledger.blobs.pop_lru() else {
                    break;
                };
                if oldest == handle {
                    ledger.blobs.push(oldest, oldest_size);
                    break;
                }
                ledger.bytes = ledger.bytes.saturating_sub(oldest_size);
                evicted.push(oldest);
            }
        }

        for handle in &evicted {
            debug!(handle = %handle, "evicting cached body");
            crate::metrics::record_cache_eviction();
            self.remove_blob(handle);
        }
        evicted
    }

    fn over_budget(&self, ledger: &Ledger) -> bool {
        (self.max_total_bytes > 0 && ledger.bytes > self.max_total_bytes)
            || (self.max_entries > 0 && ledger.blobs.len() > self.max_entries)
    }

    fn remove_blob(&self, handle: &BlobHandle) {
        if let Err(err) = self.backend.remove(handle) {
            warn!(error = %err, handle = %handle, "failed to remove cached body");
        }
    }
}
