use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::http::{CacheRequest, CacheResponse, ResponseResolver};

mod admission;
mod config;
mod entry;
mod error;
mod index;
mod key;
mod lookup;
mod maintenance;
mod recorder;
mod store;

pub use admission::{
    BypassReason, CacheSkipReason, CacheWritePlan, RequestPolicy, plan_cache_write,
    request_policy,
};
pub use config::{
    CacheConfig, CacheRoot, DEFAULT_EXPIRY, DEFAULT_MAX_ENTRIES, DEFAULT_MAX_TOTAL_BYTES,
};
pub use error::{CacheError, StorageError};
pub use store::StorageUsage;

use admission::plan_cache_write_at;
use entry::{Variant, storable_headers};
use index::VariantIndex;
use key::{CacheKey, VaryKey};
use lookup::{CacheHit, HitOutcome};
use maintenance::{prepare_cache_dir, remove_cache_dirs, scan_persisted};
use recorder::{RecordedResponse, RecordingResponse};
use store::{BlobStore, CacheStorage, DiskBlobStore, MemoryBlobStore};

/// Shared response cache; clones refer to the same storage.
#[derive(Clone)]
pub struct HttpCache {
    state: Arc<CacheState>,
}

#[derive(Debug)]
struct CacheState {
    config: CacheConfig,
    index: RwLock<VariantIndex>,
    storage: CacheStorage,
    next_id: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub removed: u64,
    pub bytes_reclaimed: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub resources: usize,
    pub variants: usize,
    pub bytes: u64,
}

enum Lookup {
    Miss,
    Hit(CacheHit),
    Expired(u64),
    Unreadable(u64, std::io::Error),
}

impl HttpCache {
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;

        let mut restored = Vec::new();
        let backend: Box<dyn BlobStore> = match config.cache_dir() {
            None => Box::new(MemoryBlobStore::default()),
            Some(root) => {
                let (active_dir, cleanup_dirs) = prepare_cache_dir(&root, config.persistent)
                    .map_err(|err| cache_dir_error(&root, "unusable", err))?;
                remove_cache_dirs(cleanup_dirs);

                let disk = DiskBlobStore::new(active_dir);
                if config.persistent {
                    restored = scan_persisted(&disk, SystemTime::now())
                        .map_err(|err| cache_dir_error(&root, "unreadable", err))?;
                    Box::new(disk)
                } else {
                    Box::new(disk.remove_on_drop(root))
                }
            }
        };

        let storage = CacheStorage::new(backend, config.max_total_bytes, config.max_entries);
        let state = Arc::new(CacheState {
            config,
            index: RwLock::new(VariantIndex::new()),
            storage,
            next_id: AtomicU64::new(1),
        });
        state.adopt_restored(restored);
        debug!(cache = %state.config.name, root = %state.config.root, "cache ready");
        Ok(Self { state })
    }

    pub fn name(&self) -> &str {
        &self.state.config.name
    }

    pub fn config(&self) -> &CacheConfig {
        &self.state.config
    }

    /// Answers `request` from the cache, or through `resolver` and then
    /// stores the result when it is cacheable.
    ///
    /// Storage problems never fail the call; resolver errors are returned
    /// as they are.
    pub fn do_cached(
        &self,
        request: &dyn CacheRequest,
        response: &mut dyn CacheResponse,
        resolver: &dyn ResponseResolver,
    ) -> Result<(), CacheError> {
        let key = CacheKey::for_request(request);

        match request_policy(request.method(), request.headers()) {
            RequestPolicy::Cacheable => {}
            RequestPolicy::Invalidate => {
                let removed = self.state.remove_resource(&key);
                trace!(key = %key, removed, "unsafe method invalidated cached resource");
                crate::metrics::record_cache_bypass("invalidate");
                return resolver
                    .resolve(request, response)
                    .map_err(CacheError::Resolver);
            }
            RequestPolicy::Bypass(reason) => {
                trace!(key = %key, reason = reason.as_str(), "cache bypassed");
                crate::metrics::record_cache_bypass(reason.as_str());
                return resolver
                    .resolve(request, response)
                    .map_err(CacheError::Resolver);
            }
        }

        if self.state.serve_from_cache(&key, request, response)? {
            return Ok(());
        }

        let recorded = {
            let mut recorder =
                RecordingResponse::new(response, self.state.storage.max_total_bytes());
            resolver
                .resolve(request, &mut recorder)
                .map_err(CacheError::Resolver)?;
            recorder.finish()
        };
        self.state.store_recorded(key, request, recorded);
        Ok(())
    }

    /// Drops every variant stored for the request's resource.
    pub fn invalidate(&self, request: &dyn CacheRequest) -> usize {
        self.state.remove_resource(&CacheKey::for_request(request))
    }

    /// Removes up to `batch_size` expired variants.
    pub fn sweep_expired(&self, batch_size: usize) -> SweepStats {
        self.state.sweep_expired(batch_size)
    }

    /// Removes every variant and body; returns the number of variants.
    pub fn purge(&self) -> usize {
        self.state.purge()
    }

    pub fn stats(&self) -> CacheStats {
        let index = self.state.index.read();
        CacheStats {
            resources: index.resource_count(),
            variants: index.len(),
            bytes: self.state.storage.usage().bytes,
        }
    }

    pub fn usage(&self) -> StorageUsage {
        self.state.storage.usage()
    }
}

impl fmt::Display for HttpCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let config = &self.state.config;
        let stats = self.stats();
        write!(
            f,
            "cache '{}' at {} ({}): {} resources, {} variants, {} bytes",
            config.name,
            config.root,
            if config.persistent {
                "persistent"
            } else {
                "transient"
            },
            stats.resources,
            stats.variants,
            stats.bytes
        )
    }
}

impl fmt::Debug for HttpCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCache")
            .field("name", &self.state.config.name)
            .field("root", &self.state.config.root)
            .finish_non_exhaustive()
    }
}

impl CacheState {
    fn next_variant_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns `Ok(true)` when the response was answered from the cache.
    fn serve_from_cache(
        &self,
        key: &CacheKey,
        request: &dyn CacheRequest,
        response: &mut dyn CacheResponse,
    ) -> Result<bool, CacheError> {
        match self.lookup(key, request) {
            Lookup::Miss => {
                trace!(key = %key, "cache miss");
                crate::metrics::record_cache_lookup("miss");
                Ok(false)
            }
            Lookup::Expired(id) => {
                trace!(key = %key, "cache entry expired");
                self.remove_variant(key, id);
                crate::metrics::record_cache_lookup("expired");
                Ok(false)
            }
            Lookup::Unreadable(id, source) => {
                warn!(key = %key, error = %source, "cached body unreadable; dropping entry");
                self.remove_variant(key, id);
                crate::metrics::record_cache_lookup("unreadable");
                Err(CacheError::UnreadableHit {
                    key: key.to_string(),
                    source,
                })
            }
            Lookup::Hit(hit) => {
                let outcome = hit.render(request, response)?;
                trace!(key = %key, not_modified = outcome == HitOutcome::NotModified, "cache hit");
                crate::metrics::record_cache_lookup("hit");
                Ok(true)
            }
        }
    }

    fn lookup(&self, key: &CacheKey, request: &dyn CacheRequest) -> Lookup {
        let now = SystemTime::now();
        let index = self.index.read();
        let Some(variant) = index.lookup(key, request.headers()) else {
            return Lookup::Miss;
        };
        if variant.is_expired(now) {
            return Lookup::Expired(variant.id);
        }
        match self.storage.get(&variant.handle) {
            Ok(body) if body_intact(variant, &body) => Lookup::Hit(CacheHit::new(variant, body)),
            Ok(_) => Lookup::Unreadable(
                variant.id,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "cached body does not match its content hash",
                ),
            ),
            Err(err) => Lookup::Unreadable(variant.id, err),
        }
    }

    fn store_recorded(&self, key: CacheKey, request: &dyn CacheRequest, recorded: RecordedResponse) {
        if recorded.capture_failed {
            skip_store(&key, CacheSkipReason::CaptureFailed);
            return;
        }

        let now = SystemTime::now();
        let ttl = match plan_cache_write_at(
            request.method(),
            recorded.status,
            &recorded.headers,
            self.config.default_expiry,
            now,
        ) {
            CacheWritePlan::Store { ttl } => ttl,
            CacheWritePlan::Skip(reason) => {
                skip_store(&key, reason);
                return;
            }
        };
        let Some(vary) = VaryKey::from_response(&recorded.headers, request.headers()) else {
            skip_store(&key, CacheSkipReason::VaryLimits);
            return;
        };

        let content_length = recorded.body.len() as u64;
        let content_hash = blake3::hash(&recorded.body).to_hex().to_string();

        // Body and metadata reach the backend before the index lock is taken;
        // only budget accounting and index updates happen under it.
        let handle = match self.storage.write(&recorded.body) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(key = %key, error = %err, "failed to store cached response");
                crate::metrics::record_cache_store_error();
                return;
            }
        };
        let variant = Variant {
            id: self.next_variant_id(),
            handle,
            status: recorded.status,
            headers: storable_headers(&recorded.headers),
            vary,
            stored_at: now,
            expires_at: expiry_after(now, ttl),
            content_length,
            content_hash,
        };
        let persisted = variant.to_persisted(key.as_str());
        if let Err(err) = self.storage.write_metadata(&variant.handle, &persisted) {
            warn!(key = %key, error = %err, "failed to write cache metadata");
            crate::metrics::record_cache_store_error();
            self.storage.release(&variant.handle);
            return;
        }

        let mut index = self.index.write();
        for displaced in index.displace(&key, &variant.vary) {
            self.storage.release(&displaced.handle);
        }
        let evicted = match self.storage.adopt(variant.handle.clone(), content_length) {
            Ok(evicted) => evicted,
            Err(err) => {
                warn!(key = %key, error = %err, "failed to store cached response");
                crate::metrics::record_cache_store_error();
                self.storage.release(&variant.handle);
                return;
            }
        };
        index.remove_handles(&evicted);

        debug!(
            key = %key,
            ttl_ms = ttl.as_millis() as u64,
            bytes = content_length,
            evicted = evicted.len(),
            "stored cached response"
        );
        crate::metrics::record_cache_store();
        index.insert(key, variant);
    }

    fn remove_resource(&self, key: &CacheKey) -> usize {
        let mut index = self.index.write();
        let removed = index.remove_resource(key);
        for variant in &removed {
            self.storage.release(&variant.handle);
        }
        removed.len()
    }

    /// Drops the variant unless it was replaced since it was looked up.
    fn remove_variant(&self, key: &CacheKey, id: u64) {
        let mut index = self.index.write();
        if let Some(variant) = index.remove_if_id_matches(key, id) {
            self.storage.release(&variant.handle);
        }
    }
}

fn skip_store(key: &CacheKey, reason: CacheSkipReason) {
    trace!(key = %key, reason = reason.as_str(), "response not cached");
    crate::metrics::record_cache_store_skipped(reason.as_str());
}

fn body_intact(variant: &Variant, body: &[u8]) -> bool {
    body.len() as u64 == variant.content_length
        && blake3::hash(body).to_hex().as_str() == variant.content_hash
}

/// Lifetimes too large for the clock saturate at roughly a century.
fn cache_dir_error(root: &Path, problem: &str, err: io::Error) -> CacheError {
    CacheError::Config(format!("cache directory {} is {problem}: {err}", root.display()))
}

fn expiry_after(now: SystemTime, ttl: Duration) -> SystemTime {
    const CENTURY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);
    now.checked_add(ttl)
        .or_else(|| now.checked_add(CENTURY))
        .unwrap_or(now)
}
