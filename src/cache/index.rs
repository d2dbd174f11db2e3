use std::collections::HashMap;
use std::time::SystemTime;

use http::HeaderMap;

use super::entry::Variant;
use super::key::{CacheKey, VaryKey};
use super::store::BlobHandle;

/// Resource key to its negotiated variants.
#[derive(Debug, Default)]
pub(super) struct VariantIndex {
    resources: HashMap<CacheKey, Vec<Variant>>,
    locations: HashMap<BlobHandle, CacheKey>,
}

impl VariantIndex {
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// First variant whose recorded request headers match, expired or not.
    pub(super) fn lookup(&self, key: &CacheKey, req_headers: &HeaderMap) -> Option<&Variant> {
        self.resources
            .get(key)?
            .iter()
            .find(|variant| variant.vary.matches(req_headers))
    }

    /// Removes the variants a new variant negotiated on `vary` supersedes.
    ///
    /// A different set of `Vary` names drops every variant of the resource;
    /// otherwise only a variant with the same recorded values goes.
    pub(super) fn displace(&mut self, key: &CacheKey, vary: &VaryKey) -> Vec<Variant> {
        let Some(variants) = self.resources.get_mut(key) else {
            return Vec::new();
        };
        let displaced = if variants.iter().any(|existing| !existing.vary.same_names(vary)) {
            std::mem::take(variants)
        } else {
            let (displaced, kept): (Vec<Variant>, Vec<Variant>) = std::mem::take(variants)
                .into_iter()
                .partition(|existing| existing.vary.same_variant(vary));
            *variants = kept;
            displaced
        };
        if variants.is_empty() {
            self.resources.remove(key);
        }
        self.forget(&displaced);
        displaced
    }

    pub(super) fn insert(&mut self, key: CacheKey, variant: Variant) {
        self.locations.insert(variant.handle.clone(), key.clone());
        self.resources.entry(key).or_default().push(variant);
    }

    /// Displaces and inserts in one step; returns what was displaced.
    pub(super) fn store(&mut self, key: CacheKey, variant: Variant) -> Vec<Variant> {
        let displaced = self.displace(&key, &variant.vary);
        self.insert(key, variant);
        displaced
    }

    pub(super) fn remove_resource(&mut self, key: &CacheKey) -> Vec<Variant> {
        let removed = self.resources.remove(key).unwrap_or_default();
        self.forget(&removed);
        removed
    }

    /// Removes the variant only if it was not replaced in the meantime.
    pub(super) fn remove_if_id_matches(&mut self, key: &CacheKey, id: u64) -> Option<Variant> {
        let variants = self.resources.get_mut(key)?;
        let position = variants.iter().position(|variant| variant.id == id)?;
        let removed = variants.remove(position);
        if variants.is_empty() {
            self.resources.remove(key);
        }
        self.locations.remove(&removed.handle);
        Some(removed)
    }

    /// Drops the variants whose bodies storage has already evicted.
    pub(super) fn remove_handles(&mut self, handles: &[BlobHandle]) -> Vec<Variant> {
        let mut removed = Vec::new();
        for handle in handles {
            let Some(key) = self.locations.remove(handle) else {
                continue;
            };
            if let Some(variants) = self.resources.get_mut(&key) {
                if let Some(position) = variants.iter().position(|v| &v.handle == handle) {
                    removed.push(variants.remove(position));
                }
                if variants.is_empty() {
                    self.resources.remove(&key);
                }
            }
        }
        removed
    }

    /// Up to `limit` expired variants as `(key, id)` pairs.
    pub(super) fn expired(&self, now: SystemTime, limit: usize) -> Vec<(CacheKey, u64)> {
        let mut expired = Vec::new();
        for (key, variants) in &self.resources {
            for variant in variants {
                if expired.len() >= limit {
                    return expired;
                }
                if variant.is_expired(now) {
                    expired.push((key.clone(), variant.id));
                }
            }
        }
        expired
    }

    pub(super) fn drain(&mut self) -> Vec<Variant> {
        self.locations.clear();
        self.resources.drain().flat_map(|(_, variants)| variants).collect()
    }

    pub(super) fn len(&self) -> usize {
        self.locations.len()
    }

    pub(super) fn resource_count(&self) -> usize {
        self.resources.len()
    }

    fn forget(&mut self, variants: &[Variant]) {
        for variant in variants {
            self.locations.remove(&variant.handle);
        }
    }
}
