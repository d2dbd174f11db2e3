use std::time::{Duration, SystemTime};

use http::header::{
    CONNECTION, DATE, HeaderName, HeaderValue, TE, TRAILER, TRANSFER_ENCODING, UPGRADE,
};
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};

use super::VaryKey;
use super::store::BlobHandle;

/// Headers never replayed from the cache: `Date` is regenerated per serve,
/// the rest are hop-by-hop.
const UNSTORED_HEADERS: &[&str] = &["keep-alive", "proxy-connection"];

fn is_unstored(name: &HeaderName) -> bool {
    name == DATE
        || name == CONNECTION
        || name == TRANSFER_ENCODING
        || name == UPGRADE
        || name == TE
        || name == TRAILER
        || UNSTORED_HEADERS.contains(&name.as_str())
}

/// Copies `headers` in order, dropping the ones a replay must not carry.
pub(super) fn storable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut stored = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if !is_unstored(name) {
            stored.append(name.clone(), value.clone());
        }
    }
    stored
}

/// One cached rendition of a resource.
#[derive(Debug, Clone)]
pub(super) struct Variant {
    pub id: u64,
    pub handle: BlobHandle,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub vary: VaryKey,
    pub stored_at: SystemTime,
    pub expires_at: SystemTime,
    pub content_length: u64,
    pub content_hash: String,
}

impl Variant {
    pub(super) fn is_expired(&self, now: SystemTime) -> bool {
        now > self.expires_at
    }
}

/// On-disk metadata. Header values are kept as raw bytes so that values
/// outside visible ASCII survive a restart unchanged.
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct PersistedVariant {
    pub key: String,
    pub status: u16,
    pub headers: Vec<(String, Vec<u8>)>,
    #[serde(default)]
    pub vary_wildcard: bool,
    pub vary: Vec<(String, Vec<Vec<u8>>)>,
    pub stored_at_ms: u64,
    pub expires_at_ms: u64,
    pub content_hash: String,
    pub content_length: u64,
}

impl Variant {
    pub(super) fn to_persisted(&self, key: &str) -> PersistedVariant {
        PersistedVariant {
            key: key.to_string(),
            status: self.status.as_u16(),
            headers: self
                .headers
                .iter()
                .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
                .collect(),
            vary_wildcard: self.vary.is_wildcard(),
            vary: self
                .vary
                .snapshot()
                .iter()
                .map(|(name, values)| {
                    (
                        name.as_str().to_string(),
                        values.iter().map(|value| value.as_bytes().to_vec()).collect(),
                    )
                })
                .collect(),
            stored_at_ms: to_millis(self.stored_at),
            expires_at_ms: to_millis(self.expires_at),
            content_hash: self.content_hash.clone(),
            content_length: self.content_length,
        }
    }

    /// Returns `None` if any status, header name or value fails to parse;
    /// a partially restored variant could match the wrong request.
    pub(super) fn from_persisted(
        persisted: &PersistedVariant,
        handle: BlobHandle,
        id: u64,
    ) -> Option<Self> {
        let mut snapshot = Vec::with_capacity(persisted.vary.len());
        for (name, values) in &persisted.vary {
            let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
            let values = values
                .iter()
                .map(|value| HeaderValue::from_bytes(value).ok())
                .collect::<Option<Vec<_>>>()?;
            snapshot.push((name, values));
        }

        Some(Self {
            id,
            handle,
            status: StatusCode::from_u16(persisted.status).ok()?,
            headers: to_headermap(&persisted.headers)?,
            vary: VaryKey::new(persisted.vary_wildcard, snapshot),
            stored_at: from_millis(persisted.stored_at_ms),
            expires_at: from_millis(persisted.expires_at_ms),
            content_length: persisted.content_length,
            content_hash: persisted.content_hash.clone(),
        })
    }
}

pub(super) fn to_millis(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

pub(super) fn from_millis(millis: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_millis(millis)
}

fn to_headermap(items: &[(String, Vec<u8>)]) -> Option<HeaderMap> {
    let mut map = HeaderMap::with_capacity(items.len());
    for (name, value) in items {
        let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
        let value = HeaderValue::from_bytes(value).ok()?;
        map.append(name, value);
    }
    Some(map)
}
