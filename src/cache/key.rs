use std::fmt;

use http::header::{HOST, VARY};
use http::{HeaderMap, HeaderName, HeaderValue};

use crate::http::CacheRequest;

pub(super) const MAX_VARY_HEADERS: usize = 8;
pub(super) const MAX_VARY_BYTES: usize = 8 * 1024;

/// Resource identity: scheme, authority, path and the query with parameters
/// sorted by name.
///
/// Query pairs are sorted in their encoded form and never decoded, so two
/// queries that differ in any byte keep distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(super) struct CacheKey {
    key: String,
}

impl CacheKey {
    pub(super) fn for_request(request: &dyn CacheRequest) -> Self {
        let uri = request.uri();
        let mut key = String::new();

        if let Some(scheme) = uri.scheme_str() {
            key.push_str(&scheme.to_ascii_lowercase());
            key.push_str("://");
        }
        let authority = uri.authority().map(|authority| authority.as_str()).or_else(|| {
            request
                .headers()
                .get(HOST)
                .and_then(|value| value.to_str().ok())
        });
        if let Some(authority) = authority {
            if uri.scheme_str().is_none() {
                key.push_str("//");
            }
            key.push_str(&authority.to_ascii_lowercase());
        }
        key.push_str(uri.path());

        if let Some(query) = uri.query() {
            let mut pairs: Vec<&str> = query.split('&').filter(|pair| !pair.is_empty()).collect();
            // stable: values of one parameter keep their order
            pairs.sort_by(|a, b| parameter_name(a).cmp(parameter_name(b)));
            if !pairs.is_empty() {
                key.push('?');
                key.push_str(&pairs.join("&"));
            }
        }

        Self { key }
    }

    pub(super) fn from_string(key: String) -> Self {
        Self { key }
    }

    pub(super) fn as_str(&self) -> &str {
        &self.key
    }
}

fn parameter_name(pair: &str) -> &str {
    pair.split_once('=').map_or(pair, |(name, _)| name)
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// The request headers a stored response was negotiated on.
///
/// Every name listed by the response's `Vary` header is recorded with the
/// full value list the request carried for it; a missing header records an
/// empty list, which only matches another missing header.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(super) struct VaryKey {
    wildcard: bool,
    snapshot: Vec<(HeaderName, Vec<HeaderValue>)>,
}

impl VaryKey {
    pub(super) fn new(wildcard: bool, snapshot: Vec<(HeaderName, Vec<HeaderValue>)>) -> Self {
        Self { wildcard, snapshot }
    }

    /// Returns `None` when the recorded headers exceed the vary limits.
    pub(super) fn from_response(resp_headers: &HeaderMap, req_headers: &HeaderMap) -> Option<Self> {
        let mut wildcard = false;
        let mut snapshot: Vec<(HeaderName, Vec<HeaderValue>)> = Vec::new();
        let mut vary_bytes = 0usize;

        for value in resp_headers.get_all(VARY) {
            let Ok(s) = value.to_str() else {
                continue;
            };
            for header_name in s.split(',').map(str::trim).filter(|name| !name.is_empty()) {
                if header_name == "*" {
                    wildcard = true;
                    continue;
                }
                let Ok(name) = HeaderName::from_bytes(header_name.as_bytes()) else {
                    continue;
                };
                if snapshot.iter().any(|(existing, _)| *existing == name) {
                    continue;
                }
                if snapshot.len() + 1 > MAX_VARY_HEADERS {
                    return None;
                }
                let values: Vec<HeaderValue> = req_headers.get_all(&name).iter().cloned().collect();
                let added_bytes = name.as_str().len()
                    + values.iter().map(|v| v.as_bytes().len()).sum::<usize>();
                if vary_bytes.saturating_add(added_bytes) > MAX_VARY_BYTES {
                    return None;
                }
                vary_bytes += added_bytes;
                snapshot.push((name, values));
            }
        }

        Some(Self { wildcard, snapshot })
    }

    pub(super) fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    pub(super) fn snapshot(&self) -> &[(HeaderName, Vec<HeaderValue>)] {
        &self.snapshot
    }

    pub(super) fn matches(&self, req_headers: &HeaderMap) -> bool {
        if self.wildcard {
            return false;
        }
        self.snapshot.iter().all(|(name, expected)| {
            let actual = req_headers.get_all(name);
            actual.iter().eq(expected.iter())
        })
    }

    /// Same variance axis: identical `Vary` name sets, order ignored.
    pub(super) fn same_names(&self, other: &VaryKey) -> bool {
        self.wildcard == other.wildcard
            && self.snapshot.len() == other.snapshot.len()
            && self
                .snapshot
                .iter()
                .all(|(name, _)| other.values_for(name).is_some())
    }

    /// Same axis and same recorded request values.
    pub(super) fn same_variant(&self, other: &VaryKey) -> bool {
        if !self.same_names(other) {
            return false;
        }
        if self.wildcard {
            return true;
        }
        self.snapshot
            .iter()
            .all(|(name, values)| other.values_for(name) == Some(values.as_slice()))
    }

    fn values_for(&self, name: &HeaderName) -> Option<&[HeaderValue]> {
        self.snapshot
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, values)| values.as_slice())
    }
}
