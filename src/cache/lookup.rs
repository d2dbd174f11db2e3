use std::io::{self, Write};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use http::header::{
    CACHE_CONTROL, CONTENT_LOCATION, DATE, ETAG, EXPIRES, HeaderName, IF_MODIFIED_SINCE,
    LAST_MODIFIED, VARY,
};
use http::{HeaderMap, HeaderValue, Method, StatusCode};

use crate::http::{CacheRequest, CacheResponse};

use super::entry::Variant;

/// Stored headers a `304` repeats.
static NOT_MODIFIED_HEADERS: [HeaderName; 5] = [CACHE_CONTROL, CONTENT_LOCATION, ETAG, EXPIRES, VARY];

/// A stored variant with its body, detached from the index.
#[derive(Debug)]
pub(super) struct CacheHit {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    stored_at: SystemTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum HitOutcome {
    Replayed,
    NotModified,
}

impl CacheHit {
    pub(super) fn new(variant: &Variant, body: Bytes) -> Self {
        Self {
            status: variant.status,
            headers: variant.headers.clone(),
            body,
            stored_at: variant.stored_at,
        }
    }

    pub(super) fn render(
        &self,
        request: &dyn CacheRequest,
        response: &mut dyn CacheResponse,
    ) -> io::Result<HitOutcome> {
        if self.not_modified_since(request.headers()) {
            response.set_status(StatusCode::NOT_MODIFIED);
            for name in &NOT_MODIFIED_HEADERS {
                replay_header(&self.headers, name, response);
            }
            set_date(response);
            return Ok(HitOutcome::NotModified);
        }

        response.set_status(self.status);
        replay_headers(&self.headers, response);
        set_date(response);
        if *request.method() != Method::HEAD {
            response.output().write_all(&self.body)?;
        }
        Ok(HitOutcome::Replayed)
    }

    fn not_modified_since(&self, req_headers: &HeaderMap) -> bool {
        let Some(since) = header_date(req_headers, IF_MODIFIED_SINCE) else {
            return false;
        };
        let last_modified =
            header_date(&self.headers, LAST_MODIFIED).unwrap_or_else(|| whole_seconds(self.stored_at));
        last_modified <= since
    }
}

/// First value of each name replaces, the rest append, original order.
pub(super) fn replay_headers(headers: &HeaderMap, response: &mut dyn CacheResponse) {
    for name in headers.keys() {
        replay_header(headers, name, response);
    }
}

fn replay_header(headers: &HeaderMap, name: &HeaderName, response: &mut dyn CacheResponse) {
    let mut values = headers.get_all(name).iter();
    if let Some(first) = values.next() {
        response.set_header(name.clone(), first.clone());
    }
    for value in values {
        response.add_header(name.clone(), value.clone());
    }
}

fn set_date(response: &mut dyn CacheResponse) {
    if let Ok(value) = HeaderValue::from_str(&httpdate::fmt_http_date(SystemTime::now())) {
        response.set_header(DATE, value);
    }
}

fn header_date(headers: &HeaderMap, name: HeaderName) -> Option<SystemTime> {
    let value = headers.get(name)?.to_str().ok()?;
    httpdate::parse_http_date(value).ok()
}

fn whole_seconds(time: SystemTime) -> SystemTime {
    let secs = time
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}
