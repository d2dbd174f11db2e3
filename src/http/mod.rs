//! Request/response seams consumed by the cache.
//!
//! The cache never talks to a socket. A server adapter wraps its native
//! exchange in [`CacheRequest`] and [`CacheResponse`], and supplies a
//! [`ResponseResolver`] that produces the response on a miss.

pub mod buffered;
pub mod cache_control;

use std::collections::BTreeMap;
use std::io::Write;

use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};

pub use buffered::{BufferedRequest, BufferedResponse};

/// Immutable view of an inbound request.
pub trait CacheRequest {
    fn method(&self) -> &Method;

    fn uri(&self) -> &Uri;

    fn headers(&self) -> &HeaderMap;

    /// Request parameters by name, values in the order they were supplied.
    fn parameters(&self) -> BTreeMap<String, Vec<String>> {
        query_parameters(self.uri())
    }
}

/// Mutable response sink.
///
/// `set_header` replaces every value of a header, `add_header` appends one.
pub trait CacheResponse {
    fn set_status(&mut self, status: StatusCode);

    fn set_header(&mut self, name: HeaderName, value: HeaderValue);

    fn add_header(&mut self, name: HeaderName, value: HeaderValue);

    fn output(&mut self) -> &mut dyn Write;
}

/// Produces a response for a request the cache could not answer.
pub trait ResponseResolver {
    fn resolve(
        &self,
        request: &dyn CacheRequest,
        response: &mut dyn CacheResponse,
    ) -> anyhow::Result<()>;
}

impl<F> ResponseResolver for F
where
    F: Fn(&dyn CacheRequest, &mut dyn CacheResponse) -> anyhow::Result<()>,
{
    fn resolve(
        &self,
        request: &dyn CacheRequest,
        response: &mut dyn CacheResponse,
    ) -> anyhow::Result<()> {
        self(request, response)
    }
}

pub fn query_parameters(uri: &Uri) -> BTreeMap<String, Vec<String>> {
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    if let Some(query) = uri.query() {
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params
                .entry(name.into_owned())
                .or_default()
                .push(value.into_owned());
        }
    }
    params
}
