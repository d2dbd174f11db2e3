#![allow(dead_code)]

mod dirs;
mod logging;

pub use dirs::{TestDirs, body_files};
pub use logging::capture_logs;

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use http::{HeaderName, HeaderValue, StatusCode};

use respcache::cache::HttpCache;
use respcache::http::{BufferedRequest, BufferedResponse};
use respcache::{CacheRequest, CacheResponse, ResponseResolver};

/// Resolver that answers every request with a fixed response and counts
/// how often it ran.
pub struct Origin {
    calls: AtomicUsize,
    status: StatusCode,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Vec<u8>,
    echo: Option<HeaderName>,
}

impl Origin {
    pub fn new(body: &[u8]) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            status: StatusCode::OK,
            headers: Vec::new(),
            body: body.to_vec(),
            echo: None,
        }
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Appends a response header; repeated names produce multiple values.
    pub fn header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers.push((
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        ));
        self
    }

    /// Appends the request's value of `name` to the body.
    pub fn echo(mut self, name: &'static str) -> Self {
        self.echo = Some(HeaderName::from_static(name));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ResponseResolver for Origin {
    fn resolve(
        &self,
        request: &dyn CacheRequest,
        response: &mut dyn CacheResponse,
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        response.set_status(self.status);
        for (name, value) in &self.headers {
            response.add_header(name.clone(), value.clone());
        }
        let output = response.output();
        output.write_all(&self.body)?;
        if let Some(name) = &self.echo
            && let Some(value) = request.headers().get(name)
        {
            output.write_all(value.as_bytes())?;
        }
        Ok(())
    }
}

pub fn get(uri: &str) -> BufferedRequest {
    BufferedRequest::get(uri.parse().expect("valid test uri"))
}

pub fn serve(
    cache: &HttpCache,
    request: &BufferedRequest,
    resolver: &dyn ResponseResolver,
) -> Result<BufferedResponse> {
    let mut response = BufferedResponse::new();
    cache.do_cached(request, &mut response, resolver)?;
    Ok(response)
}
