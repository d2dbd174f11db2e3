#![no_main]

use std::io::Write;
use std::time::{Duration, SystemTime};

use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use libfuzzer_sys::fuzz_target;

use respcache::cache::{HttpCache, plan_cache_write, request_policy};
use respcache::http::cache_control::{freshness_lifetime, parse_cache_control};
use respcache::http::{BufferedRequest, BufferedResponse};
use respcache::{CacheConfig, CacheRequest, CacheResponse};

fn header_map(text: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for line in text.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.trim().as_bytes()),
            HeaderValue::from_str(value.trim()),
        ) {
            headers.append(name, value);
        }
    }
    headers
}

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let payload = &data[1..];
    let split = (data[0] as usize) % (payload.len() + 1);
    let (request_bytes, response_bytes) = payload.split_at(split);
    let request_headers = header_map(&String::from_utf8_lossy(request_bytes));
    let response_headers = header_map(&String::from_utf8_lossy(response_bytes));

    let _ = parse_cache_control(&response_headers);
    let _ = freshness_lifetime(&response_headers, SystemTime::now());
    let _ = request_policy(&Method::GET, &request_headers);
    let _ = plan_cache_write(
        &Method::GET,
        StatusCode::OK,
        &response_headers,
        Duration::from_secs(60),
    );

    let Ok(cache) = HttpCache::new(CacheConfig::memory("fuzz")) else {
        return;
    };
    let request = BufferedRequest::get(http::Uri::from_static("http://fuzz.test/"))
        .with_headers(request_headers);
    let resolver = |_: &dyn CacheRequest, response: &mut dyn CacheResponse| -> anyhow::Result<()> {
        for (name, value) in &response_headers {
            response.add_header(name.clone(), value.clone());
        }
        response.output().write_all(b"fuzz")?;
        Ok(())
    };
    for _ in 0..2 {
        let mut response = BufferedResponse::new();
        let _ = cache.do_cached(&request, &mut response, &resolver);
    }
});
