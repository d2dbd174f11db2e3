use std::time::{Duration, SystemTime};

use http::HeaderMap;
use http::header::{CACHE_CONTROL, EXPIRES, PRAGMA};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub public: bool,
    pub private: bool,
    pub no_cache: bool,
    pub no_store: bool,
    pub max_age: Option<Duration>,
    pub s_maxage: Option<Duration>,
    pub must_revalidate: bool,
}

pub fn parse_cache_control(headers: &HeaderMap) -> CacheControl {
    let mut cc = CacheControl::default();

    for value in headers.get_all(CACHE_CONTROL) {
        let Ok(s) = value.to_str() else {
            continue;
        };
        for part in s.split(',') {
            let (name, argument) = split_directive(part);
            if name.eq_ignore_ascii_case("public") {
                cc.public = true;
            } else if name.eq_ignore_ascii_case("private") {
                cc.private = true;
            } else if name.eq_ignore_ascii_case("no-cache") {
                cc.no_cache = true;
            } else if name.eq_ignore_ascii_case("no-store") {
                cc.no_store = true;
            } else if name.eq_ignore_ascii_case("must-revalidate") {
                cc.must_revalidate = true;
            } else if name.eq_ignore_ascii_case("max-age") {
                if let Some(secs) = argument.and_then(parse_delta_seconds) {
                    cc.max_age = Some(secs);
                }
            } else if name.eq_ignore_ascii_case("s-maxage")
                && let Some(secs) = argument.and_then(parse_delta_seconds)
            {
                cc.s_maxage = Some(secs);
            }
        }
    }
    cc
}

fn split_directive(part: &str) -> (&str, Option<&str>) {
    let part = part.trim();
    match part.split_once('=') {
        Some((name, argument)) => (name.trim(), Some(argument.trim().trim_matches('"'))),
        None => (part, None),
    }
}

fn parse_delta_seconds(value: &str) -> Option<Duration> {
    value.parse::<u64>().ok().map(Duration::from_secs)
}

/// HTTP/1.0 `Pragma: no-cache`.
pub fn pragma_no_cache(headers: &HeaderMap) -> bool {
    headers.get_all(PRAGMA).iter().any(|value| {
        value
            .to_str()
            .map(|s| {
                s.split(',')
                    .any(|part| part.trim().eq_ignore_ascii_case("no-cache"))
            })
            .unwrap_or(false)
    })
}

/// Request directives that forbid answering from, or writing to, the cache.
pub fn request_cache_bypass(headers: &HeaderMap) -> bool {
    let cc = parse_cache_control(headers);
    cc.no_cache || cc.no_store
}

/// Freshness lifetime declared by the origin, relative to `now`.
///
/// `s-maxage` wins over `max-age`, which wins over `Expires`. An `Expires`
/// in the past (or unparseable) yields a zero lifetime.
pub fn freshness_lifetime(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    let cc = parse_cache_control(headers);

    if let Some(s_maxage) = cc.s_maxage {
        return Some(s_maxage);
    }
    if let Some(max_age) = cc.max_age {
        return Some(max_age);
    }

    let expires = headers.get(EXPIRES)?;
    let expires_time = expires
        .to_str()
        .ok()
        .and_then(|s| httpdate::parse_http_date(s).ok());
    match expires_time {
        Some(time) => Some(time.duration_since(now).unwrap_or(Duration::ZERO)),
        None => Some(Duration::ZERO),
    }
}
