use std::time::{Duration, SystemTime};

use http::{HeaderMap, Method, StatusCode};

use crate::http::cache_control::{
    freshness_lifetime, parse_cache_control, pragma_no_cache, request_cache_bypass,
};

/// What the cache may do for an inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPolicy {
    Cacheable,
    Bypass(BypassReason),
    /// Unsafe method: drop the stored resource, then resolve uncached.
    Invalidate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    Method,
    RequestDirective,
}

impl BypassReason {
    pub fn as_str(self) -> &'static str {
        match self {
            BypassReason::Method => "method",
            BypassReason::RequestDirective => "request_directive",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSkipReason {
    Status,
    HeadRequest,
    NoStore,
    NoCache,
    VaryLimits,
    ZeroTtl,
    CaptureFailed,
}

impl CacheSkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheSkipReason::Status => "status",
            CacheSkipReason::HeadRequest => "head_request",
            CacheSkipReason::NoStore => "no_store",
            CacheSkipReason::NoCache => "no_cache",
            CacheSkipReason::VaryLimits => "vary_limits",
            CacheSkipReason::ZeroTtl => "zero_ttl",
            CacheSkipReason::CaptureFailed => "capture_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheWritePlan {
    Store { ttl: Duration },
    Skip(CacheSkipReason),
}

pub fn request_policy(method: &Method, headers: &HeaderMap) -> RequestPolicy {
    if *method == Method::POST
        || *method == Method::PUT
        || *method == Method::PATCH
        || *method == Method::DELETE
    {
        return RequestPolicy::Invalidate;
    }
    if *method != Method::GET && *method != Method::HEAD {
        return RequestPolicy::Bypass(BypassReason::Method);
    }
    if request_cache_bypass(headers) {
        return RequestPolicy::Bypass(BypassReason::RequestDirective);
    }
    RequestPolicy::Cacheable
}

pub fn plan_cache_write(
    method: &Method,
    status: StatusCode,
    headers: &HeaderMap,
    default_ttl: Duration,
) -> CacheWritePlan {
    plan_cache_write_at(method, status, headers, default_ttl, SystemTime::now())
}

pub(super) fn plan_cache_write_at(
    method: &Method,
    status: StatusCode,
    headers: &HeaderMap,
    default_ttl: Duration,
    now: SystemTime,
) -> CacheWritePlan {
    if status != StatusCode::OK {
        return CacheWritePlan::Skip(CacheSkipReason::Status);
    }
    if *method == Method::HEAD {
        return CacheWritePlan::Skip(CacheSkipReason::HeadRequest);
    }

    let cc = parse_cache_control(headers);
    if cc.no_store {
        return CacheWritePlan::Skip(CacheSkipReason::NoStore);
    }
    if cc.no_cache || cc.must_revalidate || pragma_no_cache(headers) {
        return CacheWritePlan::Skip(CacheSkipReason::NoCache);
    }

    let ttl = select_cache_ttl(freshness_lifetime(headers, now), default_ttl);
    if ttl.is_zero() {
        return CacheWritePlan::Skip(CacheSkipReason::ZeroTtl);
    }
    CacheWritePlan::Store { ttl }
}

/// Origin freshness wins whenever the origin declared any, even zero.
fn select_cache_ttl(origin_ttl: Option<Duration>, default_ttl: Duration) -> Duration {
    origin_ttl.unwrap_or(default_ttl)
}
