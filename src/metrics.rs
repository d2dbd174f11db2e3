use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static CACHE_LOOKUP_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("cache_lookup_total", "HTTP cache lookups by result");
    let vec = IntCounterVec::new(opts, &["result"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register cache_lookup_total");
    vec
});

static CACHE_BYPASS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new(
        "cache_bypass_total",
        "Requests resolved without consulting the cache, by reason",
    );
    let vec = IntCounterVec::new(opts, &["reason"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register cache_bypass_total");
    vec
});

static CACHE_STORE_SKIPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new(
        "cache_store_skipped_total",
        "Resolved responses not stored, by reason",
    );
    let vec = IntCounterVec::new(opts, &["reason"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register cache_store_skipped_total");
    vec
});

static CACHE_STORE_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("cache_store_total", "HTTP cache store calls")
        .expect("create cache_store_total");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_store_total");
    counter
});

static CACHE_STORE_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("cache_store_errors_total", "HTTP cache store errors")
        .expect("create cache_store_errors_total");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_store_errors_total");
    counter
});

static CACHE_EVICTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter =
        IntCounter::new("cache_evictions_total", "HTTP cache evictions").expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_evictions_total");
    counter
});

static CACHE_SWEEP_RUNS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter =
        IntCounter::new("cache_sweep_runs_total", "HTTP cache sweep runs").expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_sweep_runs_total");
    counter
});

static CACHE_SWEEP_EXPIRED_ENTRIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "cache_sweep_expired_entries_total",
        "Expired cache entries removed by sweeps",
    )
    .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_sweep_expired_entries_total");
    counter
});

static CACHE_SWEEP_BYTES_RECLAIMED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "cache_sweep_bytes_reclaimed_total",
        "Bytes reclaimed by cache sweeps",
    )
    .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_sweep_bytes_reclaimed_total");
    counter
});

static CACHE_CLEANUP_DIRS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "cache_cleanup_dirs_total",
        "Old cache directories removed after a layout upgrade",
    )
    .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_cleanup_dirs_total");
    counter
});

/// `result` is one of `hit`, `miss`, `expired` or `unreadable`.
pub fn record_cache_lookup(result: &str) {
    CACHE_LOOKUP_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_cache_bypass(reason: &str) {
    CACHE_BYPASS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_cache_store_skipped(reason: &str) {
    CACHE_STORE_SKIPPED_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_cache_store() {
    CACHE_STORE_TOTAL.inc();
}

pub fn record_cache_store_error() {
    CACHE_STORE_ERRORS_TOTAL.inc();
}

pub fn record_cache_eviction() {
    CACHE_EVICTIONS_TOTAL.inc();
}

pub fn record_cache_sweep_run() {
    CACHE_SWEEP_RUNS_TOTAL.inc();
}

pub fn record_cache_sweep_removed(entries: u64, bytes: u64) {
    if entries > 0 {
        CACHE_SWEEP_EXPIRED_ENTRIES_TOTAL.inc_by(entries);
    }
    if bytes > 0 {
        CACHE_SWEEP_BYTES_RECLAIMED_TOTAL.inc_by(bytes);
    }
}

pub fn record_cache_cleanup_dir() {
    CACHE_CLEANUP_DIRS_TOTAL.inc();
}

pub fn gather() -> Vec<u8> {
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("encode metrics");
    buffer
}

/// The registry in the Prometheus text exposition format.
pub fn gather_text() -> String {
    String::from_utf8_lossy(&gather()).into_owned()
}
