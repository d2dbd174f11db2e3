mod support;

use std::fs;
use std::thread;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use http::header::{CACHE_CONTROL, IF_MODIFIED_SINCE};
use http::{HeaderValue, Method, StatusCode};

use respcache::cache::HttpCache;
use respcache::cli::{Cli, Command};
use respcache::http::BufferedRequest;
use respcache::settings::Settings;
use respcache::{CacheConfig, CacheError, run};

use support::*;

fn memory_cache() -> Result<HttpCache> {
    Ok(HttpCache::new(CacheConfig::memory("integration"))?)
}

#[test]
fn repeated_request_is_served_from_cache() -> Result<()> {
    let cache = memory_cache()?;
    let origin = Origin::new(b"foobar")
        .header("cache-control", "public")
        .header("x-custom", "FOO")
        .header("x-custom", "BAR");

    let first = serve(&cache, &get("http://example.com/page"), &origin)?;
    let second = serve(&cache, &get("http://example.com/page"), &origin)?;

    assert_eq!(origin.calls(), 1);
    assert_eq!(first.body(), b"foobar");
    assert_eq!(second.body(), b"foobar");
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.header_values("cache-control"), vec!["public"]);
    assert_eq!(second.header_values("x-custom"), vec!["FOO", "BAR"]);
    assert_eq!(second.header_values("date").len(), 1);
    Ok(())
}

#[test]
fn vary_selects_matching_variant() -> Result<()> {
    let cache = memory_cache()?;
    let origin = Origin::new(b"encoding=")
        .header("vary", "Accept-Encoding")
        .echo("accept-encoding");
    let gzip = get("http://example.com/asset")
        .header("accept-encoding", HeaderValue::from_static("gzip"));
    let brotli = get("http://example.com/asset")
        .header("accept-encoding", HeaderValue::from_static("br"));

    assert_eq!(serve(&cache, &gzip, &origin)?.body(), b"encoding=gzip");
    assert_eq!(serve(&cache, &brotli, &origin)?.body(), b"encoding=br");
    assert_eq!(origin.calls(), 2);

    assert_eq!(serve(&cache, &gzip, &origin)?.body(), b"encoding=gzip");
    assert_eq!(serve(&cache, &brotli, &origin)?.body(), b"encoding=br");
    assert_eq!(origin.calls(), 2);

    let stats = cache.stats();
    assert_eq!(stats.resources, 1);
    assert_eq!(stats.variants, 2);
    Ok(())
}

#[test]
fn undecodable_queries_are_distinct_resources() -> Result<()> {
    let cache = memory_cache()?;
    let ff = Origin::new(b"resource-ff");
    let fe = Origin::new(b"resource-fe");

    serve(&cache, &get("http://example.com/r?id=%FF"), &ff)?;
    let response = serve(&cache, &get("http://example.com/r?id=%FE"), &fe)?;

    assert_eq!(response.body(), b"resource-fe");
    assert_eq!(fe.calls(), 1);
    assert_eq!(cache.stats().resources, 2);
    Ok(())
}

#[test]
fn vary_wildcard_is_never_reused() -> Result<()> {
    let cache = memory_cache()?;
    let origin = Origin::new(b"personal").header("vary", "*");

    serve(&cache, &get("http://example.com/me"), &origin)?;
    serve(&cache, &get("http://example.com/me"), &origin)?;

    assert_eq!(origin.calls(), 2);
    Ok(())
}

#[test]
fn no_store_response_is_not_cached() -> Result<()> {
    let cache = memory_cache()?;
    let origin = Origin::new(b"secret").header("cache-control", "no-store");

    let first = serve(&cache, &get("http://example.com/secret"), &origin)?;
    serve(&cache, &get("http://example.com/secret"), &origin)?;

    assert_eq!(first.body(), b"secret");
    assert_eq!(origin.calls(), 2);
    assert_eq!(cache.stats().variants, 0);
    Ok(())
}

#[test]
fn server_errors_are_not_cached() -> Result<()> {
    let cache = memory_cache()?;
    let origin = Origin::new(b"boom").status(StatusCode::INTERNAL_SERVER_ERROR);

    let response = serve(&cache, &get("http://example.com/broken"), &origin)?;
    serve(&cache, &get("http://example.com/broken"), &origin)?;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(origin.calls(), 2);
    Ok(())
}

#[test]
fn byte_budget_is_never_exceeded() -> Result<()> {
    let cache = HttpCache::new(CacheConfig::memory("integration").with_max_total_bytes(16))?;
    let origin = Origin::new(b"0123456789");

    for path in ["a", "b", "c", "d"] {
        serve(&cache, &get(&format!("http://example.com/{path}")), &origin)?;
        assert!(cache.stats().bytes <= 16);
    }

    assert_eq!(cache.stats().variants, 1);
    serve(&cache, &get("http://example.com/d"), &origin)?;
    assert_eq!(origin.calls(), 4);
    Ok(())
}

#[test]
fn entry_budget_evicts_oldest() -> Result<()> {
    let cache = HttpCache::new(CacheConfig::memory("integration").with_max_entries(2))?;
    let origin = Origin::new(b"body");

    for path in ["a", "b", "c"] {
        serve(&cache, &get(&format!("http://example.com/{path}")), &origin)?;
    }
    assert_eq!(cache.stats().variants, 2);

    serve(&cache, &get("http://example.com/c"), &origin)?;
    assert_eq!(origin.calls(), 3);
    serve(&cache, &get("http://example.com/a"), &origin)?;
    assert_eq!(origin.calls(), 4);
    Ok(())
}

#[test]
fn request_no_cache_goes_to_origin() -> Result<()> {
    let cache = memory_cache()?;
    let origin = Origin::new(b"fresh");

    serve(&cache, &get("http://example.com/news"), &origin)?;
    let reload = get("http://example.com/news").header(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    serve(&cache, &reload, &origin)?;
    assert_eq!(origin.calls(), 2);

    serve(&cache, &get("http://example.com/news"), &origin)?;
    assert_eq!(origin.calls(), 2);
    Ok(())
}

#[test]
fn unsafe_method_invalidates_resource() -> Result<()> {
    let cache = memory_cache()?;
    let origin = Origin::new(b"item");

    serve(&cache, &get("http://example.com/items/1"), &origin)?;
    let update = BufferedRequest::new(Method::POST, "http://example.com/items/1".parse()?);
    serve(&cache, &update, &origin)?;
    assert_eq!(cache.stats().variants, 0);

    serve(&cache, &get("http://example.com/items/1"), &origin)?;
    assert_eq!(origin.calls(), 3);
    Ok(())
}

#[test]
fn expired_entries_are_refreshed() -> Result<()> {
    let cache = HttpCache::new(
        CacheConfig::memory("integration").with_default_expiry(Duration::from_millis(5)),
    )?;
    let origin = Origin::new(b"clock");

    serve(&cache, &get("http://example.com/time"), &origin)?;
    thread::sleep(Duration::from_millis(20));
    serve(&cache, &get("http://example.com/time"), &origin)?;

    assert_eq!(origin.calls(), 2);
    Ok(())
}

#[test]
fn origin_max_age_overrides_default_expiry() -> Result<()> {
    let cache = HttpCache::new(
        CacheConfig::memory("integration").with_default_expiry(Duration::from_millis(5)),
    )?;
    let origin = Origin::new(b"long").header("cache-control", "max-age=3600");

    serve(&cache, &get("http://example.com/long"), &origin)?;
    thread::sleep(Duration::from_millis(20));
    serve(&cache, &get("http://example.com/long"), &origin)?;

    assert_eq!(origin.calls(), 1);
    Ok(())
}

#[test]
fn conditional_request_gets_not_modified() -> Result<()> {
    let cache = memory_cache()?;
    let origin = Origin::new(b"doc").header("last-modified", "Wed, 21 Oct 2015 07:28:00 GMT");
    serve(&cache, &get("http://example.com/doc"), &origin)?;

    let since = httpdate::fmt_http_date(SystemTime::now());
    let conditional = get("http://example.com/doc").header(IF_MODIFIED_SINCE, HeaderValue::from_str(&since)?);
    let response = serve(&cache, &conditional, &origin)?;

    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert!(response.body().is_empty());
    assert_eq!(origin.calls(), 1);
    Ok(())
}

#[test]
fn resolver_errors_are_passed_through() -> Result<()> {
    let cache = memory_cache()?;
    let failing = |_: &dyn respcache::CacheRequest,
                   _: &mut dyn respcache::CacheResponse|
     -> anyhow::Result<()> { Err(anyhow::anyhow!("upstream unavailable")) };

    let err = serve(&cache, &get("http://example.com/down"), &failing).unwrap_err();
    assert!(err.to_string().contains("upstream unavailable"), "{err}");
    assert_eq!(cache.stats().variants, 0);
    Ok(())
}

#[test]
fn concurrent_requests_share_one_cache() -> Result<()> {
    let cache = memory_cache()?;
    let origin = Origin::new(b"shared");

    thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                for _ in 0..10 {
                    let response = serve(&cache, &get("http://example.com/shared"), &origin)
                        .expect("request served");
                    assert_eq!(response.body(), b"shared");
                }
            });
        }
    });

    assert!(origin.calls() >= 1);
    assert!(origin.calls() < 80);
    assert_eq!(cache.stats().variants, 1);
    Ok(())
}

#[test]
fn persistent_cache_survives_reopen() -> Result<()> {
    let dirs = TestDirs::new()?;
    let config = CacheConfig::directory("pages", &dirs.cache_root).with_persistence(true);
    let origin = Origin::new(b"foobar")
        .header("cache-control", "max-age=600")
        .header("x-custom", "FOO")
        .header("x-custom", "BAR");

    {
        let cache = HttpCache::new(config.clone())?;
        serve(&cache, &get("http://example.com/kept"), &origin)?;
    }

    let cache = HttpCache::new(config)?;
    assert_eq!(cache.stats().variants, 1);
    let response = serve(&cache, &get("http://example.com/kept"), &origin)?;

    assert_eq!(origin.calls(), 1);
    assert_eq!(response.body(), b"foobar");
    assert_eq!(response.header_values("x-custom"), vec!["FOO", "BAR"]);
    Ok(())
}

#[test]
fn non_ascii_vary_value_survives_reopen() -> Result<()> {
    let dirs = TestDirs::new()?;
    let config = CacheConfig::directory("pages", &dirs.cache_root).with_persistence(true);
    let origin = Origin::new(b"for-").header("vary", "x-foo").echo("x-foo");
    let cafe = get("http://example.com/menu")
        .header("x-foo", HeaderValue::from_bytes(b"caf\xc3\xa9")?);

    {
        let cache = HttpCache::new(config.clone())?;
        serve(&cache, &cafe, &origin)?;
    }

    let cache = HttpCache::new(config)?;
    assert_eq!(cache.stats().variants, 1);

    let plain = serve(&cache, &get("http://example.com/menu"), &origin)?;
    assert_eq!(plain.body(), b"for-");
    assert_eq!(origin.calls(), 2);

    let again = serve(&cache, &cafe, &origin)?;
    assert_eq!(again.body(), b"for-caf\xc3\xa9");
    assert_eq!(origin.calls(), 2);
    Ok(())
}

#[test]
fn corrupt_body_is_dropped_on_reopen() -> Result<()> {
    let dirs = TestDirs::new()?;
    let config = CacheConfig::directory("pages", &dirs.cache_root).with_persistence(true);
    let origin = Origin::new(b"foobar");

    {
        let cache = HttpCache::new(config.clone())?;
        serve(&cache, &get("http://example.com/damaged"), &origin)?;
    }
    let files = body_files(&dirs.active_dir("pages"))?;
    assert_eq!(files.len(), 1);
    fs::write(&files[0], b"garbage")?;

    let cache = HttpCache::new(config)?;
    assert_eq!(cache.stats().variants, 0);
    assert!(body_files(&dirs.active_dir("pages"))?.is_empty());

    serve(&cache, &get("http://example.com/damaged"), &origin)?;
    assert_eq!(origin.calls(), 2);
    Ok(())
}

#[test]
fn corrupt_body_at_runtime_reports_unreadable_hit() -> Result<()> {
    let dirs = TestDirs::new()?;
    let cache = HttpCache::new(CacheConfig::directory("pages", &dirs.cache_root))?;
    let origin = Origin::new(b"foobar");
    serve(&cache, &get("http://example.com/flaky"), &origin)?;

    let files = body_files(&dirs.active_dir("pages"))?;
    fs::write(&files[0], b"foobaz")?;

    let mut response = respcache::http::BufferedResponse::new();
    let err = cache
        .do_cached(&get("http://example.com/flaky"), &mut response, &origin)
        .unwrap_err();
    assert!(matches!(err, CacheError::UnreadableHit { .. }), "{err:?}");
    assert_eq!(cache.stats().variants, 0);

    let response = serve(&cache, &get("http://example.com/flaky"), &origin)?;
    assert_eq!(response.body(), b"foobar");
    assert_eq!(origin.calls(), 2);
    Ok(())
}

#[test]
fn storage_failure_is_logged_and_response_still_served() -> Result<()> {
    let dirs = TestDirs::new()?;
    let cache = HttpCache::new(CacheConfig::directory("pages", &dirs.cache_root))?;
    let active = dirs.active_dir("pages");
    fs::remove_dir_all(&active)?;
    fs::write(&active, b"not a directory")?;
    let origin = Origin::new(b"foobar");

    let (response, logs) = capture_logs("warn", || serve(&cache, &get("http://example.com/x"), &origin));

    assert_eq!(response?.body(), b"foobar");
    assert!(logs.contains("failed to store cached response"), "{logs}");
    assert_eq!(cache.stats().variants, 0);
    Ok(())
}

#[test]
fn cli_commands_report_on_configured_cache() -> Result<()> {
    let dirs = TestDirs::new()?;
    dirs.write_config(&format!(
        "name = \"pages\"\ncache_dir = \"{}\"\npersistent = true\nlog = \"text\"\n",
        dirs.cache_root.display()
    ))?;
    let cli = |command| Cli {
        config: Some(dirs.config_path.clone()),
        command,
    };
    let settings = Settings::load(&cli(Command::Stats))?;

    {
        let cache = HttpCache::new(settings.cache_config()?)?;
        serve(&cache, &get("http://example.com/cli"), &Origin::new(b"foobar"))?;
    }

    let mut out = Vec::new();
    run(&settings, Command::Stats, &mut out)?;
    let text = String::from_utf8(out)?;
    assert!(text.contains("1 resources, 1 variants, 6 bytes"), "{text}");
    assert!(text.contains("persistent"), "{text}");

    let mut out = Vec::new();
    run(&settings, Command::Purge, &mut out)?;
    assert_eq!(String::from_utf8(out)?, "purged 1 entries\n");

    let mut out = Vec::new();
    run(&settings, Command::Sweep, &mut out)?;
    assert_eq!(
        String::from_utf8(out)?,
        "removed 0 expired entries, reclaimed 0 bytes\n"
    );

    let mut out = Vec::new();
    run(&settings, Command::Metrics, &mut out)?;
    assert!(String::from_utf8(out)?.contains("cache_store_total"));
    Ok(())
}
