mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{Html, IntoResponse, Redirect};
use axum::routing::get;
use axum::Router;
use media_resolver_lib::resolver::{MediaKind, MemoryCache, MemoryPoolStore, MemoryStats};
use media_resolver_lib::{ErrorCode, MediaResolver, Platform, Tier};
use tokio_util::sync::CancellationToken;

fn post_page(base: &str) -> String {
    format!(
        r#"<!doctype html><html><head>
<meta property="og:title" content="Sunset clip">
<meta property="og:type" content="video.other">
<meta property="og:image" content="{base}/media/cover.jpg">
<meta property="og:video" content="{base}/media/clip.mp4">
<meta property="og:video:width" content="1280">
<meta property="og:video:height" content="720">
</head><body></body></html>"#
    )
}

async fn open_post(State(base): State<String>) -> Html<String> {
    Html(post_page(&base))
}

async fn members_post(State(base): State<String>, headers: HeaderMap) -> impl IntoResponse {
    let logged_in = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |c| c.contains("sessionid=good"));
    if logged_in {
        Html(post_page(&base)).into_response()
    } else {
        Redirect::temporary("/accounts/login/?next=/post/777").into_response()
    }
}

struct Fixture {
    base: String,
    resolver: MediaResolver,
    cache: Arc<MemoryCache>,
    stats: Arc<MemoryStats>,
}

async fn fixture() -> Fixture {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base = format!("http://{}", addr);

    let app = Router::new()
        .route("/s/abc", get(|| async { Redirect::temporary("/post/12345?igsh=share") }))
        .route("/s/dead", get(|| async { "link expired" }))
        .route("/post/12345", get(open_post))
        .route("/post/777", get(members_post))
        .route("/accounts/login/", get(|| async { Html("<html><body>Log in</body></html>") }))
        .route("/media/clip.mp4", get(|| async { "fake mp4 bytes" }))
        .with_state(base.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = common::local_config()
        .with_extra_domain(Platform::Threads, "127.0.0.1")
        .with_extra_short_link(Some(Platform::Threads), "127.0.0.1/s/");
    let cache = Arc::new(MemoryCache::new());
    let stats = Arc::new(MemoryStats::new());
    let resolver = MediaResolver::builder(config)
        .with_store(Arc::new(MemoryPoolStore::new()))
        .with_cache(cache.clone())
        .with_stats(stats.clone())
        .build()
        .await
        .unwrap();

    Fixture {
        base,
        resolver,
        cache,
        stats,
    }
}

async fn wait_for_stats(stats: &MemoryStats, count: usize) {
    for _ in 0..50 {
        if stats.events().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_short_link_resolves_to_formats() {
    let f = fixture().await;
    let input = format!("saw this earlier {}/s/abc !", f.base);

    let resolution = f.resolver.resolve(&input, "test").await;

    let request = resolution.request.as_ref().unwrap();
    assert_eq!(request.platform, Platform::Threads);
    assert!(request.resolution.was_resolved);
    assert_eq!(request.resolution.resolved_url, format!("{}/post/12345", f.base));
    assert_eq!(request.resolution.redirect_chain.len(), 2);
    assert_eq!(request.descriptor.content_id.as_deref(), Some("12345"));

    let key = request.cache_key.as_str();
    let hex = key.strip_prefix("threads:").unwrap();
    assert_eq!(hex.len(), 16);
    assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));

    let media = resolution.result.media().unwrap();
    assert_eq!(media.title.as_deref(), Some("Sunset clip"));
    assert!(!media.used_credential);
    assert!(!media.formats.is_empty());
    let best = media.formats.first().unwrap();
    assert_eq!(best.kind, MediaKind::Video);
    assert_eq!(best.url, format!("{}/media/clip.mp4", f.base));

    let mut seen = HashSet::new();
    for format in &media.formats {
        assert!(seen.insert((format.quality_label.clone(), format.kind, format.item_id.clone())));
    }

    let dispatch = resolution.dispatch.as_ref().unwrap();
    assert_eq!(dispatch.engine, Some("markup"));
    assert!(!dispatch.credential_retry_used);
    assert_eq!(f.cache.len(), 1);

    wait_for_stats(&f.stats, 1).await;
    let events = f.stats.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].platform, Platform::Threads);
    assert!(events[0].success);
    assert_eq!(events[0].source_channel, "test");
}

#[tokio::test]
async fn test_second_request_is_served_from_cache() {
    let f = fixture().await;
    let input = format!("{}/s/abc", f.base);

    let first = f.resolver.resolve(&input, "test").await;
    let second = f.resolver.resolve(&input, "test").await;

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert!(second.dispatch.is_none());
    assert_eq!(first.result, second.result);

    wait_for_stats(&f.stats, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(f.stats.events().len(), 1);
}

#[tokio::test]
async fn test_dead_short_link_is_resolve_failed() {
    let f = fixture().await;

    let resolution = f.resolver.resolve(&format!("{}/s/dead", f.base), "test").await;

    assert_eq!(resolution.result.error_code(), Some(ErrorCode::ResolveFailed));
    assert!(resolution.request.is_none());
    assert!(resolution.dispatch.is_none());
    assert!(f.cache.is_empty());
}

#[tokio::test]
async fn test_login_wall_retries_once_with_private_session() {
    let f = fixture().await;
    let id = f
        .resolver
        .pool()
        .add(Platform::Threads, Tier::Private, "sessionid=good; csrftoken=t")
        .await;

    let resolution = f.resolver.resolve(&format!("{}/post/777", f.base), "test").await;

    let media = resolution.result.media().unwrap();
    assert!(media.used_credential);
    let dispatch = resolution.dispatch.as_ref().unwrap();
    assert!(dispatch.credential_retry_used);
    assert_eq!(dispatch.attempts.len(), 2);
    assert_eq!(dispatch.attempts[0].code, Some(ErrorCode::CookieRequired));
    assert!(!dispatch.attempts[0].credentialed);
    assert!(dispatch.attempts[1].credentialed);

    let credential = f.resolver.pool().credential(Platform::Threads, Tier::Private, &id).unwrap();
    assert_eq!(credential.failure_count, 0);
    assert!(credential.last_used_at.is_some());
}

#[tokio::test]
async fn test_download_selected_format() {
    let f = fixture().await;
    let resolution = f.resolver.resolve(&format!("{}/post/12345", f.base), "test").await;
    let format = resolution.result.media().unwrap().formats.first().unwrap().clone();

    let fetched = f
        .resolver
        .download(&format, Platform::Threads, false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(fetched.bytes, "fake mp4 bytes".len() as u64);
    assert_eq!(std::fs::read_to_string(fetched.path()).unwrap(), "fake mp4 bytes");
}
