mod common;

use common::{closed_port, serve_http_only_proxy, serve_routes, Route};
use proxy_sieve::{
    CheckMode, CheckerConfig, CrawlerConfig, NoProgress, Pipeline, ProxyChecker, ProxyCrawler,
    ProxyParser, ProxyStore, ProxyType, Source,
};
use std::time::Duration;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

async fn pipeline(store: ProxyStore) -> Pipeline {
    let crawler = ProxyCrawler::with_config(CrawlerConfig::new().with_timeout(Duration::from_secs(5))).unwrap();
    let checker = ProxyChecker::with_config(
        CheckerConfig::new()
            .with_mode(CheckMode::Fast)
            .with_timeout(Duration::from_secs(1))
            .with_connect_timeout(Duration::from_millis(500))
            .with_batch_pause(Duration::ZERO)
            .with_test_urls(
                "http://proxy-sieve.test/get".to_string(),
                "https://proxy-sieve.test/get".to_string(),
            ),
    )
    .unwrap();

    Pipeline::new(crawler, checker, store)
}

#[tokio::test]
async fn test_auto_scrapes_checks_and_caches() {
    let proxy = serve_http_only_proxy(vec![], "{}".to_string()).await;
    let dead = closed_port().await;
    let listing = format!("{}\n{}\n", proxy, dead);
    let source_server = serve_routes(vec![Route::ok("/proxies.txt", listing)]).await;

    let store = ProxyStore::in_memory().await.unwrap();
    let sources = vec![Source::new(&format!("http://{}/proxies.txt", source_server))];
    store.import_sources(&sources).await.unwrap();

    let pipeline = pipeline(store.clone()).await;
    let (extraction, report) = pipeline.auto(&sources, None, &NoProgress).await;

    assert_eq!(extraction.candidates.len(), 2);
    assert_eq!(report.checked, 2);
    assert_eq!(report.working, 1);
    assert_eq!(report.dead, vec![dead.to_string()]);

    let cached = pipeline.cached(Some(ProxyType::Http), None, DAY).await.unwrap();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].proxy, proxy.to_string());
    assert!(pipeline.cached(Some(ProxyType::Https), None, DAY).await.unwrap().is_empty());

    let source = &store.active_sources().await.unwrap()[0];
    assert_eq!(source.times_used, 1);
    assert_eq!(source.last_proxy_count, 2);

    assert_eq!(store.recent_scrapes(5).await.unwrap().len(), 1);
    assert_eq!(store.recent_checks(5).await.unwrap()[0].mode, "fast");
}

#[tokio::test]
async fn test_recheck_marks_dead_and_keeps_history() {
    let store = ProxyStore::in_memory().await.unwrap();
    let pipeline = pipeline(store.clone()).await;
    let proxy = serve_http_only_proxy(vec![], "{}".to_string()).await;
    let candidates = ProxyParser::parse_string(&proxy.to_string());

    pipeline.check(&candidates, &NoProgress).await;
    pipeline.check(&candidates, &NoProgress).await;
    let entry = store.get(&proxy.to_string()).await.unwrap().unwrap();
    assert_eq!((entry.check_count, entry.success_count), (2, 2));

    // a cached proxy that stops answering
    let gone = closed_port().await;
    store
        .upsert(&gone.to_string(), &[ProxyType::Http].into(), proxy_sieve::Anonymity::Anonymous, None)
        .await;
    pipeline
        .check(&ProxyParser::parse_string(&gone.to_string()), &NoProgress)
        .await;

    let entry = store.get(&gone.to_string()).await.unwrap().unwrap();
    assert!(!entry.is_working);
    assert_eq!((entry.check_count, entry.success_count), (2, 1));
    assert_eq!(store.recent_checks(10).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_store_file_is_created_and_reopened() {
    let dir = std::env::temp_dir().join(format!("proxy-sieve-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let url = format!("sqlite://{}", dir.join("cache.db").display());

    let store = ProxyStore::connect(&url).await.unwrap();
    store
        .upsert("1.2.3.4:8080", &[ProxyType::Socks5].into(), proxy_sieve::Anonymity::Elite, None)
        .await;
    store.close().await;

    let reopened = ProxyStore::connect(&url).await.unwrap();
    let cached = reopened.query(Some(ProxyType::Socks5), None, DAY).await.unwrap();
    assert_eq!(cached.len(), 1);
    reopened.close().await;

    std::fs::remove_dir_all(&dir).unwrap();
}
