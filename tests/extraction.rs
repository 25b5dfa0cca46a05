mod common;

use common::{closed_port, serve_routes, Route};
use proxy_sieve::{CrawlerConfig, NoProgress, Progress, ProxyCrawler, ProxyType, Source};
use std::time::Duration;
use tokio::sync::mpsc;

fn crawler(max_fetches: usize) -> ProxyCrawler {
    ProxyCrawler::with_config(
        CrawlerConfig::new()
            .with_timeout(Duration::from_secs(5))
            .with_connect_timeout(Duration::from_secs(1))
            .with_max_concurrent_fetches(max_fetches),
    )
    .unwrap()
}

fn source(addr: std::net::SocketAddr, path: &str) -> Source {
    Source::new(&format!("http://{}{}", addr, path))
}

fn rendered(candidates: &proxy_sieve::CandidateSet) -> Vec<String> {
    candidates.iter().map(|c| c.to_string()).collect()
}

#[tokio::test]
async fn test_merges_in_source_order_not_completion_order() {
    let addr = serve_routes(vec![
        Route::ok("/slow.txt", "1.1.1.1:80 socks5://2.2.2.2:1080").delayed(Duration::from_millis(300)),
        Route::ok("/fast.txt", "2.2.2.2:1080\n3.3.3.3:3128"),
    ])
    .await;

    let sources = vec![source(addr, "/slow.txt"), source(addr, "/fast.txt")];
    let candidates = crawler(10).extract(&sources, None, &NoProgress).await;

    assert_eq!(
        rendered(&candidates),
        vec!["socks5://2.2.2.2:1080", "1.1.1.1:80", "3.3.3.3:3128"]
    );
    assert_eq!(candidates.as_slice()[0].declared, Some(ProxyType::Socks5));
}

#[tokio::test]
async fn test_failed_sources_are_isolated() {
    let addr = serve_routes(vec![
        Route::ok("/good.txt", "proxy list: 1.2.3.4:8080 http://5.6.7.8:3128 bad:port 999.1.1.1:80"),
        Route::status("/gone.txt", 404),
    ])
    .await;
    let dead = closed_port().await;

    let sources = vec![
        source(addr, "/gone.txt"),
        source(dead, "/list.txt"),
        source(addr, "/good.txt"),
    ];
    let extraction = crawler(10)
        .extract_with_outcomes(&sources, None, &NoProgress)
        .await;

    let mut found = rendered(&extraction.candidates);
    found.sort();
    assert_eq!(found, vec!["1.2.3.4:8080", "http://5.6.7.8:3128"]);

    assert_eq!(extraction.outcomes.len(), 3);
    assert!(extraction.outcomes[0].error.as_deref().unwrap().contains("404"));
    assert!(!extraction.outcomes[1].is_success());
    assert_eq!(extraction.outcomes[2].candidates, 2);
}

#[tokio::test]
async fn test_slow_source_times_out_alone() {
    let addr = serve_routes(vec![
        Route::ok("/stalled.txt", "7.7.7.7:8080").delayed(Duration::from_secs(3)),
        Route::ok("/quick.txt", "8.8.8.8:3128 9.9.9.9:80"),
    ])
    .await;
    let crawler = ProxyCrawler::with_config(
        CrawlerConfig::new()
            .with_timeout(Duration::from_millis(400))
            .with_connect_timeout(Duration::from_millis(200))
            .with_max_concurrent_fetches(4),
    )
    .unwrap();

    let sources = vec![source(addr, "/stalled.txt"), source(addr, "/quick.txt")];
    let extraction = crawler
        .extract_with_outcomes(&sources, None, &NoProgress)
        .await;

    assert_eq!(rendered(&extraction.candidates), vec!["8.8.8.8:3128", "9.9.9.9:80"]);
    assert_eq!(extraction.outcomes.len(), 2);
    assert!(!extraction.outcomes[0].is_success());
    assert_eq!(extraction.outcomes[0].candidates, 0);
    assert!(extraction.outcomes[1].is_success());
    assert_eq!(extraction.outcomes[1].candidates, 2);
    assert!(extraction.elapsed < Duration::from_secs(3));
}

#[tokio::test]
async fn test_limit_stops_new_fetches_and_truncates() {
    let addr = serve_routes(vec![
        Route::ok("/a.txt", "10.0.0.1:80 10.0.0.2:80 10.0.0.3:80 10.0.0.4:80 10.0.0.5:80"),
        Route::ok("/b.txt", "10.0.1.1:80 10.0.1.2:80 10.0.1.3:80 10.0.1.4:80 10.0.1.5:80"),
        Route::ok("/c.txt", "10.0.2.1:80 10.0.2.2:80"),
    ])
    .await;

    let sources = vec![
        source(addr, "/a.txt"),
        source(addr, "/b.txt"),
        source(addr, "/c.txt"),
    ];
    let extraction = crawler(1)
        .extract_with_outcomes(&sources, Some(7), &NoProgress)
        .await;

    assert_eq!(extraction.candidates.len(), 7);
    assert_eq!(extraction.outcomes.len(), 2);
    assert!(extraction.candidates.iter().all(|c| !c.host.starts_with("10.0.2.")));
}

#[tokio::test]
async fn test_progress_after_every_fetch() {
    let addr = serve_routes(vec![
        Route::ok("/a.txt", "10.0.0.1:80 10.0.0.2:80"),
        Route::ok("/b.txt", "10.0.0.2:80 10.0.0.3:80"),
    ])
    .await;
    let sources = vec![
        source(addr, "/a.txt"),
        source(addr, "/b.txt"),
        source(addr, "/missing.txt"),
    ];
    let (tx, mut rx) = mpsc::unbounded_channel();

    crawler(2).extract(&sources, None, &tx).await;
    drop(tx);

    let mut snapshots = Vec::new();
    while let Some(progress) = rx.recv().await {
        snapshots.push(progress);
    }

    assert_eq!(snapshots.len(), 3);
    match snapshots.last().unwrap() {
        Progress::Extraction {
            candidates,
            sources_done,
            sources_total,
            ..
        } => {
            assert_eq!(*candidates, 3);
            assert_eq!(*sources_done, 3);
            assert_eq!(*sources_total, 3);
        }
        other => panic!("unexpected snapshot {:?}", other),
    }
}

#[tokio::test]
async fn test_extraction_is_repeatable() {
    let addr = serve_routes(vec![
        Route::ok("/a.txt", "socks4://user:pw@8.8.8.8:1080\n8.8.4.4:3128\n"),
        Route::ok("/b.txt", "<td>9.9.9.9:8080</td> 8.8.4.4:3128"),
    ])
    .await;
    let sources = vec![source(addr, "/a.txt"), source(addr, "/b.txt")];
    let crawler = crawler(4);

    let first = crawler.extract(&sources, None, &NoProgress).await;
    let second = crawler.extract(&sources, None, &NoProgress).await;

    assert_eq!(first.as_slice(), second.as_slice());
    assert_eq!(first.len(), 3);
}
