mod common;

use common::{closed_port, serve_http_only_proxy, serve_routes, Route};
use proxy_sieve::{
    Anonymity, Candidate, CandidateSet, Category, CheckMode, CheckerConfig, NoProgress,
    ProxyChecker, ProxyType,
};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Duration;

const PUBLIC_IP: &str = "203.0.113.7";

async fn config(mode: CheckMode) -> CheckerConfig {
    let ip_echo = serve_routes(vec![Route::ok("/ip", format!(r#"{{"origin": "{}"}}"#, PUBLIC_IP))]).await;

    CheckerConfig::new()
        .with_mode(mode)
        .with_timeout(Duration::from_secs(1))
        .with_connect_timeout(Duration::from_millis(500))
        .with_batch_pause(Duration::ZERO)
        .with_test_urls(
            "http://proxy-sieve.test/get".to_string(),
            "https://proxy-sieve.test/get".to_string(),
        )
        .with_ip_check_url(format!("http://{}/ip", ip_echo))
}

fn candidate(addr: SocketAddr) -> Candidate {
    Candidate::new(addr.ip().to_string(), addr.port())
}

#[tokio::test]
async fn test_http_only_proxy_in_fast_mode() {
    let proxy = serve_http_only_proxy(vec![], r#"{"origin": "198.51.100.1"}"#.to_string()).await;
    let checker = ProxyChecker::with_config(config(CheckMode::Fast).await.with_include_socks(true)).unwrap();

    let result = checker.check_candidate(&candidate(proxy), None).await;

    assert!(result.is_working());
    assert_eq!(result.protocols, BTreeSet::from([ProxyType::Http]));
    assert!(result.response_time.is_some());
    assert_eq!(result.anonymity, Anonymity::Anonymous);
}

#[tokio::test]
async fn test_http_only_proxy_in_thorough_mode() {
    let proxy = serve_http_only_proxy(
        vec![],
        r#"{"headers": {"Host": "proxy-sieve.test"}, "origin": "198.51.100.1"}"#.to_string(),
    )
    .await;
    let checker = ProxyChecker::with_config(config(CheckMode::Thorough).await.with_include_socks(true)).unwrap();
    let candidates: CandidateSet = [candidate(proxy)].into_iter().collect();

    let report = checker.validate(&candidates, &NoProgress).await;

    assert_eq!(report.working, 1);
    let result = &report.categories.working()[0];
    assert_eq!(result.protocols, BTreeSet::from([ProxyType::Http]));
    assert_eq!(result.anonymity, Anonymity::Elite);
    assert_eq!(report.categories.count(Category::Protocol(ProxyType::Http)), 1);
    assert_eq!(report.categories.count(Category::Protocol(ProxyType::Https)), 0);
}

#[tokio::test]
async fn test_transparent_proxy_leaks_origin() {
    let proxy = serve_http_only_proxy(
        vec![("X-Forwarded-For", PUBLIC_IP.to_string())],
        format!(r#"{{"origin": "{}, 198.51.100.1"}}"#, PUBLIC_IP),
    )
    .await;
    let checker = ProxyChecker::with_config(config(CheckMode::Thorough).await).unwrap();
    let candidates: CandidateSet = [candidate(proxy)].into_iter().collect();

    let report = checker.validate(&candidates, &NoProgress).await;

    assert_eq!(report.categories.count(Category::Anonymity(Anonymity::Transparent)), 1);
}

#[tokio::test]
async fn test_anonymous_proxy_announces_itself() {
    let proxy = serve_http_only_proxy(
        vec![("Via", "1.1 squid".to_string())],
        r#"{"origin": "198.51.100.1"}"#.to_string(),
    )
    .await;
    let checker = ProxyChecker::with_config(config(CheckMode::Thorough).await).unwrap();
    let candidates: CandidateSet = [candidate(proxy)].into_iter().collect();

    let report = checker.validate(&candidates, &NoProgress).await;

    assert_eq!(report.categories.count(Category::Anonymity(Anonymity::Anonymous)), 1);
}

#[tokio::test]
async fn test_unreachable_candidate_is_dead() {
    let dead = closed_port().await;
    let checker = ProxyChecker::with_config(config(CheckMode::Fast).await).unwrap();
    let candidates: CandidateSet = [candidate(dead)].into_iter().collect();

    let report = checker.validate(&candidates, &NoProgress).await;

    assert_eq!(report.working, 0);
    assert_eq!(report.dead, vec![dead.to_string()]);
    assert!(report.categories.iter().all(|(_, bucket)| bucket.is_empty()));
}
