//! Proxy checker module for validating candidates
//!
//! Each candidate is probed through one or more protocols while a shared
//! semaphore bounds the number of probes in flight. Working results are
//! classified by anonymity and bucketed into [`CategorizedResults`].

use crate::error::Error;
use crate::progress::{self, notify, Progress, ProgressSink};
use crate::proxy::geo::GeoLocator;
use crate::proxy::models::{
    Anonymity, Candidate, CandidateSet, CategorizedResults, ProxyType, ValidationResult,
};
use crate::Result;
use async_trait::async_trait;
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use reqwest::{redirect, Client, Proxy as ReqwestProxy};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Default timeout for one probe in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Default connect timeout for one probe in seconds
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 3;

/// Default number of probes in flight
const DEFAULT_CONCURRENCY: usize = 500;

/// Default number of candidates admitted per batch
const DEFAULT_BATCH_SIZE: usize = 500;

/// Default pause between batches in milliseconds
const DEFAULT_BATCH_PAUSE_MS: u64 = 50;

/// Default number of completed candidates between progress reports
const DEFAULT_PROGRESS_INTERVAL: usize = 50;

const DEFAULT_HTTP_TEST_URL: &str = "http://httpbin.org/get";
const DEFAULT_HTTPS_TEST_URL: &str = "https://httpbin.org/get";
const DEFAULT_IP_CHECK_URL: &str = "http://httpbin.org/ip";

/// Statuses that count as a successful probe
const ACCEPTED_STATUSES: [u16; 4] = [200, 204, 301, 302];

/// Headers that betray a proxy in the path
const PROXY_HEADERS: [&str; 7] = [
    "via",
    "x-forwarded-for",
    "forwarded-for",
    "x-forwarded",
    "client-ip",
    "forwarded",
    "proxy-connection",
];

/// How hard to look at each candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckMode {
    /// All protocols at once, no anonymity inspection
    Fast,
    /// One protocol at a time with anonymity classification
    #[default]
    Thorough,
}

impl fmt::Display for CheckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckMode::Fast => f.write_str("fast"),
            CheckMode::Thorough => f.write_str("thorough"),
        }
    }
}

impl FromStr for CheckMode {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fast" => Ok(CheckMode::Fast),
            "thorough" => Ok(CheckMode::Thorough),
            other => Err(Error::Config(format!(
                "unknown check mode '{}', use fast or thorough",
                other
            ))),
        }
    }
}

/// Configuration for proxy checker
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    pub mode: CheckMode,
    /// Total timeout for each probe
    pub timeout: Duration,
    /// Connect timeout for each probe; kept below `timeout`
    pub connect_timeout: Duration,
    /// Maximum probes in flight
    pub concurrency: usize,
    pub batch_size: usize,
    pub batch_pause: Duration,
    pub progress_interval: usize,
    /// Also try SOCKS4/SOCKS5 for candidates without a SOCKS hint
    pub include_socks: bool,
    pub http_test_url: String,
    pub https_test_url: String,
    /// Endpoint echoing the caller's IP as `{"origin": "..."}`
    pub ip_check_url: String,
    /// Path to MMDB file for geolocation (optional)
    pub mmdb_path: Option<String>,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            mode: CheckMode::default(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            concurrency: DEFAULT_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_pause: Duration::from_millis(DEFAULT_BATCH_PAUSE_MS),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            include_socks: false,
            http_test_url: DEFAULT_HTTP_TEST_URL.to_string(),
            https_test_url: DEFAULT_HTTPS_TEST_URL.to_string(),
            ip_check_url: DEFAULT_IP_CHECK_URL.to_string(),
            mmdb_path: None,
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: CheckMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the probe timeout; the connect timeout is clamped below it
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        if self.connect_timeout >= timeout {
            self.connect_timeout = timeout.mul_f64(0.6);
        }
        self
    }

    /// Set the connect timeout; values not below the probe timeout are clamped
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = if timeout < self.timeout {
            timeout
        } else {
            self.timeout.mul_f64(0.6)
        };
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_batch_pause(mut self, pause: Duration) -> Self {
        self.batch_pause = pause;
        self
    }

    pub fn with_progress_interval(mut self, interval: usize) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_include_socks(mut self, include_socks: bool) -> Self {
        self.include_socks = include_socks;
        self
    }

    pub fn with_test_urls(mut self, http_url: String, https_url: String) -> Self {
        self.http_test_url = http_url;
        self.https_test_url = https_url;
        self
    }

    pub fn with_ip_check_url(mut self, url: String) -> Self {
        self.ip_check_url = url;
        self
    }

    pub fn with_mmdb_path(mut self, path: String) -> Self {
        self.mmdb_path = Some(path);
        self
    }
}

/// What a successful probe saw
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeResponse {
    pub status: u16,
    pub latency: Duration,
    /// Response headers; only filled when inspection was requested
    pub headers: Vec<(String, String)>,
    /// Response body; only filled when inspection was requested
    pub body: String,
}

/// Sends one test request through a candidate
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe `candidate` as a `protocol` proxy. Any error means the probe failed.
    async fn probe(
        &self,
        candidate: &Candidate,
        protocol: ProxyType,
        inspect: bool,
    ) -> Result<ProbeResponse>;

    /// The tester's own public IP, if it can be discovered
    async fn public_ip(&self) -> Option<String>;
}

#[derive(Deserialize)]
struct IpEcho {
    origin: String,
}

/// [`Prober`] backed by reqwest
pub struct HttpProber {
    timeout: Duration,
    connect_timeout: Duration,
    http_test_url: String,
    https_test_url: String,
    ip_check_url: String,
    client: Client,
}

impl HttpProber {
    pub fn from_config(config: &CheckerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            timeout: config.timeout,
            connect_timeout: config.connect_timeout,
            http_test_url: config.http_test_url.clone(),
            https_test_url: config.https_test_url.clone(),
            ip_check_url: config.ip_check_url.clone(),
            client,
        })
    }

    /// Create a reqwest client routed through the candidate
    fn create_client(&self, candidate: &Candidate, protocol: ProxyType) -> Result<Client> {
        let reqwest_proxy = ReqwestProxy::all(candidate.proxy_url(protocol))?;

        let client = Client::builder()
            .proxy(reqwest_proxy)
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .redirect(redirect::Policy::none())
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(client)
    }

    fn test_url(&self, protocol: ProxyType) -> &str {
        match protocol {
            ProxyType::Https => &self.https_test_url,
            _ => &self.http_test_url,
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(
        &self,
        candidate: &Candidate,
        protocol: ProxyType,
        inspect: bool,
    ) -> Result<ProbeResponse> {
        let client = self.create_client(candidate, protocol)?;
        let start = Instant::now();

        let response = tokio::time::timeout(self.timeout, client.get(self.test_url(protocol)).send())
            .await
            .map_err(|_| Error::Timeout(self.timeout))??;

        let status = response.status().as_u16();
        if !ACCEPTED_STATUSES.contains(&status) {
            return Err(Error::Status(status));
        }
        let latency = start.elapsed();

        if !inspect {
            return Ok(ProbeResponse {
                status,
                latency,
                ..Default::default()
            });
        }

        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response.text().await.unwrap_or_default();

        Ok(ProbeResponse {
            status,
            latency,
            headers,
            body,
        })
    }

    async fn public_ip(&self) -> Option<String> {
        let response = match self.client.get(&self.ip_check_url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "public IP discovery failed");
                return None;
            }
        };
        let text = response.text().await.ok()?;
        let echo: IpEcho = serde_json::from_str(&text).ok()?;

        // Proxied callers may see "client, proxy"
        echo.origin
            .split(',')
            .next()
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(String::from)
    }
}

/// Classify what a proxy revealed in a probe response.
///
/// `Transparent` requires the tester's own IP to have been discovered.
pub fn classify_anonymity(response: &ProbeResponse, public_ip: Option<&str>) -> Anonymity {
    let body = response.body.to_lowercase();

    if let Some(ip) = public_ip.filter(|ip| !ip.is_empty()) {
        let leaked = body.contains(ip) || response.headers.iter().any(|(_, value)| value.contains(ip));
        if leaked {
            return Anonymity::Transparent;
        }
    }

    let header_hit = response.headers.iter().any(|(name, value)| {
        let name = name.to_lowercase();
        let value = value.to_lowercase();
        PROXY_HEADERS
            .iter()
            .any(|header| name == *header || value.contains(header))
    });
    let body_hit = PROXY_HEADERS
        .iter()
        .any(|header| body.contains(&format!("\"{}\"", header)));

    if header_hit || body_hit {
        Anonymity::Anonymous
    } else {
        Anonymity::Elite
    }
}

/// Protocols tried one after another in thorough mode
pub fn thorough_order(candidate: &Candidate, include_socks: bool) -> Vec<ProxyType> {
    let mut order = Vec::with_capacity(4);

    if let Some(socks) = candidate.declared.filter(ProxyType::is_socks) {
        order.push(socks);
    }
    if candidate.declared == Some(ProxyType::Https) {
        order.extend([ProxyType::Https, ProxyType::Http]);
    } else {
        order.extend([ProxyType::Http, ProxyType::Https]);
    }
    if include_socks {
        for socks in [ProxyType::Socks5, ProxyType::Socks4] {
            if !order.contains(&socks) {
                order.push(socks);
            }
        }
    }

    order
}

/// Protocols probed together in fast mode
pub fn fast_protocols(include_socks: bool) -> Vec<ProxyType> {
    if include_socks {
        ProxyType::ALL.to_vec()
    } else {
        vec![ProxyType::Http, ProxyType::Https]
    }
}

/// Outcome of one validation run
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub categories: CategorizedResults,
    /// Identities of candidates with no working protocol
    pub dead: Vec<String>,
    pub checked: usize,
    pub working: usize,
    pub elapsed: Duration,
}

impl CheckReport {
    pub fn success_rate(&self) -> f64 {
        if self.checked == 0 {
            0.0
        } else {
            self.working as f64 / self.checked as f64 * 100.0
        }
    }
}

/// Proxy checker for validating candidates
#[derive(Clone)]
pub struct ProxyChecker {
    config: CheckerConfig,
    prober: Arc<dyn Prober>,
    semaphore: Arc<Semaphore>,
    geo_locator: Option<GeoLocator>,
}

impl ProxyChecker {
    /// Create a new proxy checker with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(CheckerConfig::default())
    }

    /// Create a new proxy checker probing over HTTP
    pub fn with_config(config: CheckerConfig) -> Result<Self> {
        let prober = HttpProber::from_config(&config)?;
        let geo_locator = config.mmdb_path.as_ref().and_then(|path| {
            GeoLocator::from_path(path)
                .map_err(|e| warn!(path = %path, error = %e, "geolocation disabled"))
                .ok()
        });

        Ok(Self::with_prober(config, Arc::new(prober)).with_geo_locator(geo_locator))
    }

    /// Create a checker with a custom prober
    pub fn with_prober(config: CheckerConfig, prober: Arc<dyn Prober>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            config,
            prober,
            semaphore,
            geo_locator: None,
        }
    }

    pub fn with_geo_locator(mut self, geo_locator: Option<GeoLocator>) -> Self {
        self.geo_locator = geo_locator;
        self
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Probe slots currently free
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// One gated probe. Failures are logged and collapse to `None`.
    async fn probe(
        &self,
        candidate: &Candidate,
        protocol: ProxyType,
        inspect: bool,
    ) -> Option<ProbeResponse> {
        let Ok(_permit) = self.semaphore.acquire().await else {
            return None;
        };

        match self.prober.probe(candidate, protocol, inspect).await {
            Ok(response) => Some(response),
            Err(e) => {
                debug!(proxy = %candidate.identity(), %protocol, error = %e, "probe failed");
                None
            }
        }
    }

    async fn check_thorough(&self, candidate: &Candidate, public_ip: Option<&str>) -> ValidationResult {
        for protocol in thorough_order(candidate, self.config.include_socks) {
            if let Some(response) = self.probe(candidate, protocol, true).await {
                return ValidationResult::working(
                    candidate.identity(),
                    BTreeSet::from([protocol]),
                    classify_anonymity(&response, public_ip),
                    response.latency,
                );
            }
        }
        ValidationResult::failed(candidate.identity())
    }

    async fn check_fast(&self, candidate: &Candidate) -> ValidationResult {
        let probes = fast_protocols(self.config.include_socks)
            .into_iter()
            .map(|protocol| async move { (protocol, self.probe(candidate, protocol, false).await) });

        let mut protocols = BTreeSet::new();
        let mut fastest: Option<Duration> = None;
        for (protocol, response) in join_all(probes).await {
            if let Some(response) = response {
                protocols.insert(protocol);
                fastest = Some(fastest.map_or(response.latency, |t| t.min(response.latency)));
            }
        }

        match fastest {
            Some(latency) => {
                ValidationResult::working(candidate.identity(), protocols, Anonymity::Anonymous, latency)
            }
            None => ValidationResult::failed(candidate.identity()),
        }
    }

    /// Check a single candidate
    pub async fn check_candidate(&self, candidate: &Candidate, public_ip: Option<&str>) -> ValidationResult {
        let result = match self.config.mode {
            CheckMode::Thorough => self.check_thorough(candidate, public_ip).await,
            CheckMode::Fast => self.check_fast(candidate).await,
        };

        match &self.geo_locator {
            Some(geo) if result.is_working() => {
                let country = geo.country_code(&candidate.host);
                result.with_country(country)
            }
            _ => result,
        }
    }

    /// Validate every candidate and bucket the working ones.
    ///
    /// Candidates are admitted in batches of `batch_size`; a batch finishes
    /// before the next starts. Results are folded here as they complete.
    pub async fn validate(&self, candidates: &CandidateSet, progress: &dyn ProgressSink) -> CheckReport {
        let start = Instant::now();
        let total = candidates.len();
        let batch_size = self.config.batch_size.max(1);
        let interval = self.config.progress_interval.max(1);

        info!(total, mode = %self.config.mode, "starting validation");

        let public_ip = match self.config.mode {
            CheckMode::Thorough if total > 0 => {
                let ip = self.prober.public_ip().await;
                if ip.is_none() {
                    warn!("public IP unknown, transparent proxies cannot be detected");
                }
                ip
            }
            _ => None,
        };

        let mut categories = CategorizedResults::new();
        let mut dead = Vec::new();
        let mut checked = 0;
        let mut working = 0;

        for (index, batch) in candidates.as_slice().chunks(batch_size).enumerate() {
            if index > 0 && !self.config.batch_pause.is_zero() {
                tokio::time::sleep(self.config.batch_pause).await;
            }

            let ip = public_ip.as_deref();
            let mut results: FuturesUnordered<_> = batch
                .iter()
                .map(|candidate| self.check_candidate(candidate, ip))
                .collect();

            while let Some(result) = results.next().await {
                checked += 1;
                if result.is_working() {
                    working += 1;
                    categories.insert(result);
                } else {
                    dead.push(result.proxy);
                }

                if checked % interval == 0 && checked < total {
                    notify(
                        progress,
                        Progress::Validation {
                            checked,
                            total,
                            working,
                            rate: progress::rate(checked, start.elapsed()),
                        },
                    )
                    .await;
                }
            }
        }

        categories.sort();
        dead.sort();

        notify(
            progress,
            Progress::Validation {
                checked,
                total,
                working,
                rate: progress::rate(checked, start.elapsed()),
            },
        )
        .await;

        let elapsed = start.elapsed();
        info!(
            checked,
            working,
            "validation completed in {:.2}s",
            elapsed.as_secs_f64()
        );

        CheckReport {
            categories,
            dead,
            checked,
            working,
            elapsed,
        }
    }
}
