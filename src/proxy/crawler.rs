//! Proxy crawler module for fetching candidate lists from remote sources
//!
//! This module provides functionality for:
//! - Fetching many sources concurrently under a fan-out ceiling
//! - Isolating per-source failures so one bad source never fails the pass
//! - Stopping new fetches once a candidate limit is reached

use crate::error::Error;
use crate::progress::{self, notify, Progress, ProgressSink};
use crate::proxy::models::CandidateSet;
use crate::proxy::parser::ProxyParser;
use crate::Result;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default connect timeout in seconds
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default number of sources fetched at once
const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 10;

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Configuration for proxy crawler
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Total timeout for one source fetch
    pub timeout: Duration,
    /// Connect timeout for one source fetch
    pub connect_timeout: Duration,
    /// Fan-out ceiling for simultaneous fetches
    pub max_concurrent_fetches: usize,
    /// User agent for HTTP requests
    pub user_agent: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl CrawlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_concurrent_fetches(mut self, max: usize) -> Self {
        self.max_concurrent_fetches = max;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// A location that serves proxy lists, plus its usage history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub uri: String,
    pub times_used: u32,
    pub last_proxy_count: u32,
    pub is_active: bool,
    pub last_used: Option<DateTime<Utc>>,
}

impl Source {
    pub fn new(uri: &str) -> Self {
        Self {
            uri: uri.trim().to_string(),
            times_used: 0,
            last_proxy_count: 0,
            is_active: true,
            last_used: None,
        }
    }

    /// Parse a source list, one URI per line; blank lines and `#` comments are skipped
    pub fn parse_list(content: &str) -> Vec<Source> {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(Source::new)
            .collect()
    }

    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Vec<Source>> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse_list(&content))
    }
}

/// Result of fetching a single source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceOutcome {
    /// The source that was fetched
    pub uri: String,
    /// Candidates found in the source
    pub candidates: usize,
    /// Error message if the fetch failed
    pub error: Option<String>,
}

impl SourceOutcome {
    pub fn success(uri: String, candidates: usize) -> Self {
        Self {
            uri,
            candidates,
            error: None,
        }
    }

    pub fn failure(uri: String, error: String) -> Self {
        Self {
            uri,
            candidates: 0,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Everything one extraction pass produced
#[derive(Debug, Clone)]
pub struct Extraction {
    pub candidates: CandidateSet,
    /// One entry per source actually fetched, in source order
    pub outcomes: Vec<SourceOutcome>,
    pub elapsed: Duration,
}

/// Proxy crawler for fetching candidates from remote sources
#[derive(Clone)]
pub struct ProxyCrawler {
    config: CrawlerConfig,
    client: Client,
}

impl ProxyCrawler {
    /// Create a new proxy crawler with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(CrawlerConfig::default())
    }

    /// Create a new proxy crawler with custom configuration
    pub fn with_config(config: CrawlerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    /// Fetch the raw text behind a URL. Non-success statuses are errors.
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status(status.as_u16()));
        }
        Ok(response.text().await?)
    }

    /// Fetch and extract candidates from a single URL
    pub async fn crawl_url(&self, url: &str) -> Result<CandidateSet> {
        let content = self.fetch_text(url).await?;
        Ok(ProxyParser::extract(&content))
    }

    /// Extract candidates from every source.
    ///
    /// See [`ProxyCrawler::extract_with_outcomes`].
    pub async fn extract(
        &self,
        sources: &[Source],
        limit: Option<usize>,
        progress: &dyn ProgressSink,
    ) -> CandidateSet {
        self.extract_with_outcomes(sources, limit, progress)
            .await
            .candidates
    }

    /// Extract candidates from every source, reporting per-source outcomes.
    ///
    /// At most `max_concurrent_fetches` sources are in flight. Once the
    /// number of unique candidates reaches `limit` no further fetches are
    /// started; fetches already in flight are allowed to finish and the
    /// merged set is truncated afterwards. Per-source results are merged in
    /// source order so the outcome does not depend on completion order.
    pub async fn extract_with_outcomes(
        &self,
        sources: &[Source],
        limit: Option<usize>,
        progress: &dyn ProgressSink,
    ) -> Extraction {
        let start = Instant::now();
        let total = sources.len();
        let max_in_flight = self.config.max_concurrent_fetches.max(1);
        let limit_reached = |count: usize| limit.map_or(false, |limit| count >= limit);

        info!(sources = total, ?limit, "starting extraction");

        let mut pending = sources.iter().enumerate();
        let mut in_flight = FuturesUnordered::new();
        let mut per_source: Vec<Option<CandidateSet>> = vec![None; total];
        let mut outcomes: Vec<Option<SourceOutcome>> = vec![None; total];
        let mut seen: HashSet<String> = HashSet::new();
        let mut done = 0;

        loop {
            while in_flight.len() < max_in_flight && !limit_reached(seen.len()) {
                let Some((index, source)) = pending.next() else {
                    break;
                };
                in_flight.push(async move { (index, self.crawl_url(&source.uri).await) });
            }

            let Some((index, result)) = in_flight.next().await else {
                break;
            };
            done += 1;

            let uri = sources[index].uri.clone();
            match result {
                Ok(found) => {
                    debug!(source = %uri, count = found.len(), "source fetched");
                    seen.extend(found.iter().map(|c| c.identity()));
                    outcomes[index] = Some(SourceOutcome::success(uri, found.len()));
                    per_source[index] = Some(found);
                }
                Err(e) => {
                    warn!(source = %uri, error = %e, "source fetch failed");
                    outcomes[index] = Some(SourceOutcome::failure(uri, e.to_string()));
                }
            }

            notify(
                progress,
                Progress::Extraction {
                    candidates: seen.len(),
                    sources_done: done,
                    sources_total: total,
                    rate: progress::rate(seen.len(), start.elapsed()),
                },
            )
            .await;
        }

        let mut candidates = CandidateSet::new();
        for found in per_source.into_iter().flatten() {
            candidates.extend(found);
        }
        if let Some(limit) = limit {
            candidates.truncate(limit);
        }

        let elapsed = start.elapsed();
        info!(
            candidates = candidates.len(),
            sources_done = done,
            "extraction completed in {:.2}s",
            elapsed.as_secs_f64()
        );

        Extraction {
            candidates,
            outcomes: outcomes.into_iter().flatten().collect(),
            elapsed,
        }
    }
}
