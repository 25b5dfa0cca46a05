//! Scrape → check → cache orchestration

use crate::database::{CacheEntry, CheckRecord, ProxyStore, ScrapeRecord};
use crate::progress::ProgressSink;
use crate::proxy::checker::{CheckReport, ProxyChecker};
use crate::proxy::crawler::{Extraction, ProxyCrawler, Source};
use crate::proxy::models::{Anonymity, CandidateSet, ProxyType};
use crate::Result;
use chrono::Utc;
use std::time::Duration;
use tracing::info;

/// Ties the extractor, the validator and the cache together
#[derive(Clone)]
pub struct Pipeline {
    crawler: ProxyCrawler,
    checker: ProxyChecker,
    store: ProxyStore,
}

impl Pipeline {
    pub fn new(crawler: ProxyCrawler, checker: ProxyChecker, store: ProxyStore) -> Self {
        Self {
            crawler,
            checker,
            store,
        }
    }

    pub fn store(&self) -> &ProxyStore {
        &self.store
    }

    pub fn checker(&self) -> &ProxyChecker {
        &self.checker
    }

    /// Extract candidates and record source usage plus a history row
    pub async fn scrape(
        &self,
        sources: &[Source],
        limit: Option<usize>,
        progress: &dyn ProgressSink,
    ) -> Extraction {
        let started_at = Utc::now();
        let extraction = self
            .crawler
            .extract_with_outcomes(sources, limit, progress)
            .await;

        let mut failed = 0;
        for outcome in &extraction.outcomes {
            if outcome.is_success() {
                self.store
                    .record_source_pass(&outcome.uri, outcome.candidates)
                    .await;
            } else {
                failed += 1;
            }
        }

        self.store
            .record_scrape(&ScrapeRecord::new(
                started_at,
                sources.len(),
                failed,
                extraction.candidates.len(),
                limit,
                extraction.elapsed,
            ))
            .await;

        info!(
            candidates = extraction.candidates.len(),
            sources = sources.len(),
            failed,
            "scrape finished"
        );
        extraction
    }

    /// Validate candidates and fold the outcome into the cache
    pub async fn check(&self, candidates: &CandidateSet, progress: &dyn ProgressSink) -> CheckReport {
        let started_at = Utc::now();
        let report = self.checker.validate(candidates, progress).await;

        for result in report.categories.working() {
            self.store.upsert_result(result).await;
        }
        for proxy in &report.dead {
            self.store.mark_dead(proxy).await;
        }

        self.store
            .record_check(&CheckRecord::from_report(
                started_at,
                &self.checker.config().mode.to_string(),
                &report,
            ))
            .await;

        report
    }

    /// Scrape, then check everything found
    pub async fn auto(
        &self,
        sources: &[Source],
        limit: Option<usize>,
        progress: &dyn ProgressSink,
    ) -> (Extraction, CheckReport) {
        let extraction = self.scrape(sources, limit, progress).await;
        let report = self.check(&extraction.candidates, progress).await;
        (extraction, report)
    }

    /// Fresh working proxies from the cache
    pub async fn cached(
        &self,
        protocol: Option<ProxyType>,
        anonymity: Option<Anonymity>,
        max_age: Duration,
    ) -> Result<Vec<CacheEntry>> {
        self.store.query(protocol, anonymity, max_age).await
    }

    /// Drop cache entries older than `days`
    pub async fn sweep(&self, days: u32) -> Result<u64> {
        let removed = self.store.sweep(days).await?;
        info!(removed, days, "cache swept");
        Ok(removed)
    }
}
