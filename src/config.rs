//! Application configuration
//!
//! Defaults are overridden by environment variables (optionally loaded from a
//! `.env` file), which the CLI flags in turn override.

use crate::error::Error;
use crate::proxy::checker::CheckerConfig;
use crate::proxy::crawler::CrawlerConfig;
use crate::Result;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

/// Default database location
pub const DEFAULT_DATABASE_URL: &str = "sqlite://proxy_cache.db";

/// Default freshness window for cache queries, in hours
pub const DEFAULT_CACHE_MAX_AGE_HOURS: u64 = 24;

/// Default retention for cache entries, in days
pub const DEFAULT_SWEEP_DAYS: u32 = 7;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub crawler: CrawlerConfig,
    pub checker: CheckerConfig,
    /// Freshness window for cache queries
    pub cache_max_age: Duration,
    /// Entries older than this many days are swept
    pub sweep_days: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            crawler: CrawlerConfig::default(),
            checker: CheckerConfig::default(),
            cache_max_age: Duration::from_secs(DEFAULT_CACHE_MAX_AGE_HOURS * 3600),
            sweep_days: DEFAULT_SWEEP_DAYS,
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{}={:?}: {}", name, raw, e))),
        _ => Ok(None),
    }
}

impl Config {
    /// Load `.env` if present, then read the process environment
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env");
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = parse_var::<String>(&lookup, "DATABASE_URL")? {
            config.database_url = url;
        }
        if let Some(concurrency) = parse_var::<usize>(&lookup, "MAX_CONCURRENT")? {
            config.checker = config.checker.with_concurrency(concurrency);
        }
        if let Some(secs) = parse_var::<f64>(&lookup, "DEFAULT_TIMEOUT")? {
            config.checker = config.checker.with_timeout(seconds("DEFAULT_TIMEOUT", secs)?);
        }
        if let Some(secs) = parse_var::<f64>(&lookup, "CONNECT_TIMEOUT")? {
            config.checker = config
                .checker
                .with_connect_timeout(seconds("CONNECT_TIMEOUT", secs)?);
        }
        if let Some(batch_size) = parse_var::<usize>(&lookup, "BATCH_SIZE")? {
            config.checker = config.checker.with_batch_size(batch_size);
        }
        if let Some(fetches) = parse_var::<usize>(&lookup, "FETCH_CONCURRENCY")? {
            config.crawler = config.crawler.with_max_concurrent_fetches(fetches);
        }
        if let Some(hours) = parse_var::<u64>(&lookup, "CACHE_MAX_AGE_HOURS")? {
            config.cache_max_age = hours_to_duration("CACHE_MAX_AGE_HOURS", hours)?;
        }
        if let Some(days) = parse_var::<u32>(&lookup, "SWEEP_DAYS")? {
            config.sweep_days = days;
        }
        if let Some(path) = parse_var::<String>(&lookup, "MMDB_PATH")? {
            config.checker = config.checker.with_mmdb_path(path);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings no run could make progress with
    pub fn validate(&self) -> Result<()> {
        if self.checker.concurrency == 0 {
            return Err(Error::Config("MAX_CONCURRENT must be at least 1".to_string()));
        }
        if self.checker.batch_size == 0 {
            return Err(Error::Config("BATCH_SIZE must be at least 1".to_string()));
        }
        if self.crawler.max_concurrent_fetches == 0 {
            return Err(Error::Config("FETCH_CONCURRENCY must be at least 1".to_string()));
        }
        if self.checker.timeout.is_zero() {
            return Err(Error::Config("DEFAULT_TIMEOUT must be positive".to_string()));
        }
        Ok(())
    }
}

fn seconds(name: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|e| Error::Config(format!("{}: {}", name, e)))
}

fn hours_to_duration(name: &str, hours: u64) -> Result<Duration> {
    hours
        .checked_mul(3600)
        .map(Duration::from_secs)
        .ok_or_else(|| Error::Config(format!("{}: {} hours is out of range", name, hours)))
}
