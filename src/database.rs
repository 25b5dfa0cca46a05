//! SQLite persistence: the freshness cache, the source registry and run history.
//!
//! Timestamps are stored as unix milliseconds so age comparisons stay numeric.

use crate::proxy::checker::CheckReport;
use crate::proxy::crawler::Source;
use crate::proxy::models::{Anonymity, Category, ProxyType, ValidationResult};
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// One cached proxy
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub proxy: String,
    pub protocols: BTreeSet<ProxyType>,
    pub anonymity: Anonymity,
    pub response_time: Option<Duration>,
    pub country: Option<String>,
    pub last_checked: DateTime<Utc>,
    pub check_count: u32,
    pub success_count: u32,
    pub is_working: bool,
}

impl CacheEntry {
    pub fn protocol_list(&self) -> String {
        self.protocols
            .iter()
            .map(ProxyType::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Debug, FromRow)]
struct CacheRow {
    proxy: String,
    protocols: String,
    anonymity: String,
    response_time: Option<i64>,
    country: Option<String>,
    last_checked: i64,
    check_count: i64,
    success_count: i64,
    is_working: bool,
}

impl From<CacheRow> for CacheEntry {
    fn from(row: CacheRow) -> Self {
        Self {
            proxy: row.proxy,
            protocols: row
                .protocols
                .split(',')
                .filter_map(|p| p.parse().ok())
                .collect(),
            anonymity: row.anonymity.parse().unwrap_or_default(),
            response_time: row
                .response_time
                .map(|ms| Duration::from_millis(ms.max(0) as u64)),
            country: row.country,
            last_checked: from_millis(row.last_checked),
            check_count: row.check_count as u32,
            success_count: row.success_count as u32,
            is_working: row.is_working,
        }
    }
}

#[derive(Debug, FromRow)]
struct SourceRow {
    url: String,
    last_used: Option<i64>,
    times_used: i64,
    last_proxy_count: i64,
    is_active: bool,
}

impl From<SourceRow> for Source {
    fn from(row: SourceRow) -> Self {
        Self {
            uri: row.url,
            times_used: row.times_used as u32,
            last_proxy_count: row.last_proxy_count as u32,
            is_active: row.is_active,
            last_used: row.last_used.map(from_millis),
        }
    }
}

/// One extraction run
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeRecord {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub sources_total: u32,
    pub sources_failed: u32,
    pub candidates: u32,
    /// Candidate limit the run was started with
    pub limit: Option<u32>,
    pub duration: Duration,
}

impl ScrapeRecord {
    pub fn new(
        started_at: DateTime<Utc>,
        sources_total: usize,
        sources_failed: usize,
        candidates: usize,
        limit: Option<usize>,
        duration: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at,
            sources_total: sources_total as u32,
            sources_failed: sources_failed as u32,
            candidates: candidates as u32,
            limit: limit.map(|n| u32::try_from(n).unwrap_or(u32::MAX)),
            duration,
        }
    }
}

#[derive(Debug, FromRow)]
struct ScrapeRow {
    id: String,
    started_at: i64,
    sources_total: i64,
    sources_failed: i64,
    candidates: i64,
    candidate_limit: Option<i64>,
    duration_ms: i64,
}

impl From<ScrapeRow> for ScrapeRecord {
    fn from(row: ScrapeRow) -> Self {
        Self {
            id: Uuid::parse_str(&row.id).unwrap_or_else(|_| Uuid::nil()),
            started_at: from_millis(row.started_at),
            sources_total: row.sources_total as u32,
            sources_failed: row.sources_failed as u32,
            candidates: row.candidates as u32,
            limit: row.candidate_limit.map(|n| n as u32),
            duration: Duration::from_millis(row.duration_ms.max(0) as u64),
        }
    }
}

/// One validation run
#[derive(Debug, Clone, PartialEq)]
pub struct CheckRecord {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub mode: String,
    pub checked: u32,
    pub working: u32,
    pub http: u32,
    pub https: u32,
    pub socks4: u32,
    pub socks5: u32,
    pub elite: u32,
    pub anonymous: u32,
    pub transparent: u32,
    pub average_response_time: Option<Duration>,
    /// Percentage of checked candidates that worked
    pub success_rate: f64,
    pub duration: Duration,
}

impl CheckRecord {
    /// Summarize a finished validation pass
    pub fn from_report(started_at: DateTime<Utc>, mode: &str, report: &CheckReport) -> Self {
        let count = |category| report.categories.count(category) as u32;
        Self {
            id: Uuid::new_v4(),
            started_at,
            mode: mode.to_string(),
            checked: report.checked as u32,
            working: report.working as u32,
            http: count(Category::Protocol(ProxyType::Http)),
            https: count(Category::Protocol(ProxyType::Https)),
            socks4: count(Category::Protocol(ProxyType::Socks4)),
            socks5: count(Category::Protocol(ProxyType::Socks5)),
            elite: count(Category::Anonymity(Anonymity::Elite)),
            anonymous: count(Category::Anonymity(Anonymity::Anonymous)),
            transparent: count(Category::Anonymity(Anonymity::Transparent)),
            average_response_time: report.categories.average_response_time(),
            success_rate: report.success_rate(),
            duration: report.elapsed,
        }
    }
}

#[derive(Debug, FromRow)]
struct CheckRow {
    id: String,
    started_at: i64,
    mode: String,
    checked: i64,
    working: i64,
    http_count: i64,
    https_count: i64,
    socks4_count: i64,
    socks5_count: i64,
    elite_count: i64,
    anonymous_count: i64,
    transparent_count: i64,
    average_response_ms: Option<i64>,
    success_rate: f64,
    duration_ms: i64,
}

impl From<CheckRow> for CheckRecord {
    fn from(row: CheckRow) -> Self {
        Self {
            id: Uuid::parse_str(&row.id).unwrap_or_else(|_| Uuid::nil()),
            started_at: from_millis(row.started_at),
            mode: row.mode,
            checked: row.checked as u32,
            working: row.working as u32,
            http: row.http_count as u32,
            https: row.https_count as u32,
            socks4: row.socks4_count as u32,
            socks5: row.socks5_count as u32,
            elite: row.elite_count as u32,
            anonymous: row.anonymous_count as u32,
            transparent: row.transparent_count as u32,
            average_response_time: row
                .average_response_ms
                .map(|ms| Duration::from_millis(ms.max(0) as u64)),
            success_rate: row.success_rate,
            duration: Duration::from_millis(row.duration_ms.max(0) as u64),
        }
    }
}

/// Handle to the proxy database. Clones share one pool.
#[derive(Clone)]
pub struct ProxyStore {
    pool: SqlitePool,
}

impl ProxyStore {
    /// Open the database, creating it if missing, and run migrations.
    ///
    /// # Example URLs
    /// - `sqlite::memory:` - In-memory database (ephemeral)
    /// - `sqlite://proxies.db` - File-based database
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = if database_url.contains(":memory:") {
            // every connection to :memory: is its own database
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
                .connect(database_url)
                .await?
        } else {
            let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let store = Self { pool };
        store.run_migrations().await?;
        debug!(url = database_url, "proxy store ready");
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS proxy_cache (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                proxy TEXT NOT NULL UNIQUE,
                protocols TEXT NOT NULL,
                anonymity TEXT NOT NULL,
                response_time INTEGER,
                country TEXT,
                last_checked INTEGER NOT NULL,
                check_count INTEGER NOT NULL DEFAULT 1,
                success_count INTEGER NOT NULL DEFAULT 1,
                is_working INTEGER NOT NULL DEFAULT 1
            );

            CREATE INDEX IF NOT EXISTS idx_proxy_cache_last_checked ON proxy_cache(last_checked);
            CREATE INDEX IF NOT EXISTS idx_proxy_cache_working ON proxy_cache(is_working);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS web_sources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL UNIQUE,
                added_at INTEGER NOT NULL,
                last_used INTEGER,
                times_used INTEGER NOT NULL DEFAULT 0,
                last_proxy_count INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scrape_history (
                id TEXT PRIMARY KEY,
                started_at INTEGER NOT NULL,
                sources_total INTEGER NOT NULL,
                sources_failed INTEGER NOT NULL,
                candidates INTEGER NOT NULL,
                candidate_limit INTEGER,
                duration_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS check_history (
                id TEXT PRIMARY KEY,
                started_at INTEGER NOT NULL,
                mode TEXT NOT NULL,
                checked INTEGER NOT NULL,
                working INTEGER NOT NULL,
                http_count INTEGER NOT NULL DEFAULT 0,
                https_count INTEGER NOT NULL DEFAULT 0,
                socks4_count INTEGER NOT NULL DEFAULT 0,
                socks5_count INTEGER NOT NULL DEFAULT 0,
                elite_count INTEGER NOT NULL DEFAULT 0,
                anonymous_count INTEGER NOT NULL DEFAULT 0,
                transparent_count INTEGER NOT NULL DEFAULT 0,
                average_response_ms INTEGER,
                success_rate REAL NOT NULL DEFAULT 0,
                duration_ms INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Close every connection. Further use of any clone fails.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ---- freshness cache ----

    /// Record a successful check. Storage failures are logged, not returned.
    pub async fn upsert(
        &self,
        proxy: &str,
        protocols: &BTreeSet<ProxyType>,
        anonymity: Anonymity,
        response_time: Option<Duration>,
    ) {
        if let Err(e) = self
            .upsert_at(proxy, protocols, anonymity, response_time, None, Utc::now())
            .await
        {
            warn!(proxy, error = %e, "failed to cache working proxy");
        }
    }

    /// [`ProxyStore::upsert`] for a working validation result, keeping its country
    pub async fn upsert_result(&self, result: &ValidationResult) {
        let upserted = self
            .upsert_at(
                &result.proxy,
                &result.protocols,
                result.anonymity,
                result.response_time,
                result.country.as_deref(),
                Utc::now(),
            )
            .await;
        if let Err(e) = upserted {
            warn!(proxy = %result.proxy, error = %e, "failed to cache working proxy");
        }
    }

    /// A missing `country` keeps whatever an earlier check stored.
    async fn upsert_at(
        &self,
        proxy: &str,
        protocols: &BTreeSet<ProxyType>,
        anonymity: Anonymity,
        response_time: Option<Duration>,
        country: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let protocol_list = protocols
            .iter()
            .map(ProxyType::as_str)
            .collect::<Vec<_>>()
            .join(",");

        sqlx::query(
            r#"
            INSERT INTO proxy_cache
                (proxy, protocols, anonymity, response_time, country, last_checked, check_count, success_count, is_working)
            VALUES (?, ?, ?, ?, ?, ?, 1, 1, 1)
            ON CONFLICT(proxy) DO UPDATE SET
                protocols = excluded.protocols,
                anonymity = excluded.anonymity,
                response_time = excluded.response_time,
                country = COALESCE(excluded.country, country),
                last_checked = excluded.last_checked,
                check_count = check_count + 1,
                success_count = success_count + 1,
                is_working = 1
            "#,
        )
        .bind(proxy)
        .bind(protocol_list)
        .bind(anonymity.as_str())
        .bind(response_time.map(duration_millis))
        .bind(country)
        .bind(to_millis(now))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record a failed check for a known proxy. Unknown proxies are ignored.
    pub async fn mark_dead(&self, proxy: &str) {
        if let Err(e) = self.mark_dead_at(proxy, Utc::now()).await {
            warn!(proxy, error = %e, "failed to mark proxy dead");
        }
    }

    async fn mark_dead_at(&self, proxy: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE proxy_cache
            SET is_working = 0, last_checked = ?, check_count = check_count + 1
            WHERE proxy = ?
            "#,
        )
        .bind(to_millis(now))
        .bind(proxy)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Working entries checked within `max_age`, fastest first.
    ///
    /// `protocol` matches exact membership in the entry's protocol set.
    pub async fn query(
        &self,
        protocol: Option<ProxyType>,
        anonymity: Option<Anonymity>,
        max_age: Duration,
    ) -> Result<Vec<CacheEntry>> {
        self.query_at(protocol, anonymity, max_age, Utc::now()).await
    }

    async fn query_at(
        &self,
        protocol: Option<ProxyType>,
        anonymity: Option<Anonymity>,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<CacheEntry>> {
        let cutoff = to_millis(now).saturating_sub(duration_millis(max_age));
        let protocol_pattern = protocol.map(|p| format!("%,{},%", p));
        let anonymity = anonymity.map(|a| a.as_str());

        let rows: Vec<CacheRow> = sqlx::query_as(
            r#"
            SELECT proxy, protocols, anonymity, response_time, country, last_checked,
                   check_count, success_count, is_working
            FROM proxy_cache
            WHERE is_working = 1
              AND last_checked >= ?
              AND (? IS NULL OR (',' || protocols || ',') LIKE ?)
              AND (? IS NULL OR anonymity = ?)
            ORDER BY response_time IS NULL, response_time ASC, proxy ASC
            "#,
        )
        .bind(cutoff)
        .bind(protocol_pattern.as_deref())
        .bind(protocol_pattern.as_deref())
        .bind(anonymity)
        .bind(anonymity)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(CacheEntry::from).collect())
    }

    /// Look up one entry regardless of age or status
    pub async fn get(&self, proxy: &str) -> Result<Option<CacheEntry>> {
        let row: Option<CacheRow> = sqlx::query_as(
            r#"
            SELECT proxy, protocols, anonymity, response_time, country, last_checked,
                   check_count, success_count, is_working
            FROM proxy_cache
            WHERE proxy = ?
            "#,
        )
        .bind(proxy)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(CacheEntry::from))
    }

    /// Delete entries not checked in `max_age_days`, working or not.
    /// Returns the number removed.
    pub async fn sweep(&self, max_age_days: u32) -> Result<u64> {
        self.sweep_at(max_age_days, Utc::now()).await
    }

    async fn sweep_at(&self, max_age_days: u32, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = to_millis(now) - i64::from(max_age_days) * MILLIS_PER_DAY;

        let result = sqlx::query("DELETE FROM proxy_cache WHERE last_checked < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        debug!(removed = result.rows_affected(), max_age_days, "swept proxy cache");
        Ok(result.rows_affected())
    }

    // ---- source registry ----

    /// Register sources; already known URIs are left untouched.
    /// Returns how many were new.
    pub async fn import_sources(&self, sources: &[Source]) -> Result<u64> {
        let now = to_millis(Utc::now());
        let mut added = 0;

        for source in sources {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO web_sources (url, added_at, last_used, times_used, last_proxy_count, is_active)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&source.uri)
            .bind(now)
            .bind(source.last_used.map(to_millis))
            .bind(i64::from(source.times_used))
            .bind(i64::from(source.last_proxy_count))
            .bind(source.is_active)
            .execute(&self.pool)
            .await?;
            added += result.rows_affected();
        }

        Ok(added)
    }

    /// Sources eligible for extraction, in registration order
    pub async fn active_sources(&self) -> Result<Vec<Source>> {
        let rows: Vec<SourceRow> = sqlx::query_as(
            r#"
            SELECT url, last_used, times_used, last_proxy_count, is_active
            FROM web_sources
            WHERE is_active = 1
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Source::from).collect())
    }

    /// Every registered source, active or not
    pub async fn all_sources(&self) -> Result<Vec<Source>> {
        let rows: Vec<SourceRow> = sqlx::query_as(
            r#"
            SELECT url, last_used, times_used, last_proxy_count, is_active
            FROM web_sources
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Source::from).collect())
    }

    /// Fold one extraction pass into a source's usage. Failures are logged.
    pub async fn record_source_pass(&self, uri: &str, proxy_count: usize) {
        let result = sqlx::query(
            r#"
            UPDATE web_sources
            SET times_used = times_used + 1, last_proxy_count = ?, last_used = ?
            WHERE url = ?
            "#,
        )
        .bind(proxy_count as i64)
        .bind(to_millis(Utc::now()))
        .bind(uri)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(source = uri, error = %e, "failed to record source usage");
        }
    }

    /// Stop using a source. Returns false if it was not registered.
    pub async fn deactivate_source(&self, uri: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE web_sources SET is_active = 0 WHERE url = ?")
            .bind(uri)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ---- run history ----

    pub async fn record_scrape(&self, record: &ScrapeRecord) {
        let result = sqlx::query(
            r#"
            INSERT INTO scrape_history
                (id, started_at, sources_total, sources_failed, candidates, candidate_limit, duration_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(to_millis(record.started_at))
        .bind(i64::from(record.sources_total))
        .bind(i64::from(record.sources_failed))
        .bind(i64::from(record.candidates))
        .bind(record.limit.map(i64::from))
        .bind(duration_millis(record.duration))
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(run = %record.id, error = %e, "failed to record scrape run");
        }
    }

    pub async fn record_check(&self, record: &CheckRecord) {
        let result = sqlx::query(
            r#"
            INSERT INTO check_history
                (id, started_at, mode, checked, working,
                 http_count, https_count, socks4_count, socks5_count,
                 elite_count, anonymous_count, transparent_count,
                 average_response_ms, success_rate, duration_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(to_millis(record.started_at))
        .bind(&record.mode)
        .bind(i64::from(record.checked))
        .bind(i64::from(record.working))
        .bind(i64::from(record.http))
        .bind(i64::from(record.https))
        .bind(i64::from(record.socks4))
        .bind(i64::from(record.socks5))
        .bind(i64::from(record.elite))
        .bind(i64::from(record.anonymous))
        .bind(i64::from(record.transparent))
        .bind(record.average_response_time.map(duration_millis))
        .bind(record.success_rate)
        .bind(duration_millis(record.duration))
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(run = %record.id, error = %e, "failed to record check run");
        }
    }

    /// Most recent scrape runs first
    pub async fn recent_scrapes(&self, limit: u32) -> Result<Vec<ScrapeRecord>> {
        let rows: Vec<ScrapeRow> = sqlx::query_as(
            r#"
            SELECT id, started_at, sources_total, sources_failed, candidates, candidate_limit, duration_ms
            FROM scrape_history
            ORDER BY started_at DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ScrapeRecord::from).collect())
    }

    /// Most recent check runs first
    pub async fn recent_checks(&self, limit: u32) -> Result<Vec<CheckRecord>> {
        let rows: Vec<CheckRow> = sqlx::query_as(
            r#"
            SELECT id, started_at, mode, checked, working,
                   http_count, https_count, socks4_count, socks5_count,
                   elite_count, anonymous_count, transparent_count,
                   average_response_ms, success_rate, duration_ms
            FROM check_history
            ORDER BY started_at DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(CheckRecord::from).collect())
    }
}
