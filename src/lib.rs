//! Proxy Sieve - proxy scraper, validator and cache
//!
//! Candidates are scraped from proxy list sources, validated concurrently
//! across HTTP, HTTPS, SOCKS4 and SOCKS5, and the working ones are kept in a
//! SQLite freshness cache.

pub mod config;
pub mod database;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod proxy;
pub mod tui;

pub use config::Config;
pub use database::{CacheEntry, CheckRecord, ProxyStore, ScrapeRecord};
pub use error::{Error, Result};
pub use pipeline::Pipeline;
pub use progress::{LogProgress, NoProgress, Progress, ProgressSink};
pub use proxy::*;
