//! Proxy module for extracting and validating proxies
//!
//! This module provides functionality for:
//! - Parsing candidates from free-form text and list files
//! - Crawling proxy list sources concurrently
//! - Validating candidates across HTTP, HTTPS, SOCKS4 and SOCKS5
//! - Looking up the country of working proxies

pub mod checker;
pub mod crawler;
pub mod geo;
pub mod models;
pub mod parser;

pub use checker::{CheckMode, CheckReport, CheckerConfig, HttpProber, ProbeResponse, Prober, ProxyChecker};
pub use crawler::{CrawlerConfig, Extraction, ProxyCrawler, Source, SourceOutcome};
pub use geo::{GeoLocation, GeoLocator};
pub use models::{
    Anonymity, Candidate, CandidateSet, CategorizedResults, Category, ProxyAuth, ProxyType,
    ValidationResult,
};
pub use parser::ProxyParser;
