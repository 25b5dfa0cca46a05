//! Error types for the proxy-sieve library

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the library.
///
/// Probe and source-fetch failures are normally absorbed where they happen;
/// they only show up as values of this type inside the modules that log them.
#[derive(Debug, Error)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("invalid proxy type: {0}. Use: http, https, socks4, socks5")]
    InvalidProxyType(String),

    #[error("invalid anonymity class: {0}")]
    InvalidAnonymity(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("geolocation error: {0}")]
    Geo(String),
}

/// Library result type
pub type Result<T> = std::result::Result<T, Error>;
