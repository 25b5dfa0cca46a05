//! Proxy data models

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

/// Proxy protocol enumeration
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    #[default]
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyType {
    pub const ALL: [ProxyType; 4] = [
        ProxyType::Http,
        ProxyType::Https,
        ProxyType::Socks4,
        ProxyType::Socks5,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyType::Http => "http",
            ProxyType::Https => "https",
            ProxyType::Socks4 => "socks4",
            ProxyType::Socks5 => "socks5",
        }
    }

    pub fn is_socks(&self) -> bool {
        matches!(self, ProxyType::Socks4 | ProxyType::Socks5)
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ProxyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "http" => Ok(ProxyType::Http),
            "https" => Ok(ProxyType::Https),
            "socks4" => Ok(ProxyType::Socks4),
            "socks5" => Ok(ProxyType::Socks5),
            _ => Err(Error::InvalidProxyType(s.to_string())),
        }
    }
}

/// How much a proxy reveals about the requester
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Anonymity {
    /// No leakage and no proxy headers
    Elite,
    /// Declares proxy use without revealing the origin
    Anonymous,
    /// Leaks the origin IP
    Transparent,
    #[default]
    Unknown,
}

impl Anonymity {
    pub const ALL: [Anonymity; 4] = [
        Anonymity::Elite,
        Anonymity::Anonymous,
        Anonymity::Transparent,
        Anonymity::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Anonymity::Elite => "elite",
            Anonymity::Anonymous => "anonymous",
            Anonymity::Transparent => "transparent",
            Anonymity::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Anonymity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Anonymity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "elite" => Ok(Anonymity::Elite),
            "anonymous" => Ok(Anonymity::Anonymous),
            "transparent" => Ok(Anonymity::Transparent),
            "unknown" => Ok(Anonymity::Unknown),
            _ => Err(Error::InvalidAnonymity(s.to_string())),
        }
    }
}

/// Proxy authentication credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

impl ProxyAuth {
    pub fn new(username: String, password: String) -> Self {
        Self { username, password }
    }
}

/// An unvalidated proxy endpoint found in source text
///
/// Identity is `host:port`; the declared protocol and credentials ride along
/// but never distinguish two candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub host: String,
    pub port: u16,
    pub declared: Option<ProxyType>,
    pub auth: Option<ProxyAuth>,
}

/// Parse a dotted quad, tolerating leading zeros in an octet
pub(crate) fn parse_ipv4(text: &str) -> Option<Ipv4Addr> {
    let mut octets = [0u8; 4];
    let mut parts = text.split('.');
    for octet in octets.iter_mut() {
        let part = parts.next()?;
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *octet = part.parse::<u32>().ok().and_then(|n| u8::try_from(n).ok())?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(Ipv4Addr::from(octets))
}

impl Candidate {
    /// Create a candidate without a protocol hint.
    ///
    /// IPv4 hosts are stored in canonical form, so `010.0.0.1` becomes `10.0.0.1`.
    pub fn new(host: String, port: u16) -> Self {
        let host = parse_ipv4(&host).map_or(host, |ip| ip.to_string());
        Self {
            host,
            port,
            declared: None,
            auth: None,
        }
    }

    /// Create a candidate with a declared protocol
    pub fn with_protocol(host: String, port: u16, protocol: ProxyType) -> Self {
        Self {
            declared: Some(protocol),
            ..Self::new(host, port)
        }
    }

    pub fn with_auth(mut self, username: String, password: String) -> Self {
        self.auth = Some(ProxyAuth::new(username, password));
        self
    }

    /// The `host:port` identity
    pub fn identity(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Proxy URL to hand to the HTTP client when probing `protocol`.
    ///
    /// HTTP and HTTPS probes both talk to a plain HTTP proxy; HTTPS differs
    /// only in tunnelling through CONNECT.
    pub fn proxy_url(&self, protocol: ProxyType) -> String {
        let scheme = match protocol {
            ProxyType::Http | ProxyType::Https => "http",
            ProxyType::Socks4 => "socks4",
            ProxyType::Socks5 => "socks5",
        };
        let auth_part = self.auth.as_ref().map_or(String::new(), |auth| {
            format!("{}:{}@", auth.username, auth.password)
        });

        format!("{}://{}{}:{}", scheme, auth_part, self.host, self.port)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.declared {
            Some(protocol) => write!(f, "{}://{}:{}", protocol, self.host, self.port),
            None => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

/// Insertion-ordered candidates, unique by `host:port`
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    items: Vec<Candidate>,
    seen: HashSet<String>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the identity is already present. First seen wins.
    pub fn insert(&mut self, candidate: Candidate) -> bool {
        if self.seen.insert(candidate.identity()) {
            self.items.push(candidate);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.seen.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candidate> {
        self.items.iter()
    }

    pub fn truncate(&mut self, len: usize) {
        for dropped in self.items.drain(len.min(self.items.len())..) {
            self.seen.remove(&dropped.identity());
        }
    }

    pub fn as_slice(&self) -> &[Candidate] {
        &self.items
    }
}

impl Extend<Candidate> for CandidateSet {
    fn extend<I: IntoIterator<Item = Candidate>>(&mut self, iter: I) {
        for candidate in iter {
            self.insert(candidate);
        }
    }
}

impl FromIterator<Candidate> for CandidateSet {
    fn from_iter<I: IntoIterator<Item = Candidate>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl IntoIterator for CandidateSet {
    type Item = Candidate;
    type IntoIter = std::vec::IntoIter<Candidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a CandidateSet {
    type Item = &'a Candidate;
    type IntoIter = std::slice::Iter<'a, Candidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Outcome of validating one candidate
///
/// A result is working exactly when at least one protocol was confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub proxy: String,
    pub protocols: BTreeSet<ProxyType>,
    pub anonymity: Anonymity,
    pub response_time: Option<Duration>,
    pub country: Option<String>,
}

impl ValidationResult {
    pub fn working(
        proxy: String,
        protocols: BTreeSet<ProxyType>,
        anonymity: Anonymity,
        response_time: Duration,
    ) -> Self {
        Self {
            proxy,
            protocols,
            anonymity,
            response_time: Some(response_time),
            country: None,
        }
    }

    pub fn failed(proxy: String) -> Self {
        Self {
            proxy,
            protocols: BTreeSet::new(),
            anonymity: Anonymity::Unknown,
            response_time: None,
            country: None,
        }
    }

    pub fn with_country(mut self, country: Option<String>) -> Self {
        self.country = country;
        self
    }

    pub fn is_working(&self) -> bool {
        !self.protocols.is_empty()
    }

    pub fn response_time_ms(&self) -> Option<u64> {
        self.response_time.map(|t| t.as_millis() as u64)
    }

    /// Comma separated protocol list, e.g. `http,https`
    pub fn protocol_list(&self) -> String {
        self.protocols
            .iter()
            .map(ProxyType::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Categories this result belongs to
    pub fn categories(&self) -> Vec<Category> {
        if !self.is_working() {
            return Vec::new();
        }
        let mut categories = vec![Category::AllWorking];
        categories.extend(self.protocols.iter().copied().map(Category::Protocol));
        categories.push(Category::Anonymity(self.anonymity));
        categories
    }
}

/// Result bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    AllWorking,
    Protocol(ProxyType),
    Anonymity(Anonymity),
}

impl Category {
    /// Every bucket, in display order
    pub fn all() -> Vec<Category> {
        let mut all = vec![Category::AllWorking];
        all.extend(ProxyType::ALL.into_iter().map(Category::Protocol));
        all.extend(Anonymity::ALL.into_iter().map(Category::Anonymity));
        all
    }

    /// Stable name, used for file names and logs
    pub fn name(&self) -> &'static str {
        match self {
            Category::AllWorking => "all_working",
            Category::Protocol(p) => p.as_str(),
            Category::Anonymity(a) => a.as_str(),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Working results bucketed by category
#[derive(Debug, Clone, PartialEq)]
pub struct CategorizedResults {
    buckets: BTreeMap<Category, Vec<ValidationResult>>,
}

impl Default for CategorizedResults {
    fn default() -> Self {
        Self::new()
    }
}

impl CategorizedResults {
    /// All buckets present and empty
    pub fn new() -> Self {
        Self {
            buckets: Category::all().into_iter().map(|c| (c, Vec::new())).collect(),
        }
    }

    /// Bucket a result. Non-working results are ignored.
    pub fn insert(&mut self, result: ValidationResult) {
        for category in result.categories() {
            self.buckets
                .entry(category)
                .or_default()
                .push(result.clone());
        }
    }

    /// Order every bucket fastest first, ties by identity
    pub fn sort(&mut self) {
        for bucket in self.buckets.values_mut() {
            bucket.sort_by(|a, b| {
                let ta = a.response_time.unwrap_or(Duration::MAX);
                let tb = b.response_time.unwrap_or(Duration::MAX);
                ta.cmp(&tb).then_with(|| a.proxy.cmp(&b.proxy))
            });
        }
    }

    pub fn get(&self, category: Category) -> &[ValidationResult] {
        self.buckets
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn count(&self, category: Category) -> usize {
        self.get(category).len()
    }

    pub fn working(&self) -> &[ValidationResult] {
        self.get(Category::AllWorking)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, &[ValidationResult])> {
        self.buckets.iter().map(|(c, v)| (*c, v.as_slice()))
    }

    /// Mean response time over working results
    pub fn average_response_time(&self) -> Option<Duration> {
        let times: Vec<Duration> = self
            .working()
            .iter()
            .filter_map(|r| r.response_time)
            .collect();
        if times.is_empty() {
            return None;
        }
        Some(times.iter().sum::<Duration>() / times.len() as u32)
    }
}
