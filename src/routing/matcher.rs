//! Route matching logic.
//!
//! # Responsibilities
//! - Match host header (case-insensitive, port ignored)
//! - Match path prefix (case-sensitive)
//! - Match header predicates (presence or exact value)
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - Matchers see only the path and headers, never the body
//! - Empty condition = always matches (wildcard)
//! - No regex to guarantee O(n) matching

use axum::http::{HeaderMap, HeaderName, HeaderValue};

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, path: &str, headers: &HeaderMap) -> bool;
}

/// Matches the Host header.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    expected_host: String,
}

impl HostMatcher {
    /// The host is normalized to lowercase, without a port.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            expected_host: strip_port(&host.into()).to_lowercase(),
        }
    }
}

fn strip_port(host: &str) -> &str {
    // bracketed IPv6 literal, e.g. [::1]:8080
    if let Some(end) = host.find(']') {
        return &host[..=end];
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

impl Matcher for HostMatcher {
    fn matches(&self, _path: &str, headers: &HeaderMap) -> bool {
        headers
            .get(axum::http::header::HOST)
            .and_then(|h| h.to_str().ok())
            .map(|h| strip_port(h).eq_ignore_ascii_case(&self.expected_host))
            .unwrap_or(false)
    }
}

/// Matches a request header, by presence or by exact value.
#[derive(Debug, Clone)]
pub struct HeaderMatcher {
    name: HeaderName,
    value: Option<HeaderValue>,
}

impl HeaderMatcher {
    pub fn present(name: HeaderName) -> Self {
        Self { name, value: None }
    }

    pub fn equals(name: HeaderName, value: HeaderValue) -> Self {
        Self {
            name,
            value: Some(value),
        }
    }
}

impl Matcher for HeaderMatcher {
    fn matches(&self, _path: &str, headers: &HeaderMap) -> bool {
        match &self.value {
            None => headers.contains_key(&self.name),
            Some(expected) => headers.get_all(&self.name).iter().any(|v| v == expected),
        }
    }
}

/// Matches the request path prefix.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.prefix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefix.is_empty()
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches(&self, path: &str, _headers: &HeaderMap) -> bool {
        path.starts_with(&self.prefix)
    }
}

/// Combines multiple matchers with AND semantics.
#[derive(Debug, Default)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }

    pub fn push(&mut self, matcher: Box<dyn Matcher>) {
        self.matchers.push(matcher);
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, path: &str, headers: &HeaderMap) -> bool {
        self.matchers.iter().all(|m| m.matches(path, headers))
    }
}
