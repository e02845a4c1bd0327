//! Route lookup.
//!
//! # Responsibilities
//! - Compile route configs into rules
//! - Find the rule for a request
//! - Apply a rule's header rewrites to the forwarded request
//!
//! # Design Decisions
//! - Immutable after construction; reload builds a new router and swaps it
//! - Longest path prefix wins among rules whose predicates pass
//! - Ties go to the rule registered first
//! - Explicit no-match rather than a silent default

use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::config::validation::ValidationError;
use crate::config::RouteConfig;
use crate::routing::matcher::{AndMatcher, HeaderMatcher, HostMatcher, Matcher, PathPrefixMatcher};

/// Header edits applied to the forwarded request.
#[derive(Debug, Clone, Default)]
pub struct HeaderRewrites {
    set: Vec<(HeaderName, HeaderValue)>,
    remove: Vec<HeaderName>,
}

impl HeaderRewrites {
    /// Removals run first, so a header both removed and set ends up set.
    pub fn apply(&self, headers: &mut HeaderMap) {
        for name in &self.remove {
            headers.remove(name);
        }
        for (name, value) in &self.set {
            headers.insert(name.clone(), value.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty()
    }
}

/// A compiled route.
#[derive(Debug)]
pub struct RouteRule {
    pub name: String,
    pub upstream_group: String,
    pub rewrites: HeaderRewrites,
    pub timeout: Duration,
    prefix: PathPrefixMatcher,
    predicates: AndMatcher,
}

impl RouteRule {
    pub fn from_config(config: &RouteConfig, default_timeout: Duration) -> Result<Self, ValidationError> {
        let invalid = |header: &str| ValidationError::InvalidHeader {
            route: config.name.clone(),
            header: header.to_string(),
        };
        let header_name = |name: &str| HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid(name));
        let header_value = |value: &str| HeaderValue::from_str(value).map_err(|_| invalid(value));

        let mut predicates = AndMatcher::default();
        if let Some(host) = &config.host {
            predicates.push(Box::new(HostMatcher::new(host.clone())));
        }
        for header in &config.headers {
            let name = header_name(&header.name)?;
            let matcher = match &header.value {
                Some(value) => HeaderMatcher::equals(name, header_value(value)?),
                None => HeaderMatcher::present(name),
            };
            predicates.push(Box::new(matcher));
        }

        let mut rewrites = HeaderRewrites::default();
        for name in &config.remove_headers {
            rewrites.remove.push(header_name(name)?);
        }
        for (name, value) in &config.set_headers {
            rewrites.set.push((header_name(name)?, header_value(value)?));
        }

        Ok(Self {
            name: config.name.clone(),
            upstream_group: config.upstream_group.clone(),
            rewrites,
            timeout: config
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(default_timeout),
            prefix: PathPrefixMatcher::new(config.path_prefix.clone()),
            predicates,
        })
    }

    pub fn prefix_len(&self) -> usize {
        self.prefix.len()
    }
}

impl Matcher for RouteRule {
    fn matches(&self, path: &str, headers: &HeaderMap) -> bool {
        self.prefix.matches(path, headers) && self.predicates.matches(path, headers)
    }
}

/// The route table.
#[derive(Debug, Default)]
pub struct Router {
    rules: Vec<RouteRule>,
}

impl Router {
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self { rules }
    }

    pub fn from_config(routes: &[RouteConfig], default_timeout: Duration) -> Result<Self, ValidationError> {
        let rules = routes
            .iter()
            .map(|r| RouteRule::from_config(r, default_timeout))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(routes = rules.len(), "Route table compiled");
        Ok(Self { rules })
    }

    /// Find the matching rule with the longest path prefix.
    pub fn match_request(&self, path: &str, headers: &HeaderMap) -> Option<&RouteRule> {
        let mut best: Option<&RouteRule> = None;
        for rule in &self.rules {
            if !rule.matches(path, headers) {
                continue;
            }
            // strictly longer, so earlier rules keep ties
            if best.map_or(true, |b| rule.prefix_len() > b.prefix_len()) {
                best = Some(rule);
            }
        }
        best
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeaderMatchConfig;
    use std::collections::BTreeMap;

    fn route(name: &str, prefix: &str, group: &str) -> RouteConfig {
        RouteConfig {
            name: name.into(),
            path_prefix: prefix.into(),
            host: None,
            headers: Vec::new(),
            upstream_group: group.into(),
            set_headers: BTreeMap::new(),
            remove_headers: Vec::new(),
            timeout_ms: None,
        }
    }

    fn router(routes: &[RouteConfig]) -> Router {
        Router::from_config(routes, Duration::from_secs(30)).unwrap()
    }

    #[test]
    fn longest_prefix_wins() {
        let router = router(&[route("root", "/", "web"), route("api", "/api", "api"), route("v2", "/api/v2", "v2")]);
        let headers = HeaderMap::new();

        assert_eq!(router.match_request("/api/v2/users", &headers).unwrap().name, "v2");
        assert_eq!(router.match_request("/api/v1/users", &headers).unwrap().name, "api");
        assert_eq!(router.match_request("/index.html", &headers).unwrap().name, "root");
    }

    #[test]
    fn ties_go_to_first_registered() {
        let mut canary = route("canary", "/api", "canary");
        canary.headers.push(HeaderMatchConfig {
            name: "x-canary".into(),
            value: None,
        });
        let router = router(&[canary, route("first", "/api", "a"), route("second", "/api", "b")]);

        assert_eq!(router.match_request("/api", &HeaderMap::new()).unwrap().name, "first");

        let mut headers = HeaderMap::new();
        headers.insert("x-canary", HeaderValue::from_static("1"));
        assert_eq!(router.match_request("/api", &headers).unwrap().name, "canary");
    }

    #[test]
    fn host_predicate_filters() {
        let mut admin = route("admin", "/", "admin");
        admin.host = Some("admin.example.com".into());
        let router = router(&[admin]);

        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("Admin.Example.com:443"));
        assert!(router.match_request("/", &headers).is_some());

        headers.insert("host", HeaderValue::from_static("www.example.com"));
        assert!(router.match_request("/", &headers).is_none());
    }

    #[test]
    fn no_match_is_explicit() {
        let router = router(&[route("api", "/api", "api")]);
        assert!(router.match_request("/other", &HeaderMap::new()).is_none());
        assert!(Router::default().match_request("/", &HeaderMap::new()).is_none());
    }

    #[test]
    fn rewrites_remove_then_set() {
        let mut config = route("api", "/api", "api");
        config.remove_headers = vec!["x-debug".into(), "x-env".into()];
        config.set_headers.insert("x-env".into(), "prod".into());
        let rule = RouteRule::from_config(&config, Duration::from_secs(30)).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("x-debug", HeaderValue::from_static("1"));
        headers.insert("x-env", HeaderValue::from_static("dev"));
        rule.rewrites.apply(&mut headers);

        assert!(!headers.contains_key("x-debug"));
        assert_eq!(headers["x-env"], "prod");
    }

    #[test]
    fn route_timeout_overrides_default() {
        let mut config = route("slow", "/", "web");
        assert_eq!(
            RouteRule::from_config(&config, Duration::from_secs(30)).unwrap().timeout,
            Duration::from_secs(30)
        );
        config.timeout_ms = Some(250);
        assert_eq!(
            RouteRule::from_config(&config, Duration::from_secs(30)).unwrap().timeout,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn invalid_header_is_rejected() {
        let mut config = route("bad", "/", "web");
        config.set_headers.insert("bad header".into(), "v".into());
        assert!(matches!(
            RouteRule::from_config(&config, Duration::from_secs(1)),
            Err(ValidationError::InvalidHeader { .. })
        ));
    }
}
