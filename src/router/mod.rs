//! Route table
//!
//! Maps request paths to upstream services. The first route whose patterns
//! match wins; its `strip_prefix` leading segments are removed and its extra
//! headers added before the request is forwarded.

use crate::config::RouteConfig;
use hyper::header::{HeaderName, HeaderValue};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use thiserror::Error;

pub mod pattern;

pub use pattern::PathPattern;

/// Characters escaped when a decoded segment is written back into a URL
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}')
    .add(b'[')
    .add(b']');

/// Router errors
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Invalid path pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid header for route '{route}': {reason}")]
    InvalidHeader { route: String, reason: String },

    #[error("Invalid upstream uri for route '{route}': {uri}")]
    InvalidUri { route: String, uri: String },

    #[error("Invalid request path: {0}")]
    InvalidPath(String),
}

/// Percent-decode a request path into the form routing and policy see.
///
/// Empty segments collapse and a trailing slash is kept. Dot segments and
/// segments that decode to a separator or NUL are rejected, so the path
/// matched here is the path the upstream receives.
pub fn canonical_path(raw: &str) -> Result<String, RouterError> {
    let mut canonical = String::with_capacity(raw.len());

    for segment in pattern::segments(raw) {
        let decoded = percent_decode_str(segment)
            .decode_utf8()
            .map_err(|_| RouterError::InvalidPath(raw.to_string()))?;

        let separator = decoded.contains(|c: char| matches!(c, '/' | '\\' | '\0'));
        if separator || decoded == "." || decoded == ".." {
            return Err(RouterError::InvalidPath(raw.to_string()));
        }

        canonical.push('/');
        canonical.push_str(&decoded);
    }

    if canonical.is_empty() || raw.ends_with('/') {
        canonical.push('/');
    }
    Ok(canonical)
}

/// A single upstream route
#[derive(Debug, Clone)]
pub struct Route {
    id: String,
    patterns: Vec<PathPattern>,
    strip_prefix: usize,
    uri: String,
    add_request_headers: Vec<(HeaderName, HeaderValue)>,
}

impl Route {
    pub fn from_config(config: &RouteConfig) -> Result<Self, RouterError> {
        if !(config.uri.starts_with("http://") || config.uri.starts_with("https://")) {
            return Err(RouterError::InvalidUri {
                route: config.id.clone(),
                uri: config.uri.clone(),
            });
        }

        let add_request_headers = config
            .add_request_headers
            .iter()
            .map(|(name, value)| {
                let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                    RouterError::InvalidHeader {
                        route: config.id.clone(),
                        reason: format!("{}: {}", name, e),
                    }
                })?;
                let value = HeaderValue::from_str(value).map_err(|e| RouterError::InvalidHeader {
                    route: config.id.clone(),
                    reason: format!("{}: {}", name, e),
                })?;
                Ok((name, value))
            })
            .collect::<Result<Vec<_>, RouterError>>()?;

        Ok(Self {
            id: config.id.clone(),
            patterns: pattern::parse_all(&config.paths)?,
            strip_prefix: config.strip_prefix,
            uri: config.uri.trim_end_matches('/').to_string(),
            add_request_headers,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(path))
    }

    pub fn add_request_headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.add_request_headers
    }

    /// Drop the first `strip_prefix` segments; `/api/review/x` → `/review/x`
    pub fn rewrite_path(&self, path: &str) -> String {
        if self.strip_prefix == 0 {
            return if path.is_empty() { "/".into() } else { path.into() };
        }

        let rest: Vec<&str> = pattern::segments(path)
            .into_iter()
            .skip(self.strip_prefix)
            .collect();
        let mut rewritten = format!("/{}", rest.join("/"));
        if path.ends_with('/') && !rest.is_empty() {
            rewritten.push('/');
        }
        rewritten
    }

    /// Upstream URL for a request to the canonical `path` with optional `query`
    pub fn target_url(&self, path: &str, query: Option<&str>) -> String {
        let rewritten = self.rewrite_path(path);
        let encoded: Vec<String> = rewritten
            .split('/')
            .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
            .collect();

        let mut url = format!("{}{}", self.uri, encoded.join("/"));
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        url
    }
}

/// Ordered set of routes
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    pub fn from_config(routes: &[RouteConfig]) -> Result<Self, RouterError> {
        routes
            .iter()
            .map(Route::from_config)
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }

    /// First route matching `path`
    pub fn resolve(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|route| route.matches(path))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
