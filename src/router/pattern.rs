//! Path patterns shared by routing and the authorization policy
//!
//! Segment based: `**` spans zero or more segments, `*` and `?` glob within a
//! single segment, `{name}` matches any one segment. Empty segments are
//! ignored, so `/a//b/` and `/a/b` are the same path.

use super::RouterError;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Glob(String),
    AnySegment,
    AnyPath,
}

impl Segment {
    fn parse(raw: &str) -> Self {
        if raw == "**" {
            Segment::AnyPath
        } else if raw.starts_with('{') && raw.ends_with('}') {
            Segment::AnySegment
        } else if raw.contains(|c: char| c == '*' || c == '?') {
            Segment::Glob(raw.to_string())
        } else {
            Segment::Literal(raw.to_string())
        }
    }

    fn matches(&self, segment: &str) -> bool {
        match self {
            Segment::Literal(lit) => lit == segment,
            Segment::Glob(glob) => glob_match(glob.as_bytes(), segment.as_bytes()),
            Segment::AnySegment | Segment::AnyPath => true,
        }
    }
}

/// `*` = any run of bytes, `?` = exactly one byte
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|i| glob_match(rest, &text[i..])),
        Some((b'?', rest)) => !text.is_empty() && glob_match(rest, &text[1..]),
        Some((c, rest)) => text.first() == Some(c) && glob_match(rest, &text[1..]),
    }
}

fn match_segments(pattern: &[Segment], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((Segment::AnyPath, rest)) => {
            (0..=path.len()).any(|skip| match_segments(rest, &path[skip..]))
        }
        Some((segment, rest)) => match path.split_first() {
            Some((head, tail)) => segment.matches(head) && match_segments(rest, tail),
            None => false,
        },
    }
}

/// Split a request path into its non-empty segments
pub(crate) fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Compiled path pattern such as `/api/review/reply/**`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, RouterError> {
        if !raw.starts_with('/') {
            return Err(RouterError::InvalidPattern(format!(
                "'{}' must start with '/'",
                raw
            )));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments: segments(raw).into_iter().map(Segment::parse).collect(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, path: &str) -> bool {
        match_segments(&self.segments, &segments(path))
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parse a list of patterns, failing on the first invalid one
pub fn parse_all<S: AsRef<str>>(raw: &[S]) -> Result<Vec<PathPattern>, RouterError> {
    raw.iter().map(|p| PathPattern::parse(p.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, path: &str) -> bool {
        PathPattern::parse(pattern).unwrap().matches(path)
    }

    #[test]
    fn test_literal() {
        assert!(matches("/api/review/submit", "/api/review/submit"));
        assert!(matches("/api/review/submit", "/api/review/submit/"));
        assert!(!matches("/api/review/submit", "/api/review/submitted"));
        assert!(!matches("/api/review/submit", "/api/review"));
    }

    #[test]
    fn test_double_wildcard() {
        assert!(matches("/uploads/**", "/uploads"));
        assert!(matches("/uploads/**", "/uploads/a.png"));
        assert!(matches("/uploads/**", "/uploads/a/b/c.png"));
        assert!(!matches("/uploads/**", "/uploads2/a.png"));
        assert!(matches("/**", "/anything/at/all"));
        assert!(matches("/**", "/"));
    }

    #[test]
    fn test_double_wildcard_in_middle() {
        assert!(matches("/a/**/z", "/a/z"));
        assert!(matches("/a/**/z", "/a/b/c/z"));
        assert!(!matches("/a/**/z", "/a/b/c"));
    }

    #[test]
    fn test_single_segment_glob() {
        assert!(matches("/assets/*.js", "/assets/app.js"));
        assert!(!matches("/assets/*.js", "/assets/app.css"));
        assert!(!matches("/assets/*", "/assets/a/b"));
        assert!(matches("/v?/users", "/v1/users"));
    }

    #[test]
    fn test_variable_segment() {
        assert!(matches("/users/{id}/reviews", "/users/42/reviews"));
        assert!(!matches("/users/{id}/reviews", "/users/reviews"));
    }

    #[test]
    fn test_root() {
        assert!(matches("/", "/"));
        assert!(matches("/", ""));
        assert!(!matches("/", "/index.html"));
    }

    #[test]
    fn test_relative_pattern_rejected() {
        assert!(matches!(
            PathPattern::parse("api/**"),
            Err(RouterError::InvalidPattern(_))
        ));
    }
}
