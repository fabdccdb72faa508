//! Route pattern matching.
//!
//! # Responsibilities
//! - Parse `host/path` and `/path` patterns
//! - Match a request path exactly or as a subtree
//! - Extract the request host used for lookup
//!
//! # Design Decisions
//! - Host matching is case-insensitive and ignores the port
//! - Path matching is case-sensitive
//! - A pattern ending in `/` matches its whole subtree, any other pattern
//!   matches exactly one path
//! - No regex to guarantee O(n) matching

use axum::http::header::HOST;
use axum::http::{HeaderMap, Request, Uri};

use super::RoutingError;

/// A compiled routing pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pattern {
    host: Option<String>,
    path: String,
}

impl Pattern {
    /// Parse `"example.org/static/"` or `"/static/"`.
    pub fn parse(raw: &str) -> Result<Self, RoutingError> {
        let Some(slash) = raw.find('/') else {
            return Err(RoutingError::InvalidPattern(raw.to_owned()));
        };
        let (host, path) = raw.split_at(slash);
        Ok(Self {
            host: (!host.is_empty()).then(|| host.to_lowercase()),
            path: path.to_owned(),
        })
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the pattern covers every path below it.
    pub fn is_subtree(&self) -> bool {
        self.path.ends_with('/')
    }

    pub fn matches_path(&self, path: &str) -> bool {
        if self.is_subtree() {
            path.starts_with(&self.path)
        } else {
            path == self.path
        }
    }

    /// Host-less patterns match any host.
    pub fn matches_host(&self, host: Option<&str>) -> bool {
        match (&self.host, host) {
            (None, _) => true,
            (Some(expected), Some(host)) => expected == host,
            (Some(_), None) => false,
        }
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.host.as_deref().unwrap_or(""), self.path)
    }
}

/// Raw host the request was addressed to: URI authority first, then the
/// `Host` header.
pub fn request_host<B>(req: &Request<B>) -> Option<&str> {
    host_of(req.uri(), req.headers())
}

/// [`request_host`] for a request already split into parts.
pub fn host_of<'a>(uri: &'a Uri, headers: &'a HeaderMap) -> Option<&'a str> {
    uri.authority()
        .map(|authority| authority.as_str())
        .or_else(|| headers.get(HOST).and_then(|h| h.to_str().ok()))
        .filter(|host| !host.is_empty())
}

/// Lookup form of a host: port removed, brackets dropped, lowercased.
pub fn normalize_host(host: &str) -> String {
    strip_port(host).to_lowercase()
}

/// Remove a trailing `:port` from a host.
pub fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

/// Lexically resolve `.`, `..` and repeated slashes, rooted at `/`.
/// A trailing slash is kept.
pub fn clean_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }
    let mut cleaned = format!("/{}", segments.join("/"));
    if path.ends_with('/') && cleaned.len() > 1 {
        cleaned.push('/');
    }
    cleaned
}
