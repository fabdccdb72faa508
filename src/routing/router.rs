//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store compiled patterns and their handlers
//! - Look up the handler for a request
//! - Answer unclean-path and trailing-slash redirects and explicit not-found
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) pattern scan (acceptable for typical site counts)
//! - Entries kept longest-path-first so the first hit is the best one

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::extract::Request;
use axum::http::header::LOCATION;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tower::ServiceExt;

use super::matcher::{clean_path, normalize_host, request_host, Pattern};
use super::RoutingError;

/// Routing table of one listener, published for lock-free swaps.
pub type SharedTable = Arc<ArcSwap<RoutingTable>>;

#[derive(Debug, Clone)]
struct Entry {
    pattern: Pattern,
    handler: Router,
}

/// Result of a table lookup.
#[derive(Debug)]
pub enum Lookup<'a> {
    Handler(&'a Router),
    /// Permanent redirect to the given path.
    Redirect(String),
    NotFound,
}

/// Maps host/path patterns to handlers.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    entries: Vec<Entry>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `pattern`.
    pub fn insert(&mut self, pattern: &str, handler: Router) -> Result<(), RoutingError> {
        let pattern = Pattern::parse(pattern)?;
        if self.entries.iter().any(|e| e.pattern == pattern) {
            return Err(RoutingError::DuplicatePattern(pattern.to_string()));
        }
        let at = self
            .entries
            .iter()
            .position(|e| e.pattern.path().len() < pattern.path().len())
            .unwrap_or(self.entries.len());
        self.entries.insert(at, Entry { pattern, handler });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &Pattern> {
        self.entries.iter().map(|e| &e.pattern)
    }

    /// Publish this table behind an [`ArcSwap`].
    pub fn into_shared(self) -> SharedTable {
        Arc::new(ArcSwap::from_pointee(self))
    }

    /// Find the handler for `host` (already normalized) and `path`.
    pub fn lookup<'a>(&'a self, host: Option<&str>, path: &str) -> Lookup<'a> {
        if !path.ends_with('/') && !self.has_exact(host, path) {
            let with_slash = format!("{path}/");
            if self.has_exact(host, &with_slash) {
                return Lookup::Redirect(with_slash);
            }
        }
        match self.find(host, path) {
            Some(entry) => Lookup::Handler(&entry.handler),
            None => Lookup::NotFound,
        }
    }

    fn find(&self, host: Option<&str>, path: &str) -> Option<&Entry> {
        let host_specific = host.and_then(|host| {
            self.entries
                .iter()
                .find(|e| e.pattern.host() == Some(host) && e.pattern.matches_path(path))
        });
        host_specific.or_else(|| {
            self.entries
                .iter()
                .find(|e| e.pattern.host().is_none() && e.pattern.matches_path(path))
        })
    }

    fn has_exact(&self, host: Option<&str>, path: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.pattern.path() == path && e.pattern.matches_host(host))
    }

    /// Serve a request with the handler its host and path select.
    ///
    /// A path with `.`, `..` or empty segments is first redirected to its
    /// cleaned form. CONNECT targets are left alone.
    pub async fn serve(&self, req: Request) -> Response {
        if req.method() != Method::CONNECT {
            let cleaned = clean_path(req.uri().path());
            if cleaned != req.uri().path() {
                return moved_permanently(cleaned, req.uri().query());
            }
        }
        let host = request_host(&req).map(normalize_host);
        match self.lookup(host.as_deref(), req.uri().path()) {
            Lookup::Handler(handler) => handler
                .clone()
                .oneshot(req)
                .await
                .unwrap_or_else(|never| match never {}),
            Lookup::Redirect(path) => moved_permanently(path, req.uri().query()),
            Lookup::NotFound => not_found(),
        }
    }
}

fn moved_permanently(path: String, query: Option<&str>) -> Response {
    let location = match query {
        Some(query) => format!("{path}?{query}"),
        None => path,
    };
    (StatusCode::MOVED_PERMANENTLY, [(LOCATION, location)]).into_response()
}

/// Plain-text 404.
pub fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "404 page not found\n").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};

    fn text(body: &'static str) -> Router {
        Router::new().fallback(move || async move { body })
    }

    fn table(patterns: &[(&str, &'static str)]) -> RoutingTable {
        let mut table = RoutingTable::new();
        for (pattern, body) in patterns {
            table.insert(pattern, text(body)).unwrap();
        }
        table
    }

    async fn get(table: &RoutingTable, host: &str, uri: &str) -> (StatusCode, String, Option<String>) {
        let req = Request::builder()
            .uri(uri)
            .header("Host", host)
            .body(Body::empty())
            .unwrap();
        let res = table.serve(req).await;
        let status = res.status();
        let location = res
            .headers()
            .get(LOCATION)
            .map(|v| v.to_str().unwrap().to_owned());
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap(), location)
    }

    #[tokio::test]
    async fn test_longest_match_wins() {
        let table = table(&[("/", "root"), ("/static/", "static"), ("/static/img/", "img")]);
        assert_eq!(get(&table, "a.test", "/").await.1, "root");
        assert_eq!(get(&table, "a.test", "/other").await.1, "root");
        assert_eq!(get(&table, "a.test", "/static/x.css").await.1, "static");
        assert_eq!(get(&table, "a.test", "/static/img/x.png").await.1, "img");
    }

    #[tokio::test]
    async fn test_host_patterns_take_precedence() {
        let table = table(&[("/", "any"), ("example.org/", "example"), ("/long/path/", "long")]);
        assert_eq!(get(&table, "example.org", "/").await.1, "example");
        assert_eq!(get(&table, "EXAMPLE.org:8080", "/x").await.1, "example");
        // Host-specific beats a longer host-less pattern.
        assert_eq!(get(&table, "example.org", "/long/path/x").await.1, "example");
        assert_eq!(get(&table, "other.org", "/long/path/x").await.1, "long");
    }

    #[tokio::test]
    async fn test_trailing_slash_redirect() {
        let table = table(&[("/docs/", "docs")]);
        let (status, _, location) = get(&table, "a.test", "/docs?page=2").await;
        assert_eq!(status, StatusCode::MOVED_PERMANENTLY);
        assert_eq!(location.as_deref(), Some("/docs/?page=2"));

        let table = table_with_exact();
        assert_eq!(get(&table, "a.test", "/docs").await.1, "exact");
    }

    #[tokio::test]
    async fn test_unclean_path_redirect() {
        let table = table(&[("/", "root"), ("/b/", "b")]);
        let (status, _, location) = get(&table, "a.test", "/a/../b/?x=1").await;
        assert_eq!(status, StatusCode::MOVED_PERMANENTLY);
        assert_eq!(location.as_deref(), Some("/b/?x=1"));

        let (_, _, location) = get(&table, "a.test", "//b/./c").await;
        assert_eq!(location.as_deref(), Some("/b/c"));

        let (status, body, _) = get(&table, "a.test", "/b/c").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "b");
    }

    fn table_with_exact() -> RoutingTable {
        table(&[("/docs/", "docs"), ("/docs", "exact")])
    }

    #[tokio::test]
    async fn test_not_found() {
        let table = table(&[("/api/", "api")]);
        let (status, body, _) = get(&table, "a.test", "/").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "404 page not found\n");

        let (status, _, _) = get(&RoutingTable::new(), "a.test", "/").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_duplicate_pattern_rejected() {
        let mut table = RoutingTable::new();
        table.insert("example.org/", text("a")).unwrap();
        assert_eq!(
            table.insert("Example.org/", text("b")),
            Err(RoutingError::DuplicatePattern("example.org/".into()))
        );
        table.insert("/", text("c")).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_swap_is_atomic_per_request() {
        let shared = table(&[("/", "old")]).into_shared();
        let snapshot = shared.load_full();
        shared.store(Arc::new(table(&[("/", "new")])));

        assert_eq!(get(&snapshot, "a.test", "/").await.1, "old");
        assert_eq!(get(&shared.load(), "a.test", "/").await.1, "new");
    }
}
