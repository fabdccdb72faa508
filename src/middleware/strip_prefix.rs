//! Strip a site's path prefix before the backend sees the request.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::uri::{PathAndQuery, Uri};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;

use crate::routing::router::not_found;

/// Wrap `next` so requests have `prefix` removed from their path.
///
/// A prefix of `/` (or empty) leaves the router unchanged.
pub fn layer(prefix: &str, next: Router) -> Router {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return next;
    }
    next.layer(middleware::from_fn_with_state(Arc::<str>::from(prefix), strip))
}

async fn strip(State(prefix): State<Arc<str>>, mut req: Request, next: Next) -> Response {
    let Some(uri) = stripped_uri(req.uri(), &prefix) else {
        return not_found();
    };
    *req.uri_mut() = uri;
    next.run(req).await
}

fn stripped_uri(uri: &Uri, prefix: &str) -> Option<Uri> {
    let rest = uri.path().strip_prefix(prefix)?;
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    let path = if rest.is_empty() { "/" } else { rest };
    let path_and_query: PathAndQuery = match uri.query() {
        Some(query) => format!("{path}?{query}").parse().ok()?,
        None => path.parse().ok()?,
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(path_and_query);
    Uri::from_parts(parts).ok()
}
