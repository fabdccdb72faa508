//! Redirect plaintext requests to https.
//!
//! Applies to every site not marked `http+insecure`. A connection counts as
//! secure when the upstream proxy reported a client TLS session.

use axum::extract::{OriginalUri, Request};
use axum::http::header::LOCATION;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;

use crate::net::connection::connection_info;
use crate::routing::matcher::request_host;

pub fn layer(next: Router) -> Router {
    next.layer(middleware::from_fn(redirect_insecure))
}

async fn redirect_insecure(req: Request, next: Next) -> Response {
    if connection_info(req.extensions()).is_some_and(|info| info.is_tls()) {
        return next.run(req).await;
    }
    let uri = req
        .extensions()
        .get::<OriginalUri>()
        .map(|OriginalUri(uri)| uri)
        .unwrap_or(req.uri());
    let target = uri.path_and_query().map_or("/", |pq| pq.as_str());
    let host = request_host(&req).unwrap_or_default();
    let location = format!("https://{host}{target}");
    (StatusCode::MOVED_PERMANENTLY, [(LOCATION, location)]).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::{ConnectionInfo, TlsInfo};
    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use tower::ServiceExt;

    fn app() -> Router {
        layer(Router::new().fallback(|| async { "served" }))
    }

    fn info(tls: bool) -> ConnectInfo<ConnectionInfo> {
        let mut info = ConnectionInfo::new("127.0.0.1:9".parse().unwrap());
        info.tls = tls.then(TlsInfo::default);
        ConnectInfo(info)
    }

    #[tokio::test]
    async fn test_plaintext_redirected() {
        let req = Request::builder()
            .uri("/a/b?c=d")
            .header("Host", "example.org")
            .extension(info(false))
            .body(Body::empty())
            .unwrap();
        let res = app().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(res.headers()[LOCATION], "https://example.org/a/b?c=d");
    }

    #[tokio::test]
    async fn test_tls_passes_through() {
        let req = Request::builder()
            .uri("/")
            .header("Host", "example.org")
            .extension(info(true))
            .body(Body::empty())
            .unwrap();
        let res = app().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_original_uri_preferred() {
        let req = Request::builder()
            .uri("/stripped")
            .header("Host", "example.org")
            .extension(OriginalUri("/site/stripped".parse().unwrap()))
            .body(Body::empty())
            .unwrap();
        let res = app().oneshot(req).await.unwrap();
        assert_eq!(res.headers()[LOCATION], "https://example.org/site/stripped");
    }
}
