//! `basic_auth` directive: HTTP Basic authentication.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use base64::Engine;

use crate::config::schema::{Directive, DirectiveError};

#[derive(Clone)]
struct Credentials {
    username: Arc<str>,
    password: Arc<str>,
}

impl Credentials {
    /// Both halves are always compared so timing does not reveal which
    /// one was wrong.
    fn verify(&self, headers: &HeaderMap) -> bool {
        let Some((username, password)) = decode(headers) else {
            return false;
        };
        let username_ok = constant_time_eq(username.as_bytes(), self.username.as_bytes());
        let password_ok = constant_time_eq(password.as_bytes(), self.password.as_bytes());
        username_ok & password_ok
    }
}

fn decode(headers: &HeaderMap) -> Option<(String, String)> {
    let encoded = headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim().as_bytes())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_owned(), password.to_owned()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub fn layer(directive: &Directive, next: Router) -> Result<Router, DirectiveError> {
    let [username, password] = directive.expect_params::<2>()?;
    let credentials = Credentials {
        username: username.into(),
        password: password.into(),
    };
    Ok(next.layer(middleware::from_fn_with_state(credentials, require_basic_auth)))
}

async fn require_basic_auth(
    State(credentials): State<Credentials>,
    req: Request,
    next: Next,
) -> Response {
    if credentials.verify(req.headers()) {
        return next.run(req).await;
    }
    (
        StatusCode::UNAUTHORIZED,
        [(WWW_AUTHENTICATE, "Basic")],
        "Unauthorized\n",
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use tower::ServiceExt;

    fn app() -> Router {
        let backend = Router::new().fallback(|| async { "secret stuff" });
        layer(&Directive::new("basic_auth", &["alice", "s3cret"]), backend).unwrap()
    }

    fn request(authorization: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn basic(user_pass: &str) -> String {
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(user_pass)
        )
    }

    #[tokio::test]
    async fn test_valid_credentials_pass() {
        let res = app().oneshot(request(Some(&basic("alice:s3cret")))).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, "secret stuff");
    }

    #[tokio::test]
    async fn test_rejections() {
        for auth in [
            None,
            Some(basic("alice:wrong")),
            Some(basic("bob:s3cret")),
            Some("Basic !!!".to_owned()),
            Some("Bearer abc".to_owned()),
        ] {
            let res = app().oneshot(request(auth.as_deref())).await.unwrap();
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(res.headers()[WWW_AUTHENTICATE], "Basic");
            let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
            assert_eq!(body, "Unauthorized\n");
        }
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }

    #[test]
    fn test_needs_two_params() {
        assert!(layer(&Directive::new("basic_auth", &["alice"]), Router::new()).is_err());
    }
}
