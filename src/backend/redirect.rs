//! `redirect <to>`: answer every request with 302 Found.

use axum::http::header::LOCATION;
use axum::http::{HeaderValue, StatusCode};
use axum::Router;

use crate::config::schema::{Directive, DirectiveError};

pub fn build(directive: &Directive) -> Result<Router, DirectiveError> {
    let [to] = directive.expect_params::<1>()?;
    let location =
        HeaderValue::from_str(to).map_err(|_| directive.invalid("invalid redirect target"))?;

    Ok(Router::new().fallback(move || {
        let location = location.clone();
        async move { (StatusCode::FOUND, [(LOCATION, location)]) }
    }))
}
