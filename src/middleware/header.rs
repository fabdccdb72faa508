//! `header` directive: set response headers.
//!
//! Either one pair inline (`header X-Frame-Options DENY`) or a block of
//! children, one header per child.

use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::config::schema::{Directive, DirectiveError};

pub fn layer(directive: &Directive, next: Router) -> Result<Router, DirectiveError> {
    let fields = fields(directive)?;
    Ok(fields.into_iter().fold(next, |router, (name, value)| {
        router.layer(SetResponseHeaderLayer::overriding(name, value))
    }))
}

fn fields(directive: &Directive) -> Result<Vec<(HeaderName, HeaderValue)>, DirectiveError> {
    let mut raw: Vec<(&str, &str)> = Vec::new();
    if !directive.params.is_empty() {
        let [name, value] = directive.expect_params::<2>()?;
        raw.push((name, value));
    } else {
        for child in &directive.children {
            let [value] = child.expect_params::<1>()?;
            if raw.iter().any(|(name, _)| name.eq_ignore_ascii_case(&child.name)) {
                return Err(DirectiveError::DuplicateChild {
                    directive: directive.name.clone(),
                    child: child.name.clone(),
                });
            }
            raw.push((child.name.as_str(), value));
        }
    }

    raw.into_iter()
        .map(|(name, value)| -> Result<_, DirectiveError> {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| directive.invalid(format!("invalid header name {name:?}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| directive.invalid(format!("invalid header value {value:?}")))?;
            Ok((name, value))
        })
        .collect()
}
