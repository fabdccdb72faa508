//! Site middleware.
//!
//! # Data Flow
//! ```text
//! Request
//!     → access log (outermost, when configured)
//!     → strip_prefix.rs (site path removed)
//!     → tls_redirect.rs (plaintext → https, unless http+insecure)
//!     → header.rs / basic_auth.rs (in directive order, last is outermost)
//!     → backend
//! ```
//!
//! # Design Decisions
//! - Every middleware is a function from `Router` to `Router` so the chain
//!   can be assembled from configuration at build time
//! - Directive middleware rejects bad parameters at build time, never per
//!   request

pub mod basic_auth;
pub mod header;
pub mod strip_prefix;
pub mod tls_redirect;

use axum::Router;

use crate::config::schema::{Directive, DirectiveError};

/// Directive names that wrap a backend.
pub const NAMES: &[&str] = &["header", "basic_auth"];

pub fn is_middleware(name: &str) -> bool {
    NAMES.contains(&name)
}

/// Wrap `next` with the middleware `directive` names.
pub fn apply(directive: &Directive, next: Router) -> Result<Router, DirectiveError> {
    match directive.name.as_str() {
        "header" => header::layer(directive, next),
        "basic_auth" => basic_auth::layer(directive, next),
        other => Err(DirectiveError::Unknown(other.to_owned())),
    }
}
