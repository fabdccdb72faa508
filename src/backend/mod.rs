//! Backend directives.
//!
//! A backend is the terminal handler of a site. Exactly one backend
//! directive appears per site; the Configuration Builder resolves it by
//! name through [`lookup`] and then wraps it in middleware.

pub mod file_server;
pub mod redirect;
pub mod reverse_proxy;

use axum::Router;

use crate::config::schema::{Directive, DirectiveError};

/// Backend constructor: builds a handler from its directive.
pub type BuildBackend = fn(&Directive) -> Result<Router, DirectiveError>;

const REGISTRY: &[(&str, BuildBackend)] = &[
    ("file_server", file_server::build),
    ("reverse_proxy", reverse_proxy::build),
    ("redirect", redirect::build),
];

/// Constructor registered for `name`, if any.
pub fn lookup(name: &str) -> Option<BuildBackend> {
    REGISTRY
        .iter()
        .find(|(registered, _)| *registered == name)
        .map(|(_, build)| *build)
}

pub fn is_backend(name: &str) -> bool {
    lookup(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry() {
        assert!(is_backend("file_server"));
        assert!(is_backend("reverse_proxy"));
        assert!(is_backend("redirect"));
        assert!(!is_backend("header"));
        assert!(lookup("basic_auth").is_none());
    }
}
