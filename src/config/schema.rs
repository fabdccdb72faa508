//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Access log file. No access logging when unset.
    pub access_logs: Option<PathBuf>,

    /// Listener settings shared by every site.
    pub listener: ListenerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Site definitions.
    #[serde(rename = "site")]
    pub sites: Vec<SiteConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Host part of every bound address (e.g., "0.0.0.0" or "::").
    pub bind_host: String,

    /// Seconds allowed for a PROXY preamble to arrive.
    pub proxy_header_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            proxy_header_timeout_secs: 10,
        }
    }
}

/// A site: one or more addresses served by the same handler chain.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SiteConfig {
    /// Site addresses, e.g. "example.org", "http+insecure://:8080/api/".
    pub addresses: Vec<String>,

    /// Backend and middleware directives, in order.
    #[serde(default)]
    pub directives: Vec<Directive>,
}

/// A configuration directive: name, parameters and nested children.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Directive {
    pub name: String,

    #[serde(default)]
    pub params: Vec<String>,

    #[serde(default)]
    pub children: Vec<Directive>,
}

/// Error in a single directive or site address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectiveError {
    #[error("directive {directive:?}: expected {expected} parameter(s), got {got}")]
    ParamCount {
        directive: String,
        expected: usize,
        got: usize,
    },

    #[error("directive {directive:?}: {reason}")]
    Invalid { directive: String, reason: String },

    #[error("directive {directive:?}: duplicate child {child:?}")]
    DuplicateChild { directive: String, child: String },

    #[error("unknown directive {0:?}")]
    Unknown(String),

    #[error("missing backend directive")]
    MissingBackend,

    #[error("multiple backend directives provided")]
    MultipleBackends,

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

impl Directive {
    pub fn new(name: impl Into<String>, params: &[&str]) -> Self {
        Self {
            name: name.into(),
            params: params.iter().map(|p| p.to_string()).collect(),
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: Directive) -> Self {
        self.children.push(child);
        self
    }

    /// Exactly `N` parameters.
    pub fn expect_params<const N: usize>(&self) -> Result<[&str; N], DirectiveError> {
        if self.params.len() != N {
            return Err(DirectiveError::ParamCount {
                directive: self.name.clone(),
                expected: N,
                got: self.params.len(),
            });
        }
        Ok(std::array::from_fn(|i| self.params[i].as_str()))
    }

    /// First child with the given name.
    pub fn child(&self, name: &str) -> Option<&Directive> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn invalid(&self, reason: impl Into<String>) -> DirectiveError {
        DirectiveError::Invalid {
            directive: self.name.clone(),
            reason: reason.into(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config: ServerConfig = toml::from_str(
            r#"
            access_logs = "/tmp/access.log"

            [listener]
            bind_host = "::"

            [[site]]
            addresses = ["example.org", "http+insecure://:8080/api/"]
            directives = [
              { name = "reverse_proxy", params = ["http://127.0.0.1:3000/"] },
              { name = "header", children = [
                  { name = "X-Frame-Options", params = ["DENY"] },
              ] },
            ]
            "#,
        )
        .unwrap();

        assert_eq!(config.access_logs, Some(PathBuf::from("/tmp/access.log")));
        assert_eq!(config.listener.bind_host, "::");
        assert_eq!(config.listener.proxy_header_timeout_secs, 10);
        assert!(!config.observability.metrics_enabled);
        assert_eq!(config.sites.len(), 1);
        let site = &config.sites[0];
        assert_eq!(site.addresses.len(), 2);
        assert_eq!(site.directives[0].params, vec!["http://127.0.0.1:3000/"]);
        assert_eq!(site.directives[1].children[0].name, "X-Frame-Options");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert!(config.sites.is_empty());
        assert!(config.access_logs.is_none());
        assert_eq!(config.listener.bind_host, "0.0.0.0");
    }

    #[test]
    fn test_expect_params() {
        let directive = Directive::new("header", &["X-A", "1"]);
        let [name, value] = directive.expect_params::<2>().unwrap();
        assert_eq!((name, value), ("X-A", "1"));
        assert_eq!(
            directive.expect_params::<1>(),
            Err(DirectiveError::ParamCount {
                directive: "header".into(),
                expected: 1,
                got: 2,
            })
        );
    }
}
