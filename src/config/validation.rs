//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that every directive is known and every site has one backend
//! - Validate site addresses and listener settings
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::IpAddr;
use std::net::SocketAddr;

use super::address::SiteAddress;
use super::schema::ServerConfig;
use crate::{backend, middleware};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("site #{index} has no addresses")]
    NoAddresses { index: usize },

    #[error("site #{index}: {reason}")]
    InvalidAddress { index: usize, reason: String },

    #[error("site #{index}: unknown directive {name:?}")]
    UnknownDirective { index: usize, name: String },

    #[error("site #{index}: missing backend directive")]
    MissingBackend { index: usize },

    #[error("site #{index}: multiple backend directives provided")]
    MultipleBackends { index: usize },

    #[error("invalid bind host {0:?}")]
    BindHost(String),

    #[error("proxy_header_timeout_secs must be greater than zero")]
    HeaderTimeout,

    #[error("invalid metrics address {0:?}")]
    MetricsAddress(String),
}

pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_host.parse::<IpAddr>().is_err() {
        errors.push(ValidationError::BindHost(config.listener.bind_host.clone()));
    }
    if config.listener.proxy_header_timeout_secs == 0 {
        errors.push(ValidationError::HeaderTimeout);
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    for (index, site) in config.sites.iter().enumerate() {
        if site.addresses.is_empty() {
            errors.push(ValidationError::NoAddresses { index });
        }
        for raw in &site.addresses {
            if let Err(e) = SiteAddress::parse(raw) {
                errors.push(ValidationError::InvalidAddress {
                    index,
                    reason: e.to_string(),
                });
            }
        }

        let mut backends = 0;
        for directive in &site.directives {
            if backend::is_backend(&directive.name) {
                backends += 1;
            } else if !middleware::is_middleware(&directive.name) {
                errors.push(ValidationError::UnknownDirective {
                    index,
                    name: directive.name.clone(),
                });
            }
        }
        match backends {
            0 => errors.push(ValidationError::MissingBackend { index }),
            1 => {}
            _ => errors.push(ValidationError::MultipleBackends { index }),
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
