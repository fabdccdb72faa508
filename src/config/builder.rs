//! Configuration Builder: turn a validated [`ServerConfig`] into a
//! [`Server`] whose listeners are not started yet.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;

use super::address::SiteAddress;
use super::loader::ConfigError;
use super::schema::{DirectiveError, ServerConfig, SiteConfig};
use super::validation::validate_config;
use crate::backend;
use crate::http::server::{ListenerKey, Server};
use crate::middleware::{self, strip_prefix, tls_redirect};
use crate::net::listener::{Listener, ListenerOptions};
use crate::observability::access_log::{self, AccessLog};
use crate::routing::{RoutingError, RoutingTable};

/// Build the listeners and routing tables `config` describes.
///
/// Nothing is bound here; every configuration error surfaces before a
/// single socket is touched.
pub fn build_server(config: &ServerConfig) -> Result<Server, ConfigError> {
    validate_config(config).map_err(ConfigError::Validation)?;

    let log_sink = match &config.access_logs {
        Some(path) => Some(Arc::new(AccessLog::open(path).map_err(|source| {
            ConfigError::AccessLog {
                path: path.clone(),
                source,
            }
        })?)),
        None => None,
    };

    let mut tables: BTreeMap<ListenerKey, RoutingTable> = BTreeMap::new();
    for site in &config.sites {
        for raw in &site.addresses {
            let site_error = |source| ConfigError::Site {
                site: raw.clone(),
                source,
            };
            let address = SiteAddress::parse(raw).map_err(site_error)?;
            let handler =
                build_handler(site, &address, log_sink.as_ref()).map_err(site_error)?;

            let key = ListenerKey::tcp(address.listen_address(&config.listener.bind_host));
            let pattern = address.pattern();
            let table = tables.entry(key.clone()).or_default();
            match table.insert(&pattern, handler) {
                Ok(()) => {}
                Err(RoutingError::DuplicatePattern(pattern)) => {
                    return Err(ConfigError::DuplicatePattern {
                        pattern,
                        address: key.address,
                    });
                }
                Err(e) => {
                    return Err(site_error(DirectiveError::InvalidAddress(e.to_string())));
                }
            }
        }
    }

    let options = ListenerOptions {
        proxy_header_timeout: Duration::from_secs(config.listener.proxy_header_timeout_secs),
    };
    let mut server = Server::new();
    for (key, table) in tables {
        tracing::debug!(listener = %key, patterns = table.len(), "Built routing table");
        server.insert_listener(
            Listener::new(key.network, key.address, table).with_options(options.clone()),
        );
    }
    if let Some(sink) = log_sink {
        server.set_access_log(sink);
    }
    Ok(server)
}

/// Backend first, then middleware in directive order, then the
/// secure-scheme redirect, prefix stripping and access logging.
fn build_handler(
    site: &SiteConfig,
    address: &SiteAddress,
    log_sink: Option<&Arc<AccessLog>>,
) -> Result<Router, DirectiveError> {
    let mut backend_handler = None;
    for directive in &site.directives {
        let Some(build) = backend::lookup(&directive.name) else {
            continue;
        };
        if backend_handler.is_some() {
            return Err(DirectiveError::MultipleBackends);
        }
        backend_handler = Some(build(directive)?);
    }
    let mut handler = backend_handler.ok_or(DirectiveError::MissingBackend)?;

    for directive in &site.directives {
        if backend::is_backend(&directive.name) {
            continue;
        }
        handler = middleware::apply(directive, handler)?;
    }
    if !address.insecure {
        handler = tls_redirect::layer(handler);
    }
    handler = strip_prefix::layer(&address.path, handler);
    if let Some(sink) = log_sink {
        handler = access_log::layer(handler, sink.clone(), &address.host);
    }
    Ok(handler)
}
