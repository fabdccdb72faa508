//! Top-level server: the set of listeners and hot reload.
//!
//! # Responsibilities
//! - Keep at most one listener per (network, address)
//! - Start and stop all listeners
//! - Replace one configuration with another without dropping the
//!   addresses both share
//! - Own the access log sink for the lifetime of a configuration
//!
//! # Design Decisions
//! - `replace` starts new addresses before touching anything else; if one
//!   fails to bind the running server is left exactly as it was
//! - Shared addresses keep their socket and connections; only the routing
//!   table is swapped

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures_util::future::join_all;

use crate::net::listener::{Listener, ListenerError};
use crate::observability::access_log::AccessLog;
use crate::observability::metrics;

/// Identity of a listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerKey {
    pub network: String,
    pub address: String,
}

impl ListenerKey {
    pub fn tcp(address: impl Into<String>) -> Self {
        Self {
            network: "tcp".to_owned(),
            address: address.into(),
        }
    }

    fn of(listener: &Listener) -> Self {
        Self {
            network: listener.network().to_owned(),
            address: listener.address().to_owned(),
        }
    }
}

impl fmt::Display for ListenerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.address)
    }
}

/// A set of listeners plus the resources their handlers share.
#[derive(Default)]
pub struct Server {
    listeners: HashMap<ListenerKey, Listener>,
    access_log: Option<Arc<AccessLog>>,
}

impl Server {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener, returning the one it displaced, if any.
    pub fn insert_listener(&mut self, listener: Listener) -> Option<Listener> {
        self.listeners.insert(ListenerKey::of(&listener), listener)
    }

    pub fn listener(&self, key: &ListenerKey) -> Option<&Listener> {
        self.listeners.get(key)
    }

    pub fn listeners(&self) -> impl Iterator<Item = &Listener> {
        self.listeners.values()
    }

    /// Keys in a stable order.
    pub fn keys(&self) -> Vec<ListenerKey> {
        let mut keys: Vec<_> = self.listeners.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn set_access_log(&mut self, sink: Arc<AccessLog>) {
        self.access_log = Some(sink);
    }

    pub fn access_log(&self) -> Option<&Arc<AccessLog>> {
        self.access_log.as_ref()
    }

    /// Start every listener. On failure the listeners started by this call
    /// are stopped again.
    pub async fn start(&mut self) -> Result<(), ListenerError> {
        let mut started = Vec::new();
        for key in self.keys() {
            let Some(listener) = self.listeners.get_mut(&key) else {
                continue;
            };
            if listener.is_running() {
                continue;
            }
            if let Err(e) = listener.start().await {
                self.stop_keys(&started).await;
                return Err(e);
            }
            started.push(key);
        }
        metrics::set_listeners(self.len());
        Ok(())
    }

    /// Stop every listener and close the access log.
    pub async fn stop(&mut self) {
        join_all(self.listeners.values_mut().map(Listener::stop)).await;
        metrics::set_listeners(0);
        self.close_access_log();
    }

    async fn stop_keys(&mut self, keys: &[ListenerKey]) {
        for key in keys {
            if let Some(listener) = self.listeners.get_mut(key) {
                listener.stop().await;
            }
        }
    }

    fn close_access_log(&mut self) {
        if let Some(sink) = self.access_log.take() {
            if let Err(e) = sink.close() {
                tracing::warn!(path = %sink.path().display(), error = %e, "Failed to close access log");
            }
        }
    }

    /// Switch this running server over to `next`.
    ///
    /// 1. Start the listeners that exist only in `next`
    /// 2. Publish `next`'s routing tables on listeners both share
    /// 3. Stop the listeners that exist only in `self`
    /// 4. Take over `next`'s access log, closing the old one
    ///
    /// If step 1 fails, whatever it started is stopped and `self` is left
    /// untouched.
    pub async fn replace(&mut self, mut next: Server) -> Result<(), ListenerError> {
        let added: Vec<ListenerKey> = next
            .keys()
            .into_iter()
            .filter(|key| !self.listeners.contains_key(key))
            .collect();
        let removed: Vec<ListenerKey> = self
            .keys()
            .into_iter()
            .filter(|key| !next.listeners.contains_key(key))
            .collect();

        let mut started = Vec::new();
        for key in &added {
            let Some(listener) = next.listeners.get_mut(key) else {
                continue;
            };
            if let Err(e) = listener.start().await {
                next.stop_keys(&started).await;
                next.close_access_log();
                return Err(e);
            }
            started.push(key.clone());
        }

        for (key, listener) in &self.listeners {
            if let Some(candidate) = next.listeners.get(key) {
                listener.update_from(candidate);
            }
        }

        for key in &removed {
            if let Some(mut listener) = self.listeners.remove(key) {
                listener.stop().await;
            }
        }

        for key in added {
            if let Some(listener) = next.listeners.remove(&key) {
                self.listeners.insert(key, listener);
            }
        }

        let previous = std::mem::replace(&mut self.access_log, next.access_log.take());
        if let Some(sink) = previous {
            if let Err(e) = sink.close() {
                tracing::warn!(path = %sink.path().display(), error = %e, "Failed to close access log");
            }
        }

        metrics::set_listeners(self.len());
        tracing::info!(
            listeners = self.len(),
            removed = removed.len(),
            "Server configuration replaced"
        );
        Ok(())
    }
}
