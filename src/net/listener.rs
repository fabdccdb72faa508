//! TCP listener and per-connection dispatch.
//!
//! # Responsibilities
//! - Bind one address and accept connections on it
//! - Classify each connection and hand it to the HTTP/1 or HTTP/2 engine
//! - Own the listener's published routing table
//! - Stop accepting and close the socket on `stop`
//!
//! # Design Decisions
//! - One task per accepted connection; a slow or broken client never holds
//!   up the accept loop
//! - Connection-scoped failures are logged in that connection's task
//! - An accept error ends this listener's accept loop only
//! - `stop` waits for the accept loop and the HTTP/1 engine, not for HTTP/2
//!   or upgraded connections, which are only signalled

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use super::bridge::{self, Handoff, HANDOFF_CAPACITY};
use super::classify::{classify, ConnectionError, Engine};
use super::connection::{Conn, ConnectionTracker};
use crate::http::engine::{self, Http2Engine};
use crate::lifecycle::{Shutdown, ShutdownSignal};
use crate::observability::metrics;
use crate::routing::{RoutingTable, SharedTable};

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to accept connection.
    #[error("failed to accept: {0}")]
    Accept(#[source] std::io::Error),

    #[error("unsupported network {0:?}")]
    UnsupportedNetwork(String),
}

/// Per-listener tunables.
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    /// Time allowed for a PROXY preamble to arrive.
    pub proxy_header_timeout: Duration,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            proxy_header_timeout: Duration::from_secs(10),
        }
    }
}

/// One bound address with its engines and routing table.
pub struct Listener {
    network: String,
    address: String,
    table: SharedTable,
    options: ListenerOptions,
    tracker: ConnectionTracker,
    running: Option<Running>,
}

struct Running {
    local_addr: SocketAddr,
    shutdown: Shutdown,
    handoff: Handoff<Conn>,
    accept_task: JoinHandle<()>,
    http1_task: JoinHandle<()>,
}

/// State shared by the accept loop and its connection tasks.
struct ConnContext {
    address: String,
    handoff: Handoff<Conn>,
    http2: Http2Engine,
    tracker: ConnectionTracker,
    header_timeout: Duration,
}

impl Listener {
    /// A listener for `address` that is not bound yet.
    pub fn new(network: impl Into<String>, address: impl Into<String>, table: RoutingTable) -> Self {
        Self {
            network: network.into(),
            address: address.into(),
            table: table.into_shared(),
            options: ListenerOptions::default(),
            tracker: ConnectionTracker::new(),
            running: None,
        }
    }

    pub fn with_options(mut self, options: ListenerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// The routing table currently published.
    pub fn table(&self) -> Arc<RoutingTable> {
        self.table.load_full()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Bound socket address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// Connections accepted and not yet closed.
    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Bind the socket and start serving. A no-op when already running.
    pub async fn start(&mut self) -> Result<(), ListenerError> {
        if self.running.is_some() {
            return Ok(());
        }
        if self.network != "tcp" {
            return Err(ListenerError::UnsupportedNetwork(self.network.clone()));
        }

        let bind_error = |source| ListenerError::Bind {
            address: self.address.clone(),
            source,
        };
        let inner = TcpListener::bind(&self.address).await.map_err(bind_error)?;
        let local_addr = inner.local_addr().map_err(bind_error)?;

        tracing::info!(address = %local_addr, routes = self.table.load().len(), "Listener bound");

        let shutdown = Shutdown::new();
        let (handoff, bridge) = bridge::handoff(HANDOFF_CAPACITY);
        let service = engine::dispatch_service(Arc::clone(&self.table));
        let http1_task = engine::spawn_http1(
            bridge,
            service.clone(),
            shutdown.subscribe(),
            self.address.clone(),
        );

        let ctx = Arc::new(ConnContext {
            address: self.address.clone(),
            handoff: handoff.clone(),
            http2: Http2Engine::new(service, shutdown.subscribe()),
            tracker: self.tracker.clone(),
            header_timeout: self.options.proxy_header_timeout,
        });
        let accept_task = tokio::spawn(run_accept_loop(inner, ctx, shutdown.subscribe()));

        self.running = Some(Running {
            local_addr,
            shutdown,
            handoff,
            accept_task,
            http1_task,
        });
        Ok(())
    }

    /// Stop accepting and close the socket. A no-op when not running.
    ///
    /// Returns once the accept loop and the HTTP/1 engine have finished.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.shutdown.trigger();
        if let Err(e) = running.handoff.close() {
            tracing::debug!(address = %self.address, error = %e, "Handoff bridge already closed");
        }
        if let Err(e) = running.accept_task.await {
            tracing::warn!(address = %self.address, error = %e, "Accept loop panicked");
        }
        if let Err(e) = running.http1_task.await {
            tracing::warn!(address = %self.address, error = %e, "HTTP/1 engine panicked");
        }
        tracing::info!(address = %self.address, "Listener stopped");
    }

    /// Publish `other`'s routing table on this listener.
    ///
    /// Requests already dispatched keep the table they loaded.
    pub fn update_from(&self, other: &Listener) {
        self.table.store(other.table.load_full());
    }

    /// Publish a new routing table.
    pub fn publish(&self, table: RoutingTable) {
        self.table.store(Arc::new(table));
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.shutdown.trigger();
            let _ = running.handoff.close();
        }
    }
}

async fn run_accept_loop(inner: TcpListener, ctx: Arc<ConnContext>, shutdown: ShutdownSignal) {
    if let Err(e) = accept_loop(&inner, &ctx, shutdown).await {
        tracing::error!(address = %ctx.address, error = %e, "Accept loop terminated");
    }
}

async fn accept_loop(
    inner: &TcpListener,
    ctx: &Arc<ConnContext>,
    mut shutdown: ShutdownSignal,
) -> Result<(), ListenerError> {
    loop {
        let (stream, peer_addr) = tokio::select! {
            _ = shutdown.recv() => return Ok(()),
            accepted = inner.accept() => accepted.map_err(ListenerError::Accept)?,
        };
        tracing::debug!(address = %ctx.address, peer_addr = %peer_addr, "Connection accepted");

        let ctx = Arc::clone(ctx);
        tokio::spawn(async move {
            if let Err(e) = ctx.serve_conn(stream, peer_addr).await {
                metrics::record_connection_error(e.kind());
                tracing::warn!(
                    address = %ctx.address,
                    peer_addr = %peer_addr,
                    error = %e,
                    "Connection failed"
                );
            }
        });
    }
}

impl ConnContext {
    async fn serve_conn(&self, stream: TcpStream, peer_addr: SocketAddr) -> Result<(), ConnectionError> {
        let guard = self.tracker.track();
        let conn = classify(stream, peer_addr, self.header_timeout)
            .await?
            .with_guard(guard);

        let info = conn.info();
        tracing::debug!(
            connection_id = %info.id,
            remote_addr = %info.remote_addr,
            protocol = %info.protocol,
            tls = info.is_tls(),
            "Connection classified"
        );
        metrics::record_connection(&info.protocol);

        match Engine::for_protocol(conn.protocol()) {
            Some(Engine::Http2) => self.http2.serve_connection(conn).await?,
            Some(Engine::Http1) => self.handoff.push(conn).await?,
            None => return Err(ConnectionError::UnsupportedProtocol(conn.protocol().to_owned())),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn table(body: &'static str) -> RoutingTable {
        let mut table = RoutingTable::new();
        table.insert("/", Router::new().fallback(move || async move { body })).unwrap();
        table
    }

    async fn get(addr: SocketAddr) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_start_serve_stop() {
        let mut listener = Listener::new("tcp", "127.0.0.1:0", table("hello"));
        assert!(listener.local_addr().is_none());
        listener.start().await.unwrap();
        let addr = listener.local_addr().unwrap();

        let response = get(addr).await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("hello"));

        listener.stop().await;
        assert!(!listener.is_running());
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_update_from_swaps_table() {
        let mut listener = Listener::new("tcp", "127.0.0.1:0", table("old"));
        listener.start().await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(get(addr).await.ends_with("old"));

        listener.update_from(&Listener::new("tcp", "127.0.0.1:0", table("new")));
        assert!(get(addr).await.ends_with("new"));
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let mut first = Listener::new("tcp", "127.0.0.1:0", table("a"));
        first.start().await.unwrap();
        let taken = first.local_addr().unwrap().to_string();

        let mut second = Listener::new("tcp", taken.clone(), table("b"));
        match second.start().await {
            Err(ListenerError::Bind { address, .. }) => assert_eq!(address, taken),
            other => panic!("expected bind error, got {other:?}"),
        }
        first.stop().await;
    }

    #[tokio::test]
    async fn test_unsupported_network() {
        let mut listener = Listener::new("udp", "127.0.0.1:0", table("a"));
        assert!(matches!(
            listener.start().await,
            Err(ListenerError::UnsupportedNetwork(_))
        ));
    }

    #[tokio::test]
    async fn test_unsupported_protocol_closes_connection() {
        let mut listener = Listener::new("tcp", "127.0.0.1:0", table("a"));
        listener.start().await.unwrap();
        let addr = listener.local_addr().unwrap();

        let alpn = b"spdy/3";
        let mut preamble = crate::net::proxy_protocol::V2_SIGNATURE.to_vec();
        preamble.extend_from_slice(&[0x20, 0x00]);
        preamble.extend_from_slice(&((3 + alpn.len()) as u16).to_be_bytes());
        preamble.push(crate::net::proxy_protocol::tlv::ALPN);
        preamble.extend_from_slice(&(alpn.len() as u16).to_be_bytes());
        preamble.extend_from_slice(alpn);

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&preamble).await.unwrap();
        let mut buf = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut buf))
            .await
            .unwrap();
        assert!(read.map(|n| n == 0).unwrap_or(true));
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_active_connections_tracked() {
        let mut listener = Listener::new("tcp", "127.0.0.1:0", table("a"));
        listener.start().await.unwrap();
        let addr = listener.local_addr().unwrap();

        let idle = TcpStream::connect(addr).await.unwrap();
        for _ in 0..50 {
            if listener.active_connections() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(listener.active_connections(), 1);
        drop(idle);
        listener.stop().await;
    }
}
