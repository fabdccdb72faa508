//! Connection wrapper and per-connection context.
//!
//! # Responsibilities
//! - Carry the classified protocol tag, TLS summary and resolved remote
//!   address of an accepted connection
//! - Replay bytes consumed while looking for a PROXY preamble
//! - Generate unique connection IDs for tracing
//! - Track live connections per listener
//!
//! # Design Decisions
//! - The context reaches handlers as `ConnectInfo<ConnectionInfo>` in the
//!   request extensions, inserted by whichever engine serves the connection
//! - `ConnectionInfo` is immutable once classification is done

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::ConnectInfo;
use axum::http::Extensions;
use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Summary of a TLS session terminated by the upstream proxy.
///
/// Presence is the only thing known today: the version, cipher and
/// signature sub-fields of the PROXY SSL TLV are not parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct TlsInfo {}

/// Everything known about a connection once it has been classified.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Connection ID for log correlation.
    pub id: ConnectionId,
    /// Classified protocol tag: `""`, `"http/1.0"`, `"http/1.1"`, `"h2"`,
    /// `"h2c"`, or whatever ALPN value the upstream proxy relayed.
    pub protocol: String,
    /// Present only when the upstream proxy reported a client TLS session.
    pub tls: Option<TlsInfo>,
    /// Client address; taken from the PROXY preamble when one was sent.
    pub remote_addr: SocketAddr,
    /// Address of the socket peer (the proxy, when there is one).
    pub peer_addr: SocketAddr,
}

impl ConnectionInfo {
    /// Context for a connection that carried no PROXY preamble.
    pub fn new(peer_addr: SocketAddr) -> Self {
        Self {
            id: ConnectionId::new(),
            protocol: String::new(),
            tls: None,
            remote_addr: peer_addr,
            peer_addr,
        }
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// URL scheme the client used to reach the upstream proxy.
    pub fn scheme(&self) -> &'static str {
        if self.is_tls() {
            "https"
        } else {
            "http"
        }
    }
}

/// Look up the connection context of a request.
pub fn connection_info(extensions: &Extensions) -> Option<&ConnectionInfo> {
    extensions
        .get::<ConnectInfo<ConnectionInfo>>()
        .map(|ConnectInfo(info)| info)
}

/// An accepted, classified connection.
///
/// Reads first drain whatever was buffered during classification, then go
/// to the underlying stream. Writes always go straight through.
#[derive(Debug)]
pub struct Conn<S = TcpStream> {
    stream: S,
    buffered: Bytes,
    info: ConnectionInfo,
    _guard: Option<ConnectionGuard>,
}

impl<S> Conn<S> {
    pub fn new(stream: S, buffered: Bytes, info: ConnectionInfo) -> Self {
        Self {
            stream,
            buffered,
            info,
            _guard: None,
        }
    }

    /// Attach a tracker guard so the connection counts as live until dropped.
    pub fn with_guard(mut self, guard: ConnectionGuard) -> Self {
        self._guard = Some(guard);
        self
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn protocol(&self) -> &str {
        &self.info.protocol
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.info.remote_addr
    }

    /// Bytes read off the socket that have not been consumed yet.
    pub fn buffered(&self) -> &[u8] {
        &self.buffered
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Conn<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.buffered.is_empty() {
            let n = self.buffered.len().min(buf.remaining());
            buf.put_slice(&self.buffered[..n]);
            self.buffered.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Conn<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.stream.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

/// Counts the live connections of one listener.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn peer() -> SocketAddr {
        "192.0.2.10:40000".parse().unwrap()
    }

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track();
        assert_eq!(tracker.active_count(), 1);

        let guard2 = tracker.track();
        assert_eq!(tracker.active_count(), 2);

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn plain_connection_defaults() {
        let info = ConnectionInfo::new(peer());
        assert_eq!(info.protocol, "");
        assert_eq!(info.remote_addr, peer());
        assert!(!info.is_tls());
        assert_eq!(info.scheme(), "http");
    }

    #[test]
    fn context_is_found_in_extensions() {
        let mut extensions = Extensions::new();
        assert!(connection_info(&extensions).is_none());

        let mut info = ConnectionInfo::new(peer());
        info.protocol = "h2".into();
        info.tls = Some(TlsInfo::default());
        extensions.insert(ConnectInfo(info));

        let found = connection_info(&extensions).unwrap();
        assert_eq!(found.protocol, "h2");
        assert_eq!(found.scheme(), "https");
    }

    #[tokio::test]
    async fn buffered_bytes_are_replayed_first() {
        let (client, server) = tokio::io::duplex(64);
        let mut conn = Conn::new(server, Bytes::from_static(b"GET "), ConnectionInfo::new(peer()));

        let mut client = client;
        client.write_all(b"/ HTTP/1.1\r\n").await.unwrap();
        drop(client);

        let mut received = String::new();
        conn.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "GET / HTTP/1.1\r\n");
        assert!(conn.buffered().is_empty());
    }

    #[tokio::test]
    async fn guard_released_with_connection() {
        let tracker = ConnectionTracker::new();
        let (_client, server) = tokio::io::duplex(8);
        let conn = Conn::new(server, Bytes::new(), ConnectionInfo::new(peer()))
            .with_guard(tracker.track());
        assert_eq!(tracker.active_count(), 1);
        drop(conn);
        assert_eq!(tracker.active_count(), 0);
    }
}
