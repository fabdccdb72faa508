//! Connection classification.
//!
//! Reads the optional PROXY preamble off a freshly accepted socket, derives
//! the connection context from it and decides which engine serves the
//! connection.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::AsyncRead;

use super::bridge::BridgeError;
use super::connection::{Conn, ConnectionInfo, TlsInfo};
use super::proxy_protocol::{self, tlv, ProxyHeader, ProxyProtocolError, SslTlv};

/// Per-connection failures. None of them affect other connections.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Parse(#[from] ProxyProtocolError),

    #[error("unsupported protocol {0:?}")]
    UnsupportedProtocol(String),

    #[error("HTTP/1 handoff failed: {0}")]
    Handoff(#[from] BridgeError),

    #[error("HTTP/2 connection error: {0}")]
    Http2(#[from] hyper::Error),
}

impl ConnectionError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectionError::Parse(_) => "parse",
            ConnectionError::UnsupportedProtocol(_) => "unsupported_protocol",
            ConnectionError::Handoff(_) => "handoff",
            ConnectionError::Http2(_) => "http2",
        }
    }
}

/// The engine a connection is handed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Http1,
    Http2,
}

impl Engine {
    /// Engine for a protocol tag, or `None` when the tag is not served.
    pub fn for_protocol(tag: &str) -> Option<Engine> {
        match tag {
            "h2" | "h2c" => Some(Engine::Http2),
            "" | "http/1.0" | "http/1.1" => Some(Engine::Http1),
            _ => None,
        }
    }
}

/// Classify a raw connection.
///
/// The preamble must arrive within `header_timeout`. Bytes read past it are
/// kept in the returned [`Conn`] and replayed to the engine.
pub async fn classify<S>(
    mut stream: S,
    peer_addr: SocketAddr,
    header_timeout: Duration,
) -> Result<Conn<S>, ProxyProtocolError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(512);
    let header = tokio::time::timeout(
        header_timeout,
        proxy_protocol::read_header(&mut stream, &mut buf),
    )
    .await
    .map_err(|_| ProxyProtocolError::Timeout)??;

    let mut info = ConnectionInfo::new(peer_addr);
    if let Some(header) = header {
        apply_header(&mut info, &header)?;
    }
    Ok(Conn::new(stream, buf.freeze(), info))
}

/// Fold a preamble into the connection context.
///
/// A malformed SSL TLV fails the whole connection.
pub fn apply_header(info: &mut ConnectionInfo, header: &ProxyHeader) -> Result<(), ProxyProtocolError> {
    if let Some(source) = header.source {
        info.remote_addr = source;
    }
    for entry in &header.tlvs {
        match entry.kind {
            tlv::ALPN => info.protocol = String::from_utf8_lossy(&entry.value).into_owned(),
            tlv::SSL => {
                let ssl = SslTlv::parse(&entry.value)?;
                info.tls = ssl.client_ssl().then(TlsInfo::default);
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::proxy_protocol::{PP2_CLIENT_SSL, V2_SIGNATURE};
    use tokio::io::AsyncReadExt;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn peer() -> SocketAddr {
        "10.0.0.2:50000".parse().unwrap()
    }

    fn v2_with_tlvs(tlvs: &[(u8, &[u8])]) -> Vec<u8> {
        let mut payload = vec![198, 51, 100, 4, 10, 0, 0, 1, 0x1f, 0x90, 0x01, 0xbb];
        for (kind, value) in tlvs {
            payload.push(*kind);
            payload.extend_from_slice(&(value.len() as u16).to_be_bytes());
            payload.extend_from_slice(value);
        }
        let mut header = V2_SIGNATURE.to_vec();
        header.extend_from_slice(&[0x21, 0x11]);
        header.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        header.extend_from_slice(&payload);
        header
    }

    #[test]
    fn engine_dispatch_table() {
        assert_eq!(Engine::for_protocol("h2"), Some(Engine::Http2));
        assert_eq!(Engine::for_protocol("h2c"), Some(Engine::Http2));
        assert_eq!(Engine::for_protocol(""), Some(Engine::Http1));
        assert_eq!(Engine::for_protocol("http/1.0"), Some(Engine::Http1));
        assert_eq!(Engine::for_protocol("http/1.1"), Some(Engine::Http1));
        assert_eq!(Engine::for_protocol("spdy/3"), None);
        assert_eq!(Engine::for_protocol("H2"), None);
    }

    #[tokio::test]
    async fn plain_connection_is_replayed_untouched() {
        let stream = &b"GET / HTTP/1.1\r\nHost: a\r\n\r\n"[..];
        let mut conn = classify(stream, peer(), TIMEOUT).await.unwrap();
        assert_eq!(conn.protocol(), "");
        assert_eq!(conn.remote_addr(), peer());
        assert!(conn.info().tls.is_none());

        let mut replay = String::new();
        conn.read_to_string(&mut replay).await.unwrap();
        assert_eq!(replay, "GET / HTTP/1.1\r\nHost: a\r\n\r\n");
    }

    #[tokio::test]
    async fn v2_preamble_sets_protocol_tls_and_remote() {
        let ssl = [PP2_CLIENT_SSL, 0, 0, 0, 0];
        let mut raw = v2_with_tlvs(&[(tlv::ALPN, &b"h2"[..]), (tlv::SSL, &ssl[..])]);
        raw.extend_from_slice(b"PRI * HTTP/2.0\r\n");

        let mut conn = classify(raw.as_slice(), peer(), TIMEOUT).await.unwrap();
        assert_eq!(conn.protocol(), "h2");
        assert!(conn.info().is_tls());
        assert_eq!(conn.remote_addr(), "198.51.100.4:8080".parse().unwrap());
        assert_eq!(conn.info().peer_addr, peer());

        let mut replay = Vec::new();
        conn.read_to_end(&mut replay).await.unwrap();
        assert_eq!(replay, b"PRI * HTTP/2.0\r\n");
    }

    #[tokio::test]
    async fn ssl_tlv_without_client_bit_is_plaintext() {
        let raw = v2_with_tlvs(&[(tlv::SSL, &[0, 0, 0, 0, 0][..])]);
        let conn = classify(raw.as_slice(), peer(), TIMEOUT).await.unwrap();
        assert!(conn.info().tls.is_none());
    }

    #[tokio::test]
    async fn malformed_ssl_tlv_fails_connection() {
        let raw = v2_with_tlvs(&[(tlv::SSL, &[PP2_CLIENT_SSL, 0][..])]);
        let err = classify(raw.as_slice(), peer(), TIMEOUT).await.unwrap_err();
        assert!(matches!(err, ProxyProtocolError::Ssl));
    }

    #[tokio::test]
    async fn v1_preamble_sets_remote_only() {
        let raw = &b"PROXY TCP4 192.0.2.1 192.0.2.2 1234 80\r\nGET / HTTP/1.0\r\n\r\n"[..];
        let conn = classify(raw, peer(), TIMEOUT).await.unwrap();
        assert_eq!(conn.remote_addr(), "192.0.2.1:1234".parse().unwrap());
        assert_eq!(conn.protocol(), "");
    }

    #[tokio::test]
    async fn stalled_preamble_times_out() {
        let (mut client, server) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut client, b"PROXY TCP4").await.unwrap();

        let err = classify(server, peer(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyProtocolError::Timeout));
        drop(client);
    }
}
