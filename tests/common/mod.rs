//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::{SocketAddr, SocketAddrV4};
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Empty;
use hyper::client::conn::{http1, http2};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use portico::net::proxy_protocol::{PP2_CLIENT_SSL, V1_PREFIX, V2_SIGNATURE};
use portico::ServerConfig;

/// Parse and validate a TOML configuration.
pub fn config(toml: &str) -> ServerConfig {
    portico::config::parse_config(toml).unwrap()
}

/// PROXY v1 preamble for a TCP4 connection.
pub fn proxy_v1(source: SocketAddrV4, destination: SocketAddrV4) -> Vec<u8> {
    let mut line = V1_PREFIX.to_vec();
    line.extend_from_slice(
        format!(
            "TCP4 {} {} {} {}\r\n",
            source.ip(),
            destination.ip(),
            source.port(),
            destination.port()
        )
        .as_bytes(),
    );
    line
}

/// PROXY v2 PROXY-command preamble for a TCP4 connection with TLVs.
pub fn proxy_v2(source: SocketAddrV4, destination: SocketAddrV4, tlvs: &[(u8, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&source.ip().octets());
    body.extend_from_slice(&destination.ip().octets());
    body.extend_from_slice(&source.port().to_be_bytes());
    body.extend_from_slice(&destination.port().to_be_bytes());
    for (kind, value) in tlvs {
        body.push(*kind);
        body.extend_from_slice(&(value.len() as u16).to_be_bytes());
        body.extend_from_slice(value);
    }

    let mut header = V2_SIGNATURE.to_vec();
    header.push(0x21);
    header.push(0x11);
    header.extend_from_slice(&(body.len() as u16).to_be_bytes());
    header.extend_from_slice(&body);
    header
}

/// SSL TLV value reporting a client TLS session.
pub fn ssl_tlv_value() -> Vec<u8> {
    vec![PP2_CLIENT_SSL, 0, 0, 0, 0]
}

/// Send `preamble` then `request` on a fresh connection and read the
/// whole response. The request should ask for `Connection: close`.
pub async fn send_raw(addr: SocketAddr, preamble: &[u8], request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(preamble).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

/// `GET path` with `Connection: close`.
pub async fn get(addr: SocketAddr, host: &str, path: &str) -> String {
    send_raw(
        addr,
        &[],
        &format!("GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n"),
    )
    .await
}

/// Open a keep-alive HTTP/1.1 client connection.
pub async fn http1_client(addr: SocketAddr) -> http1::SendRequest<Empty<Bytes>> {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (sender, connection) = http1::handshake(TokioIo::new(stream)).await.unwrap();
    tokio::spawn(connection);
    sender
}

/// Open an HTTP/2 client connection after writing `preamble`.
pub async fn http2_client(addr: SocketAddr, preamble: &[u8]) -> http2::SendRequest<Empty<Bytes>> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(preamble).await.unwrap();
    let (sender, connection) = http2::handshake(TokioExecutor::new(), TokioIo::new(stream))
        .await
        .unwrap();
    tokio::spawn(connection);
    sender
}

/// Wait until the access log has at least `lines` lines.
pub async fn read_log(path: &Path, lines: usize) -> Vec<String> {
    for _ in 0..100 {
        let content = std::fs::read_to_string(path).unwrap_or_default();
        let found: Vec<String> = content.lines().map(str::to_owned).collect();
        if found.len() >= lines {
            return found;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("access log {} never reached {lines} lines", path.display());
}

/// Start a simple mock backend that returns a fixed response.
pub async fn start_mock_backend(addr: SocketAddr, response: &'static str) {
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = [0u8; 4096];
                let _ = socket.read(&mut request).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    response.len(),
                    response
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
}
