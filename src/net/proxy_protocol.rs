//! PROXY protocol preamble parsing (v1 text and v2 binary).
//!
//! Only the receiving side is implemented. The preamble is read off the raw
//! stream in chunks; anything read past its end belongs to the application
//! protocol and stays in the caller's buffer.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Prefix of a v1 (text) preamble.
pub const V1_PREFIX: &[u8] = b"PROXY ";
/// Signature opening a v2 (binary) preamble.
pub const V2_SIGNATURE: &[u8; 12] = b"\r\n\r\n\0\r\nQUIT\n";

/// Longest legal v1 line, CRLF included.
const V1_MAX_LEN: usize = 107;
/// Signature, version/command, family/transport, length.
const V2_FIXED_LEN: usize = 16;

/// TLV type codes.
pub mod tlv {
    pub const ALPN: u8 = 0x01;
    pub const SSL: u8 = 0x20;
}

/// `client` bit set when the client connected over TLS.
pub const PP2_CLIENT_SSL: u8 = 0x01;

#[derive(Debug, thiserror::Error)]
pub enum ProxyProtocolError {
    #[error("failed to read PROXY header: {0}")]
    Io(#[from] io::Error),

    #[error("timed out waiting for PROXY header")]
    Timeout,

    #[error("connection closed inside PROXY header")]
    UnexpectedEof,

    #[error("invalid PROXY v1 header: {0}")]
    InvalidV1(&'static str),

    #[error("truncated PROXY v2 header")]
    Truncated,

    #[error("unsupported PROXY v2 version {0}")]
    Version(u8),

    #[error("unsupported PROXY v2 command {0:#x}")]
    Command(u8),

    #[error("unsupported PROXY v2 address family {0:#x}")]
    Family(u8),

    #[error("unsupported PROXY v2 transport {0:#x}")]
    Transport(u8),

    #[error("PROXY v2 address block too short for its family")]
    AddressBlock,

    #[error("malformed TLV")]
    Tlv,

    #[error("malformed SSL TLV")]
    Ssl,
}

/// A type-length-value extension from a v2 preamble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    pub kind: u8,
    pub value: Bytes,
}

/// A parsed preamble.
///
/// `source` is `None` for v1 `UNKNOWN`, v2 `LOCAL`, and address families
/// that carry no socket address; the socket peer address applies then.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyHeader {
    pub version: u8,
    pub source: Option<SocketAddr>,
    pub destination: Option<SocketAddr>,
    pub tlvs: Vec<Tlv>,
}

impl ProxyHeader {
    /// First TLV of the given type.
    pub fn tlv(&self, kind: u8) -> Option<&Tlv> {
        self.tlvs.iter().find(|t| t.kind == kind)
    }
}

/// Decoded `PP2_TYPE_SSL` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SslTlv {
    pub client: u8,
    pub verify: u32,
    pub sub_tlvs: Vec<Tlv>,
}

impl SslTlv {
    pub fn parse(value: &[u8]) -> Result<Self, ProxyProtocolError> {
        if value.len() < 5 {
            return Err(ProxyProtocolError::Ssl);
        }
        let client = value[0];
        let verify = u32::from_be_bytes([value[1], value[2], value[3], value[4]]);
        let sub_tlvs = parse_tlvs(&value[5..]).map_err(|_| ProxyProtocolError::Ssl)?;
        Ok(Self {
            client,
            verify,
            sub_tlvs,
        })
    }

    pub fn client_ssl(&self) -> bool {
        self.client & PP2_CLIENT_SSL != 0
    }
}

/// Split a TLV block into its entries.
pub fn parse_tlvs(mut buf: &[u8]) -> Result<Vec<Tlv>, ProxyProtocolError> {
    let mut tlvs = Vec::new();
    while !buf.is_empty() {
        if buf.len() < 3 {
            return Err(ProxyProtocolError::Tlv);
        }
        let kind = buf[0];
        let len = u16::from_be_bytes([buf[1], buf[2]]) as usize;
        let rest = &buf[3..];
        if rest.len() < len {
            return Err(ProxyProtocolError::Tlv);
        }
        tlvs.push(Tlv {
            kind,
            value: Bytes::copy_from_slice(&rest[..len]),
        });
        buf = &rest[len..];
    }
    Ok(tlvs)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prefix {
    Match,
    Partial,
    Mismatch,
}

fn prefix_state(buf: &[u8], signature: &[u8]) -> Prefix {
    if buf.len() >= signature.len() {
        if buf.starts_with(signature) {
            Prefix::Match
        } else {
            Prefix::Mismatch
        }
    } else if signature.starts_with(buf) {
        Prefix::Partial
    } else {
        Prefix::Mismatch
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sniff {
    NeedMore,
    Absent,
    V1,
    V2,
}

fn sniff(buf: &[u8]) -> Sniff {
    match (prefix_state(buf, V1_PREFIX), prefix_state(buf, V2_SIGNATURE)) {
        (Prefix::Match, _) => Sniff::V1,
        (_, Prefix::Match) => Sniff::V2,
        (Prefix::Partial, _) | (_, Prefix::Partial) => Sniff::NeedMore,
        _ => Sniff::Absent,
    }
}

async fn read_more<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut BytesMut) -> io::Result<usize> {
    buf.reserve(512);
    stream.read_buf(buf).await
}

/// Read an optional preamble from `stream`.
///
/// Every byte read lands in `buf`. On return the preamble, if any, has been
/// split off the front; what is left must be replayed to the application
/// protocol. A stream that closes while the bytes seen so far could still
/// be a preamble yields `Ok(None)` with those bytes left in place.
pub async fn read_header<S>(
    stream: &mut S,
    buf: &mut BytesMut,
) -> Result<Option<ProxyHeader>, ProxyProtocolError>
where
    S: AsyncRead + Unpin,
{
    loop {
        match sniff(buf) {
            Sniff::Absent => return Ok(None),
            Sniff::NeedMore => {
                if read_more(stream, buf).await? == 0 {
                    return Ok(None);
                }
            }
            Sniff::V1 => {
                let window = &buf[..buf.len().min(V1_MAX_LEN)];
                if let Some(end) = window.windows(2).position(|w| w == b"\r\n") {
                    let line = buf.split_to(end + 2);
                    return parse_v1(&line).map(Some);
                }
                if buf.len() >= V1_MAX_LEN {
                    return Err(ProxyProtocolError::InvalidV1("header longer than 107 bytes"));
                }
                if read_more(stream, buf).await? == 0 {
                    return Err(ProxyProtocolError::UnexpectedEof);
                }
            }
            Sniff::V2 => {
                if buf.len() >= V2_FIXED_LEN {
                    let len = u16::from_be_bytes([buf[14], buf[15]]) as usize;
                    if buf.len() >= V2_FIXED_LEN + len {
                        let header = buf.split_to(V2_FIXED_LEN + len);
                        return parse_v2(&header).map(Some);
                    }
                }
                if read_more(stream, buf).await? == 0 {
                    return Err(ProxyProtocolError::UnexpectedEof);
                }
            }
        }
    }
}

/// Parse a complete v1 line, trailing CRLF included.
pub fn parse_v1(line: &[u8]) -> Result<ProxyHeader, ProxyProtocolError> {
    let line = line
        .strip_suffix(b"\r\n")
        .ok_or(ProxyProtocolError::InvalidV1("missing CRLF"))?;
    let line = std::str::from_utf8(line).map_err(|_| ProxyProtocolError::InvalidV1("not ASCII"))?;

    let mut parts = line.split(' ');
    if parts.next() != Some("PROXY") {
        return Err(ProxyProtocolError::InvalidV1("missing PROXY prefix"));
    }
    let family = parts
        .next()
        .ok_or(ProxyProtocolError::InvalidV1("missing protocol family"))?;
    match family {
        "UNKNOWN" => {
            return Ok(ProxyHeader {
                version: 1,
                ..ProxyHeader::default()
            })
        }
        "TCP4" | "TCP6" => {}
        _ => return Err(ProxyProtocolError::InvalidV1("unknown protocol family")),
    }

    let fields: Vec<&str> = parts.collect();
    let [src, dst, sport, dport] = fields.as_slice() else {
        return Err(ProxyProtocolError::InvalidV1("expected four address fields"));
    };
    let src: IpAddr = src
        .parse()
        .map_err(|_| ProxyProtocolError::InvalidV1("invalid source address"))?;
    let dst: IpAddr = dst
        .parse()
        .map_err(|_| ProxyProtocolError::InvalidV1("invalid destination address"))?;
    let family_ok = match family {
        "TCP4" => src.is_ipv4() && dst.is_ipv4(),
        _ => src.is_ipv6() && dst.is_ipv6(),
    };
    if !family_ok {
        return Err(ProxyProtocolError::InvalidV1("address does not match family"));
    }
    let sport = parse_port(sport)?;
    let dport = parse_port(dport)?;

    Ok(ProxyHeader {
        version: 1,
        source: Some(SocketAddr::new(src, sport)),
        destination: Some(SocketAddr::new(dst, dport)),
        tlvs: Vec::new(),
    })
}

fn parse_port(raw: &str) -> Result<u16, ProxyProtocolError> {
    if raw.len() > 1 && raw.starts_with('0') {
        return Err(ProxyProtocolError::InvalidV1("port has leading zero"));
    }
    raw.parse()
        .map_err(|_| ProxyProtocolError::InvalidV1("invalid port"))
}

/// Parse a complete v2 header: the 16 fixed bytes plus the payload.
pub fn parse_v2(header: &[u8]) -> Result<ProxyHeader, ProxyProtocolError> {
    if header.len() < V2_FIXED_LEN || !header.starts_with(V2_SIGNATURE) {
        return Err(ProxyProtocolError::Truncated);
    }
    let version = header[12] >> 4;
    let command = header[12] & 0x0f;
    if version != 2 {
        return Err(ProxyProtocolError::Version(version));
    }
    let family = header[13] >> 4;
    let transport = header[13] & 0x0f;
    if transport > 2 {
        return Err(ProxyProtocolError::Transport(transport));
    }
    let len = u16::from_be_bytes([header[14], header[15]]) as usize;
    let payload = header
        .get(V2_FIXED_LEN..V2_FIXED_LEN + len)
        .ok_or(ProxyProtocolError::Truncated)?;

    let addr_len = match family {
        0x0 => 0,
        0x1 => 12,
        0x2 => 36,
        0x3 => 216,
        other => return Err(ProxyProtocolError::Family(other)),
    };
    if payload.len() < addr_len {
        return Err(ProxyProtocolError::AddressBlock);
    }
    let addresses = match family {
        0x1 => {
            let a = &payload[..12];
            let src = Ipv4Addr::new(a[0], a[1], a[2], a[3]);
            let dst = Ipv4Addr::new(a[4], a[5], a[6], a[7]);
            Some((
                SocketAddr::new(src.into(), u16::from_be_bytes([a[8], a[9]])),
                SocketAddr::new(dst.into(), u16::from_be_bytes([a[10], a[11]])),
            ))
        }
        0x2 => {
            let a = &payload[..36];
            let mut src = [0u8; 16];
            let mut dst = [0u8; 16];
            src.copy_from_slice(&a[..16]);
            dst.copy_from_slice(&a[16..32]);
            Some((
                SocketAddr::new(Ipv6Addr::from(src).into(), u16::from_be_bytes([a[32], a[33]])),
                SocketAddr::new(Ipv6Addr::from(dst).into(), u16::from_be_bytes([a[34], a[35]])),
            ))
        }
        _ => None,
    };
    let tlvs = parse_tlvs(&payload[addr_len..])?;

    match command {
        // LOCAL: the proxy's own connection, e.g. a health check.
        0x0 => Ok(ProxyHeader {
            version: 2,
            source: None,
            destination: None,
            tlvs,
        }),
        0x1 => Ok(ProxyHeader {
            version: 2,
            source: addresses.map(|(src, _)| src),
            destination: addresses.map(|(_, dst)| dst),
            tlvs,
        }),
        other => Err(ProxyProtocolError::Command(other)),
    }
}
