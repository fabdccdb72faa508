//! Site address parsing.
//!
//! Syntax: `[scheme://]host[:port][/path]`. The scheme is empty, `http`, or
//! `http+insecure`; a missing port means 80; an empty host serves every
//! host on that port.

use super::schema::DirectiveError;

const DEFAULT_PORT: u16 = 80;

/// A parsed site address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteAddress {
    /// Lowercased host, empty for "any host".
    pub host: String,
    pub port: u16,
    /// Path prefix, always starting with `/`.
    pub path: String,
    /// Served without redirecting plaintext clients to https.
    pub insecure: bool,
}

impl SiteAddress {
    pub fn parse(raw: &str) -> Result<Self, DirectiveError> {
        let invalid = |reason: &str| DirectiveError::InvalidAddress(format!("{raw:?}: {reason}"));

        let (scheme, rest) = match raw.split_once("://") {
            Some((scheme, rest)) => (scheme, rest),
            None => ("", raw),
        };
        let insecure = match scheme {
            "" | "http" => false,
            "http+insecure" => true,
            _ => return Err(invalid("unknown scheme")),
        };

        let (authority, path) = match rest.find('/') {
            Some(i) => rest.split_at(i),
            None => (rest, "/"),
        };
        let (host, port) = split_host_port(authority).ok_or_else(|| invalid("malformed host"))?;
        let port = match port {
            None | Some("") => DEFAULT_PORT,
            Some(port) => port.parse().map_err(|_| invalid("invalid port"))?,
        };

        Ok(Self {
            host: host.to_lowercase(),
            port,
            path: path.to_owned(),
            insecure,
        })
    }

    /// Routing pattern: `host/path`, or `/path` for any host.
    pub fn pattern(&self) -> String {
        format!("{}{}", self.host, self.path)
    }

    /// Address to bind for this site on `bind_host`.
    pub fn listen_address(&self, bind_host: &str) -> String {
        if bind_host.contains(':') {
            format!("[{bind_host}]:{}", self.port)
        } else {
            format!("{bind_host}:{}", self.port)
        }
    }
}

fn split_host_port(authority: &str) -> Option<(&str, Option<&str>)> {
    if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        return match after {
            "" => Some((host, None)),
            _ => Some((host, Some(after.strip_prefix(':')?))),
        };
    }
    match authority.split_once(':') {
        Some((host, port)) if !port.contains(':') => Some((host, Some(port))),
        Some(_) => None,
        None => Some((authority, None)),
    }
}
