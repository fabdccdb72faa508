//! `reverse_proxy <url>`: forward requests to an HTTP upstream.
//!
//! Inbound forwarding headers are never trusted: `Forwarded` and the
//! `X-Forwarded-*` family are rewritten from the connection summary.
//! Hop-by-hop headers are stripped in both directions, except that an
//! upgrade request keeps `Connection: upgrade` and its `Upgrade` protocol.
//! When the upstream switches protocols both connections are taken over and
//! bytes are copied between them until either side closes.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::uri::{PathAndQuery, Uri};
use axum::http::{StatusCode, Version};
use axum::response::{IntoResponse, Response};
use axum::Router;
use hyper::body::Incoming;
use hyper::upgrade::OnUpgrade;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use url::Url;

use crate::config::schema::{Directive, DirectiveError};
use crate::net::connection::connection_info;
use crate::routing::matcher::{clean_path, host_of};

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, thiserror::Error)]
enum TunnelError {
    #[error("protocol switch failed: {0}")]
    Upgrade(#[from] hyper::Error),

    #[error("tunnel I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Parsed upstream target.
#[derive(Debug, Clone)]
struct Target {
    authority: String,
    path: String,
    query: Option<String>,
}

#[derive(Clone)]
struct Upstream {
    target: Arc<Target>,
    client: Client<HttpConnector, Body>,
}

pub fn build(directive: &Directive) -> Result<Router, DirectiveError> {
    let [raw] = directive.expect_params::<1>()?;
    let url = Url::parse(raw).map_err(|e| directive.invalid(format!("invalid URL: {e}")))?;
    if url.scheme() != "http" {
        return Err(directive.invalid(format!("unsupported upstream scheme {:?}", url.scheme())));
    }
    let host = url
        .host_str()
        .ok_or_else(|| directive.invalid("upstream URL has no host"))?;
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    };

    let upstream = Upstream {
        target: Arc::new(Target {
            authority,
            path: url.path().to_owned(),
            query: url.query().map(str::to_owned),
        }),
        client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
    };
    Ok(Router::new().fallback(proxy).with_state(upstream))
}

async fn proxy(State(upstream): State<Upstream>, req: Request) -> Response {
    let (mut parts, body) = req.into_parts();

    let uri = match rewrite_uri(&upstream.target, &parts.uri) {
        Some(uri) => uri,
        None => return StatusCode::BAD_REQUEST.into_response(),
    };

    let info = connection_info(&parts.extensions);
    let proto = info.map_or("http", |info| info.scheme());
    let remote = info.map(|info| info.remote_addr);
    let host = host_of(&parts.uri, &parts.headers)
        .unwrap_or_default()
        .to_owned();
    let upgrade = upgrade_protocol(&parts.headers);
    let inbound_upgrade = parts.extensions.remove::<OnUpgrade>();

    strip_hop_by_hop(&mut parts.headers);
    let headers = &mut parts.headers;
    let forwarded = format!(
        "for={:?};host={:?};proto={:?}",
        remote.map(|addr| addr.to_string()).unwrap_or_default(),
        host,
        proto
    );
    insert(headers, header::FORWARDED, &forwarded);
    match remote {
        Some(addr) => insert(headers, X_FORWARDED_FOR, &addr.ip().to_string()),
        None => {
            headers.remove(&X_FORWARDED_FOR);
        }
    }
    insert(headers, X_FORWARDED_HOST, &host);
    insert(headers, X_FORWARDED_PROTO, proto);
    if !headers.contains_key(header::HOST) && !host.is_empty() {
        insert(headers, header::HOST, &host);
    }
    if let Some(protocol) = &upgrade {
        headers.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
        headers.insert(header::UPGRADE, protocol.clone());
    }

    let mut outbound = Request::new(body);
    *outbound.method_mut() = parts.method;
    *outbound.uri_mut() = uri;
    *outbound.version_mut() = Version::HTTP_11;
    *outbound.headers_mut() = parts.headers;

    match upstream.client.request(outbound).await {
        Ok(response) if response.status() == StatusCode::SWITCHING_PROTOCOLS => {
            switch_protocols(&upstream.target, upgrade, inbound_upgrade, response)
        }
        Ok(response) => {
            let (mut parts, body) = response.into_parts();
            strip_hop_by_hop(&mut parts.headers);
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(
                upstream = %upstream.target.authority,
                error = %e,
                "Upstream request failed"
            );
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

/// Protocol named by `Upgrade` when `Connection` asks for an upgrade.
fn upgrade_protocol(headers: &HeaderMap) -> Option<HeaderValue> {
    let wants_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    if wants_upgrade {
        headers.get(header::UPGRADE).cloned()
    } else {
        None
    }
}

fn switch_protocols(
    target: &Target,
    requested: Option<HeaderValue>,
    inbound: Option<OnUpgrade>,
    mut response: Response<Incoming>,
) -> Response {
    let (Some(requested), Some(inbound)) = (requested, inbound) else {
        tracing::error!(
            upstream = %target.authority,
            "Upstream switched protocols on a request that cannot be upgraded"
        );
        return StatusCode::BAD_GATEWAY.into_response();
    };
    let offered = response.headers().get(header::UPGRADE);
    if !offered.is_some_and(|offered| offered.as_bytes().eq_ignore_ascii_case(requested.as_bytes())) {
        tracing::error!(
            upstream = %target.authority,
            requested = ?requested,
            offered = ?offered,
            "Upstream switched to a protocol that was not requested"
        );
        return StatusCode::BAD_GATEWAY.into_response();
    }

    let outbound = hyper::upgrade::on(&mut response);
    let authority = target.authority.clone();
    tokio::spawn(async move {
        match tunnel(inbound, outbound).await {
            Ok((from_client, from_upstream)) => tracing::debug!(
                upstream = %authority,
                from_client,
                from_upstream,
                "Upgraded connection closed"
            ),
            Err(e) => tracing::warn!(upstream = %authority, error = %e, "Upgraded connection failed"),
        }
    });

    let (mut parts, _) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    parts
        .headers
        .insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
    parts.headers.insert(header::UPGRADE, requested);
    Response::from_parts(parts, Body::empty())
}

async fn tunnel(inbound: OnUpgrade, outbound: OnUpgrade) -> Result<(u64, u64), TunnelError> {
    let (client, server) = tokio::try_join!(inbound, outbound)?;
    let mut client = TokioIo::new(client);
    let mut server = TokioIo::new(server);
    Ok(tokio::io::copy_bidirectional(&mut client, &mut server).await?)
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => {
            headers.remove(name);
        }
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Upstream URI for `uri`. A target path ending in `/` has the cleaned
/// request path appended; any other target path replaces it. Queries are
/// joined with `&`.
fn rewrite_uri(target: &Target, uri: &Uri) -> Option<Uri> {
    let path = match target.path.strip_suffix('/') {
        Some(base) => format!("{base}{}", clean_path(uri.path())),
        None => target.path.clone(),
    };
    let query = match (target.query.as_deref(), uri.query()) {
        (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => Some(format!("{a}&{b}")),
        (Some(a), _) if !a.is_empty() => Some(a.to_owned()),
        (_, Some(b)) if !b.is_empty() => Some(b.to_owned()),
        _ => None,
    };
    let path_and_query: PathAndQuery = match query {
        Some(query) => format!("{path}?{query}").parse().ok()?,
        None => path.parse().ok()?,
    };
    Uri::builder()
        .scheme("http")
        .authority(target.authority.as_str())
        .path_and_query(path_and_query)
        .build()
        .ok()
}
