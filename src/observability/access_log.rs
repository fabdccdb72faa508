//! Access logging.
//!
//! # Responsibilities
//! - Open, append to and close the access log file
//! - Observe each response's status and body size without altering it
//! - Write one record per request once the response body is done
//!
//! # Design Decisions
//! - The response body is wrapped, not buffered: streaming, upgrades and
//!   trailers pass through untouched
//! - A record is written when the body reports end of stream or, failing
//!   that, when it is dropped (client went away, handler aborted)
//! - Absent fields are written as `-`

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::{OriginalUri, Request, State};
use axum::http::header::{REFERER, USER_AGENT};
use axum::http::{HeaderMap, StatusCode, Version};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use bytes::Bytes;
use chrono::{DateTime, Local};
use hyper::body::{Body as HttpBody, Frame, SizeHint};

use crate::net::connection::connection_info;

/// An append-only access log file.
#[derive(Debug)]
pub struct AccessLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl AccessLog {
    /// Open (creating if needed) the log for appending.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record.
    pub fn write_record(&self, record: &AccessRecord) -> io::Result<()> {
        let line = format!("{record}\n");
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        match file.as_mut() {
            Some(file) => file.write_all(line.as_bytes()),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "access log is closed")),
        }
    }

    /// Flush and close. Later writes fail; closing twice is a no-op.
    pub fn close(&self) -> io::Result<()> {
        let file = self
            .file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match file {
            Some(mut file) => file.flush(),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// One access log line.
#[derive(Debug, Clone)]
pub struct AccessRecord {
    pub remote_addr: Option<SocketAddr>,
    pub time: DateTime<Local>,
    pub method: String,
    pub scheme: &'static str,
    pub host: String,
    pub uri: String,
    pub version: Version,
    pub status: StatusCode,
    pub size: u64,
    pub referer: Option<String>,
    pub user_agent: Option<String>,
}

struct OrDash<'a>(Option<&'a str>);

impl fmt::Display for OrDash<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(s) if !s.is_empty() => f.write_str(s),
            _ => f.write_str("-"),
        }
    }
}

/// Like [`OrDash`], wrapped in double quotes with escaping.
struct QuotedOrDash<'a>(Option<&'a str>);

impl fmt::Display for QuotedOrDash<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(s) if !s.is_empty() => write!(f, "{s:?}"),
            _ => f.write_str("\"-\""),
        }
    }
}

impl fmt::Display for AccessRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let remote = self.remote_addr.map(|addr| addr.to_string());
        write!(
            f,
            "{} - - [{}] \"{} {}://{}{} {:?}\" {} {} {} {}",
            OrDash(remote.as_deref()),
            self.time.format("%d/%b/%Y:%H:%M:%S %z"),
            OrDash(Some(self.method.as_str())),
            self.scheme,
            OrDash(Some(self.host.as_str())),
            OrDash(Some(self.uri.as_str())),
            self.version,
            self.status.as_u16(),
            self.size,
            QuotedOrDash(self.referer.as_deref()),
            QuotedOrDash(self.user_agent.as_deref()),
        )
    }
}

#[derive(Clone)]
struct AccessLogState {
    sink: Arc<AccessLog>,
    site_host: Arc<str>,
}

/// Wrap `handler` so every request it serves is logged to `sink`.
///
/// `site_host` stands in for requests that carry no `Host`.
pub fn layer(handler: Router, sink: Arc<AccessLog>, site_host: &str) -> Router {
    let state = AccessLogState {
        sink,
        site_host: site_host.into(),
    };
    handler.layer(middleware::from_fn_with_state(state, log_access))
}

fn header_str(headers: &HeaderMap, name: axum::http::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

async fn log_access(State(state): State<AccessLogState>, req: Request, next: Next) -> Response {
    let info = connection_info(req.extensions());
    let uri = req
        .extensions()
        .get::<OriginalUri>()
        .map(|OriginalUri(uri)| uri)
        .unwrap_or(req.uri());
    let host = req
        .headers()
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .filter(|h| !h.is_empty())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))
        .unwrap_or(&*state.site_host)
        .to_owned();

    let mut record = AccessRecord {
        remote_addr: info.map(|info| info.remote_addr),
        time: Local::now(),
        method: req.method().to_string(),
        scheme: info.map_or("http", |info| info.scheme()),
        host,
        uri: uri
            .path_and_query()
            .map_or_else(|| "/".to_owned(), |pq| pq.as_str().to_owned()),
        version: req.version(),
        status: StatusCode::OK,
        size: 0,
        referer: header_str(req.headers(), REFERER),
        user_agent: header_str(req.headers(), USER_AGENT),
    };

    let response = next.run(req).await;
    let (parts, body) = response.into_parts();
    record.status = parts.status;
    let body = CountingBody::new(body, state.sink, record);
    Response::from_parts(parts, Body::new(body))
}

/// Response body wrapper that counts data bytes and writes the access
/// record exactly once.
pub struct CountingBody {
    inner: Body,
    bytes: u64,
    pending: Option<(Arc<AccessLog>, AccessRecord)>,
}

impl CountingBody {
    pub fn new(inner: Body, sink: Arc<AccessLog>, record: AccessRecord) -> Self {
        Self {
            inner,
            bytes: 0,
            pending: Some((sink, record)),
        }
    }

    fn finish(&mut self) {
        if let Some((sink, mut record)) = self.pending.take() {
            record.size = self.bytes;
            record.time = Local::now();
            if let Err(e) = sink.write_record(&record) {
                tracing::warn!(path = %sink.path().display(), error = %e, "Failed to write access log");
            }
        }
    }
}

impl HttpBody for CountingBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let polled = Pin::new(&mut self.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    self.bytes += data.len() as u64;
                }
            }
            Poll::Ready(None) => self.finish(),
            Poll::Ready(Some(Err(_))) | Poll::Pending => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for CountingBody {
    fn drop(&mut self) {
        self.finish();
    }
}
