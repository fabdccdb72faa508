//! HTTP/1 and HTTP/2 engines.
//!
//! # Responsibilities
//! - Build the dispatch service both engines run
//! - Run `axum::serve` over the handoff bridge (HTTP/1, upgrades)
//! - Serve HTTP/2 connections directly with hyper
//!
//! # Design Decisions
//! - Every request loads the listener's published table exactly once, so a
//!   concurrent swap never splits a request across two tables
//! - Connection context is inserted as `ConnectInfo<ConnectionInfo>` by both
//!   engines, so handlers read it the same way regardless of protocol

use std::time::Instant;

use axum::extract::{ConnectInfo, OriginalUri, Request, State};
use axum::response::Response;
use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http2;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tower::ServiceExt;
use tower_http::trace::TraceLayer;

use crate::lifecycle::ShutdownSignal;
use crate::net::bridge::HandoffListener;
use crate::net::connection::{Conn, ConnectionInfo};
use crate::observability::metrics;
use crate::routing::SharedTable;

/// Service that routes every request through the currently published table.
pub fn dispatch_service(table: SharedTable) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(table)
        .layer(TraceLayer::new_for_http())
}

async fn dispatch(State(table): State<SharedTable>, mut req: Request) -> Response {
    let start = Instant::now();
    if req.extensions().get::<OriginalUri>().is_none() {
        let uri = req.uri().clone();
        req.extensions_mut().insert(OriginalUri(uri));
    }
    let snapshot = table.load_full();
    let response = snapshot.serve(req).await;
    metrics::record_request(response.status().as_u16(), start);
    response
}

/// Start the HTTP/1 engine on the consuming side of a handoff bridge.
///
/// The engine stops accepting once `shutdown` fires and the task finishes
/// when its in-flight connections have wound down.
pub fn spawn_http1(
    listener: HandoffListener<Conn>,
    service: Router,
    shutdown: ShutdownSignal,
    address: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::debug!(address = %address, "HTTP/1 engine starting");
        let app = service.into_make_service_with_connect_info::<ConnectionInfo>();
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.wait())
            .await
        {
            tracing::error!(address = %address, error = %e, "HTTP/1 engine failed");
        }
        tracing::debug!(address = %address, "HTTP/1 engine stopped");
    })
}

/// Serves HTTP/2 connections handed over by the classifier.
#[derive(Clone)]
pub struct Http2Engine {
    builder: http2::Builder<TokioExecutor>,
    service: Router,
    shutdown: ShutdownSignal,
}

impl Http2Engine {
    pub fn new(service: Router, shutdown: ShutdownSignal) -> Self {
        Self {
            builder: http2::Builder::new(TokioExecutor::new()),
            service,
            shutdown,
        }
    }

    /// Serve one connection until the client is done or shutdown fires.
    ///
    /// On shutdown the connection gets a GOAWAY and open streams may finish.
    pub async fn serve_connection<S>(&self, conn: Conn<S>) -> Result<(), hyper::Error>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let info = conn.info().clone();
        let service = self.service.clone();
        let svc = service_fn(move |mut req: Request<Incoming>| {
            req.extensions_mut().insert(ConnectInfo(info.clone()));
            service.clone().oneshot(req)
        });

        let connection = self.builder.serve_connection(TokioIo::new(conn), svc);
        tokio::pin!(connection);

        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            result = connection.as_mut() => return result,
            _ = shutdown.recv() => {}
        }
        connection.as_mut().graceful_shutdown();
        connection.await
    }
}
