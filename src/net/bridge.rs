//! Handoff bridge between the accept loop and the HTTP/1 engine.
//!
//! # Responsibilities
//! - Queue classified connections for the HTTP/1 engine (bounded, FIFO)
//! - Present that queue to `axum::serve` as an ordinary listener
//!
//! # Design Decisions
//! - `axum::serve` owns its accept loop, so connections that were accepted
//!   and classified elsewhere are pushed into a channel it pulls from
//! - A full queue blocks the pushing task, which in turn stalls nothing but
//!   that connection
//! - After `close` the engine never sees "listener finished"; it leaves
//!   through its graceful shutdown signal

use std::io;
use std::sync::{Arc, PoisonError, RwLock};

use axum::extract::connect_info::Connected;
use axum::serve::IncomingStream;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use super::connection::{Conn, ConnectionInfo};

/// Queue depth between the accept loop and the HTTP/1 engine.
pub const HANDOFF_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("handoff bridge is closed")]
    Closed,

    #[error("handoff bridge already closed")]
    AlreadyClosed,
}

/// Create a bridge holding at most `capacity` queued items.
pub fn handoff<T>(capacity: usize) -> (Handoff<T>, HandoffListener<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        Handoff {
            tx: Arc::new(RwLock::new(Some(tx))),
        },
        HandoffListener { rx },
    )
}

/// Pushing side of the bridge.
pub struct Handoff<T> {
    tx: Arc<RwLock<Option<mpsc::Sender<T>>>>,
}

impl<T> Clone for Handoff<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T> Handoff<T> {
    fn sender(&self) -> Option<mpsc::Sender<T>> {
        self.tx
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Queue an item, waiting for room when the queue is full.
    ///
    /// Fails with [`BridgeError::Closed`] once the bridge is closed or the
    /// consuming side is gone; the item is dropped then.
    pub async fn push(&self, item: T) -> Result<(), BridgeError> {
        let tx = self.sender().ok_or(BridgeError::Closed)?;
        tx.send(item).await.map_err(|_| BridgeError::Closed)
    }

    /// Stop accepting pushes. Queued items can still be drained.
    pub fn close(&self) -> Result<(), BridgeError> {
        self.tx
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(drop)
            .ok_or(BridgeError::AlreadyClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// Consuming side of the bridge.
pub struct HandoffListener<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> HandoffListener<T> {
    /// Next queued item in push order, or `None` once the bridge is closed
    /// and drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

impl<S> axum::serve::Listener for HandoffListener<Conn<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Io = Conn<S>;
    type Addr = ConnectionInfo;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.rx.recv().await {
            Some(conn) => {
                let info = conn.info().clone();
                (conn, info)
            }
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "handoff bridge has no local address",
        ))
    }
}

impl<S> Connected<IncomingStream<'_, HandoffListener<Conn<S>>>> for ConnectionInfo
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn connect_info(stream: IncomingStream<'_, HandoffListener<Conn<S>>>) -> Self {
        stream.remote_addr().clone()
    }
}
