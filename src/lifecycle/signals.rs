//! OS signal handling.
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGINT and SIGTERM stop the server; SIGHUP reloads the configuration

use std::io;

use tokio::signal::unix::{signal, Signal as UnixSignal, SignalKind};

/// What a received signal asks the process to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Reload,
}

/// Registered handlers for the signals the server reacts to.
pub struct Signals {
    interrupt: UnixSignal,
    terminate: UnixSignal,
    hangup: UnixSignal,
}

impl Signals {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    /// Wait for the next signal.
    pub async fn recv(&mut self) -> Signal {
        tokio::select! {
            _ = self.interrupt.recv() => {
                tracing::info!(signal = "SIGINT", "Signal received");
                Signal::Shutdown
            }
            _ = self.terminate.recv() => {
                tracing::info!(signal = "SIGTERM", "Signal received");
                Signal::Shutdown
            }
            _ = self.hangup.recv() => {
                tracing::info!(signal = "SIGHUP", "Signal received");
                Signal::Reload
            }
        }
    }
}
