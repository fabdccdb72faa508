//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Classified connection
//!     → engine.rs (HTTP/1 via axum::serve over the handoff bridge,
//!                  HTTP/2 via hyper directly)
//!     → dispatch service (load routing table snapshot)
//!     → site handler (middleware + backend)
//!     → Send to client
//!
//! server.rs owns the listeners and swaps configurations on reload.
//! ```

pub mod engine;
pub mod server;

pub use server::{ListenerKey, Server};
