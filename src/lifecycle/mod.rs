//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Init logging → Raise fd limit → Build server
//!     → Init metrics → Start listeners
//!
//! Reload (startup.rs):
//!     SIGHUP or config file change → Load + validate → Build candidate
//!     → Server::replace (old server kept on any failure)
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     SIGTERM/SIGINT → Stop listeners → Close access log → Exit
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then observability, then listeners
//! - A single control loop serialises reloads and shutdown

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownSignal};
