//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path)
//!     → router.rs (load the published table, look up the handler)
//!     → matcher.rs (evaluate host and path patterns)
//!     → Return: handler, trailing-slash redirect, or 404
//!
//! Table Compilation (at config build):
//!     site addresses
//!     → Parse patterns
//!     → Insert into RoutingTable
//!     → Publish through ArcSwap (hot-swappable per listener)
//! ```
//!
//! # Design Decisions
//! - Tables are immutable once published; reload swaps the whole table
//! - No regex in hot path (prefix matching only)
//! - Host-specific patterns win over host-less ones, then longest path wins

pub mod matcher;
pub mod router;

pub use matcher::Pattern;
pub use router::{Lookup, RoutingTable, SharedTable};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("invalid pattern {0:?}: expected \"host/path\" or \"/path\"")]
    InvalidPattern(String),

    #[error("pattern {0:?} is registered more than once")]
    DuplicatePattern(String),
}
