//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Site handlers produce:
//!     → access_log.rs (one combined-format line per response)
//! ```
//!
//! # Design Decisions
//! - Metrics are cheap (atomic increments) and no-ops until an exporter
//!   is installed
//! - The access log line is written when the response body finishes, so
//!   the byte count is the real one

pub mod access_log;
pub mod logging;
pub mod metrics;
