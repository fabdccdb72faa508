//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, one task per connection)
//!     → classify.rs + proxy_protocol.rs (optional PROXY preamble,
//!                                         protocol tag, TLS summary)
//!     → connection.rs (Conn: replay buffered bytes, carry context)
//!     → "h2"/"h2c"             → HTTP/2 engine
//!       ""/"http/1.0"/"http/1.1" → bridge.rs → HTTP/1 engine
//!       anything else          → closed
//! ```
//!
//! # Design Decisions
//! - TLS is terminated upstream; only its presence is relayed
//! - Each connection tracked for observability
//! - Classification failures close that connection only

pub mod bridge;
pub mod classify;
pub mod connection;
pub mod listener;
pub mod proxy_protocol;

pub use classify::{ConnectionError, Engine};
pub use connection::{connection_info, Conn, ConnectionInfo, TlsInfo};
pub use listener::{Listener, ListenerError, ListenerOptions};
