//! portico: an HTTP front-end that accepts HTTP/1.x and HTTP/2 over plain
//! TCP, optionally behind a PROXY-protocol speaking load balancer, and
//! dispatches requests to configured sites.

pub mod backend;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod middleware;
pub mod net;
pub mod observability;
pub mod routing;

pub use config::{build_server, load_config, ServerConfig};
pub use http::{ListenerKey, Server};
pub use lifecycle::Shutdown;
pub use net::Listener;
pub use routing::RoutingTable;
