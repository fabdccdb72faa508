//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, all errors at once)
//!     → ServerConfig (validated, immutable)
//!     → builder.rs (sites → listeners + routing tables)
//!     → Server (not started)
//!
//! On reload (SIGHUP or watcher.rs):
//!     → loader.rs loads new config
//!     → builder.rs builds a candidate Server
//!     → Server::replace swaps it in
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Building never binds sockets, so a bad config cannot disturb the
//!   running server

pub mod address;
pub mod builder;
pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use builder::build_server;
pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{Directive, DirectiveError, ServerConfig, SiteConfig};
