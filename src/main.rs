//! portico: HTTP front-end server.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────┐
//!                      │                       PORTICO                        │
//!                      │                                                      │
//!   TCP connection     │  ┌──────────┐   ┌────────────┐   h2  ┌────────────┐  │
//!   ───────────────────┼─▶│ listener │──▶│ classifier │──────▶│ HTTP/2     │  │
//!   (optional PROXY    │  │  accept  │   │ PROXY v1/2 │       │ engine     │  │
//!    v1/v2 preamble)   │  └──────────┘   └─────┬──────┘       └─────┬──────┘  │
//!                      │                       │ else               │         │
//!                      │                       ▼                    │         │
//!                      │                 ┌────────────┐             │         │
//!                      │                 │  handoff   │──▶ HTTP/1   │         │
//!                      │                 │  bridge    │    engine   │         │
//!                      │                 └────────────┘      │      │         │
//!                      │                                     ▼      ▼         │
//!                      │                            ┌─────────────────────┐   │
//!                      │                            │ routing table (swap │   │
//!                      │                            │ on reload)          │   │
//!                      │                            └──────────┬──────────┘   │
//!                      │                                       ▼              │
//!                      │            access log → strip prefix → https redirect│
//!                      │            → header / basic_auth → backend           │
//!                      │            (file_server, reverse_proxy, redirect)    │
//!                      └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use portico::lifecycle::startup::{self, RunOptions};

#[derive(Parser)]
#[command(name = "portico")]
#[command(about = "HTTP front-end server with PROXY protocol support", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "/etc/portico/config.toml")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,

    /// Do not reload when the configuration file changes
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    startup::run(RunOptions {
        config_path: args.config,
        check: args.check,
        watch: !args.no_watch,
    })
    .await
}
