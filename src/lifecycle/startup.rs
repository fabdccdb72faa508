//! Startup orchestration and the process control loop.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Initialize logging and metrics
//! - Build and start the server
//! - Serialise reloads (SIGHUP, config file changes) and shutdown
//!
//! # Design Decisions
//! - Fail fast at startup: any configuration or bind error is fatal
//! - After startup nothing is fatal except a stop signal; a failed reload
//!   is logged and the running server keeps serving

use std::error::Error;
use std::future;
use std::io;
use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::config::watcher::ConfigWatcher;
use crate::config::{build_server, load_config, ConfigError, ServerConfig};
use crate::http::Server;
use crate::lifecycle::signals::{Signal, Signals};
use crate::observability::{logging, metrics};

/// Process-level options, usually from the command line.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config_path: PathBuf,
    /// Validate and build the configuration, then exit.
    pub check: bool,
    /// Reload when the configuration file changes.
    pub watch: bool,
}

/// Raise the soft open-file limit to the hard limit.
pub fn raise_open_file_limit() -> io::Result<libc::rlim_t> {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `limit` is a valid, writable rlimit.
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) } != 0 {
        return Err(io::Error::last_os_error());
    }
    limit.rlim_cur = limit.rlim_max;
    // SAFETY: `limit` is a valid rlimit read back from the kernel.
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &limit) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(limit.rlim_cur)
}

/// Run the server until a stop signal arrives.
pub async fn run(options: RunOptions) -> Result<(), Box<dyn Error>> {
    let config = load_config(&options.config_path)?;
    logging::init_logging(&config.observability.log_level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %options.config_path.display(),
        sites = config.sites.len(),
        "portico starting"
    );

    match raise_open_file_limit() {
        Ok(limit) => tracing::debug!(limit, "Raised open file limit"),
        Err(e) => tracing::warn!(error = %e, "Failed to raise open file limit"),
    }

    let mut server = build_server(&config)?;
    if options.check {
        tracing::info!(listeners = server.len(), "Configuration OK");
        return Ok(());
    }

    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?)?;
    }

    let mut signals = Signals::new()?;
    server.start().await?;
    for key in server.keys() {
        tracing::info!(listener = %key, "Listening");
    }

    let (_watcher, mut updates) = if options.watch {
        let (watcher, updates) = ConfigWatcher::new(&options.config_path);
        (Some(watcher.run()?), Some(updates))
    } else {
        (None, None)
    };

    loop {
        tokio::select! {
            signal = signals.recv() => match signal {
                Signal::Shutdown => break,
                Signal::Reload => reload(&mut server, load_config(&options.config_path)).await,
            },
            Some(config) = next_update(&mut updates) => {
                reload(&mut server, Ok(config)).await;
            }
        }
    }

    tracing::info!("Stopping server");
    server.stop().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn next_update(
    updates: &mut Option<mpsc::UnboundedReceiver<ServerConfig>>,
) -> Option<ServerConfig> {
    match updates {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}

/// Build a candidate from `config` and swap it in. Any failure leaves
/// `server` as it was.
pub async fn reload(server: &mut Server, config: Result<ServerConfig, ConfigError>) {
    let candidate = match config.and_then(|config| build_server(&config)) {
        Ok(candidate) => candidate,
        Err(e) => {
            tracing::error!(error = %e, "Reload failed; keeping current configuration");
            metrics::record_reload("failure");
            return;
        }
    };

    match server.replace(candidate).await {
        Ok(()) => {
            tracing::info!(listeners = server.len(), "Configuration reloaded");
            metrics::record_reload("success");
        }
        Err(e) => {
            tracing::error!(error = %e, "Reload failed; keeping current configuration");
            metrics::record_reload("failure");
        }
    }
}
