//! Logging setup.
//!
//! Logs always go to stderr; in stdio mode stdout carries the protocol.

use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::error::{Error, Result};

/// Default filter directive for a given verbosity.
pub fn default_directive(debug: bool) -> String {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    format!("budget_mcp={},tower_http={},warn", level, level)
}

/// Build the filter: `RUST_LOG` wins unless `--debug` was given.
pub fn env_filter(debug: bool) -> EnvFilter {
    if debug {
        return EnvFilter::new(default_directive(true));
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(false)))
}

/// Install the global subscriber.
pub fn init(debug: bool, json: bool) -> Result<()> {
    let builder = FmtSubscriber::builder()
        .with_env_filter(env_filter(debug))
        .with_writer(std::io::stderr)
        .with_target(debug);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| Error::Internal(format!("failed to set tracing subscriber: {}", e)))
}
