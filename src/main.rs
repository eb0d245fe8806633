//! wirelab: small network services over a staged pipeline
//!
//! Services, one per process:
//! - echo: greet, echo one chunk of bytes, close
//! - line: newline-framed echo
//! - tls-line: line echo over TLS, one reply per connection
//! - file: static files and directory listings over HTTP/1.1
//!
//! Matching echo clients run with `--client`. Configuration via CLI
//! arguments or TOML file.

mod client;
mod config;
mod error;
mod pipeline;
mod protocols;
mod runtime;
mod server;
mod tls;

use config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if config.client {
        info!(
            server = %config.address(),
            protocol = ?config.protocol,
            "Starting wirelab client"
        );
    } else {
        info!(
            host = %config.host,
            port = config.port,
            protocol = ?config.protocol,
            workers = config.workers,
            max_connections = config.max_connections,
            shutdown_timeout_secs = config.shutdown_timeout.as_secs(),
            "Starting wirelab server"
        );
    }

    runtime::run(config)
}
