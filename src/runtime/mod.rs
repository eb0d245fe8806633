//! Process runtime.
//!
//! A multi-threaded tokio runtime sized by `workers` is the I/O worker pool.
//! The server path runs one accept task plus one task per connection, with
//! signal handling wired to the shutdown coordinator:
//! - `Shutdown` / `ShutdownSignal`: stop accepting and close idle sessions
//! - `ConnectionRegistry`: what is still open, for the bounded drain

mod connection;
mod shutdown;

pub use connection::{ConnectionEntry, ConnectionRegistry};
pub use shutdown::{Shutdown, ShutdownSignal};

use std::time::Duration;

use tracing::{info, warn};

use crate::client;
use crate::config::Config;
use crate::server::{Listener, Server, Service};

/// Grace period for tasks left over after the drain.
const ABORT_GRACE: Duration = Duration::from_millis(100);

/// Run the configured server or client to completion.
pub fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers.max(1))
        .thread_name("wirelab-worker")
        .enable_all()
        .build()?;

    let result = if config.client {
        runtime.block_on(client::run(&config)).map_err(Into::into)
    } else {
        runtime.block_on(serve(&config))
    };

    // Anything still running past the drain is aborted here.
    runtime.shutdown_timeout(ABORT_GRACE);
    result
}

async fn serve(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let service = Service::from_config(config)?;
    let listener = Listener::bind(&config.address(), config.backlog)?;
    info!(
        address = %listener.local_addr()?,
        protocol = ?config.protocol,
        backlog = config.backlog,
        "Listening"
    );

    let server = Server::new(listener, service, config);
    let coordinator = Shutdown::new();
    tokio::spawn(shutdown::listen_for_signals(coordinator.clone()));

    let remaining = server.run(coordinator.subscribe()).await;
    if remaining > 0 {
        warn!(remaining, "Aborting connections still open");
    }
    info!("Server stopped");
    Ok(())
}
