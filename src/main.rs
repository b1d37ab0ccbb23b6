//! telemetry-server: TCP telemetry service
//!
//! Features:
//! - Delimiter-framed text protocol, one exchange at a time per connection
//! - Synthetic telemetry with a damped random walk and diurnal cycle
//! - Descriptive statistics and linear trend prediction over stored samples
//! - Configuration via CLI arguments or TOML file

use telemetry_server::config::Config;
use telemetry_server::server::Server;
use tokio::runtime::{Builder, Runtime};
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

    info!(
        listen = %config.listen,
        workers = ?config.workers,
        records = %config.records.display(),
        delimiter = config.delimiter,
        metricks = ?config.metricks,
        "Starting telemetry server"
    );

    let runtime = build_runtime(config.workers)?;
    let server = Server::new(config);
    runtime.block_on(server.run())?;
    Ok(())
}

/// A single event loop unless more than one worker is configured.
fn build_runtime(workers: Option<usize>) -> std::io::Result<Runtime> {
    match workers {
        Some(n) if n > 1 => {
            info!(workers = n, "Using multi-threaded runtime");
            Builder::new_multi_thread()
                .worker_threads(n)
                .enable_all()
                .build()
        }
        _ => {
            info!("Using single-threaded event loop");
            Builder::new_current_thread().enable_all().build()
        }
    }
}
