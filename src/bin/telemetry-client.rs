//! Interactive client for the telemetry server.
//!
//! Reads requests from stdin, one per line, and prints each response.
//! Typing `exit` closes the connection.

use clap::Parser;
use std::io;
use telemetry_server::client::{spawn_input_thread, Client};
use telemetry_server::config::DEFAULT_DELIMITER;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the telemetry client
#[derive(Parser, Debug)]
#[command(name = "telemetry-client")]
#[command(version)]
#[command(about = "Interactive client for the telemetry server", long_about = None)]
struct ClientArgs {
    /// Server host name or address
    host: String,

    /// Server port
    port: u16,

    /// Terminator byte for requests and responses
    #[arg(short = 'd', long, default_value_t = DEFAULT_DELIMITER)]
    delimiter: u8,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = ClientArgs::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (mut client, handle) = Client::connect(&args.host, args.port, args.delimiter, tx).await?;
        info!(host = %args.host, port = args.port, "Connected to server");

        // Blocking stdin reads stay off the event loop.
        spawn_input_thread(io::BufReader::new(io::stdin()), handle);

        let printer = tokio::spawn(async move {
            while let Some(response) = rx.recv().await {
                println!("Received: {response}");
            }
        });

        let result = client.run().await;
        drop(client);
        let _ = printer.await;
        result
    })?;

    Ok(())
}
