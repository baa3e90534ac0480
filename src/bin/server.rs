//! acqbus Server Binary
//!
//! Starts the acquisition bus broker.

use std::sync::Arc;

use acqbus::network::Server;
use acqbus::{Config, Dispatcher};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

/// Acquisition bus broker
#[derive(Parser, Debug)]
#[command(name = "acqbus-server")]
#[command(about = "Central acquisition bus broker")]
#[command(version)]
struct Args {
    /// Unix socket path to listen on
    #[arg(short, long, default_value = "/tmp/acqbus.sock")]
    socket: String,

    /// Per-connection outbound queue capacity (frames)
    #[arg(short, long, default_value = "4096")]
    queue_capacity: usize,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,acqbus=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("acqbus Server v{}", acqbus::VERSION);
    tracing::info!("Socket path: {}", args.socket);

    // Build config from args
    let config = Config::builder()
        .socket_path(&args.socket)
        .outbound_queue_capacity(args.queue_capacity)
        .build();

    let dispatcher = Arc::new(Dispatcher::new(&config));

    // Start server
    let mut server = Server::new(config, dispatcher);
    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}
