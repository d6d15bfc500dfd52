//! Gofer tunnel daemon binary
//!
//! Loads configuration, opens the tunnel interface and forwards traffic
//! until Ctrl+C or until the session fails.

use clap::{Parser, Subcommand};
use gofer::{generate_key_hex, Config, Session};
use std::path::PathBuf;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// Encrypted point-to-point tunnel
#[derive(Parser, Debug)]
#[command(name = "gofer", version, about)]
struct Args {
    /// Path to configuration file (overrides default search paths)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Remote host to connect to (runs as client; omit to run as server)
    #[arg(short, long, value_name = "HOST")]
    remote: Option<String>,

    /// UDP port to listen on or connect to
    #[arg(short, long)]
    port: Option<u16>,

    /// Interface name
    #[arg(short, long)]
    name: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a fresh random pre-shared key
    Genkey,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Some(Command::Genkey) = args.command {
        println!("{}", generate_key_hex());
        return;
    }

    // Initialize logging
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("Gofer starting");

    // Load configuration
    let (mut config, loaded_paths) = if let Some(config_path) = &args.config {
        // Explicit config file specified - load only that file
        match Config::load_file(config_path) {
            Ok(config) => (config, vec![config_path.clone()]),
            Err(e) => {
                error!("Failed to load configuration from {}: {}", config_path.display(), e);
                std::process::exit(1);
            }
        }
    } else {
        match Config::load() {
            Ok(result) => result,
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                std::process::exit(1);
            }
        }
    };

    if loaded_paths.is_empty() {
        info!("No config files found, using defaults");
    } else {
        for path in &loaded_paths {
            info!(path = %path.display(), "Loaded config file");
        }
    }

    // Command-line flags win over files
    if let Some(remote) = args.remote {
        config.transport.remote = Some(remote);
    }
    if let Some(port) = args.port {
        config.transport.port = Some(port);
    }
    if let Some(name) = args.name {
        config.tunnel.name = Some(name);
    }

    let mut session = match Session::new(config) {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to create session: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        role = %session.role(),
        tunnel_local = %session.local_tunnel_addr(),
        tunnel_peer = %session.peer_tunnel_addr(),
        "Session created"
    );

    if let Err(e) = session.start().await {
        error!("Failed to start session: {}", e);
        std::process::exit(1);
    }

    info!("Gofer running, press Ctrl+C to exit");

    let failed = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => error!("Failed to listen for shutdown signal: {}", e),
            }
            false
        }
        _ = session.closed() => {
            warn!("Session terminated");
            true
        }
    };

    info!("Gofer shutting down");
    session.stop().await;

    let stats = session.stats();
    info!(
        rx_packets = stats.rx_packets,
        rx_bytes = stats.rx_bytes,
        tx_packets = stats.tx_packets,
        tx_bytes = stats.tx_bytes,
        duplicates = stats.duplicates,
        "Gofer shutdown complete"
    );

    if failed {
        std::process::exit(1);
    }
}
