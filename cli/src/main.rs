//! CIPHERNET CLI
//!
//! Run one end of a privacy-preserving inference session.
//!
//! # Usage
//!
//! ```bash
//! # Serve the demo ReLU pipeline with the reference parameters
//! ciphernet server --addr 127.0.0.1:34000
//!
//! # Submit an encrypted input vector
//! ciphernet client --addr 127.0.0.1:34000 --inputs 1.0,2.0,-3.0,0.5
//!
//! # Degraded-privacy mode without garbled circuits
//! ciphernet server --addr 127.0.0.1:34000 --no-gc
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;
mod logging;

use commands::{ClientCommand, ServerCommand};

/// CIPHERNET node
#[derive(Parser)]
#[command(name = "ciphernet")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Hybrid HE/2PC private neural-network inference", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "CIPHERNET_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the model-owner side
    Server(ServerCommand),

    /// Run the data-owner side
    Client(ClientCommand),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level, cli.json_logs)?;
    let file_config = config::CipherNetConfig::load_optional(cli.config.as_deref())?;

    match cli.command {
        Commands::Server(cmd) => cmd.execute(file_config).await,
        Commands::Client(cmd) => cmd.execute(file_config).await,
        Commands::Version => {
            println!("ciphernet {}", env!("CARGO_PKG_VERSION"));
            println!("Protocol: CIPHERNET v1");
            Ok(())
        }
    }
}
