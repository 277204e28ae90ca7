//! Mirror server CLI binary.

use anyhow::Result;
use clap::{Parser, Subcommand};
use crates_mirror_server::{run_server, Config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mirror-server")]
#[command(about = "Cargo sparse-registry mirror server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the mirror server
    Start {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for artifact storage
        #[arg(long)]
        data: Option<PathBuf>,

        /// Configuration file path
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            host,
            port,
            data,
            config,
        } => {
            let mut config = Config::load_or_default(&config)?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data) = data {
                config.storage.data_dir = data;
            }
            run_server(config).await
        }
    }
}
