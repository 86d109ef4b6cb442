//! pixelrelay server - applies image transforms for remote clients.
//!
//! Listens for framed requests over TCP and serves each connection as an
//! independent session until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use pixelrelay_core::{ImageServer, ServerConfig};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "pixelrelay-server")]
#[command(about = "Image transform server for pixelrelay clients")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reference image used by `test` requests
    #[arg(long)]
    reference_image: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    /// File values first, then command-line overrides.
    fn into_config(self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => ServerConfig::default(),
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(reference) = self.reference_image {
            config.benchmark.reference_image = reference;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let config = args.into_config()?;
    info!("Starting pixelrelay server on port {}", config.port);

    let server = ImageServer::start(&config).await?;

    // Print the bound address for scripts (intentional stdout)
    println!("LISTENING={}", server.addr());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");
    server.close().await;

    Ok(())
}
