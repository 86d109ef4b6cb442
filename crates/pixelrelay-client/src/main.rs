//! pixelrelay client - send an image to a pixelrelay server and save the result.
//!
//! ```text
//! pixelrelay-client test
//! pixelrelay-client blur photo.png 3 4
//! pixelrelay-client downscale photo.png 300 200 2
//! ```
//!
//! Arguments are validated before any connection is opened; malformed input
//! exits non-zero.

use clap::{Parser, Subcommand};
use pixelrelay_core::{
    process_file_locally, ErrorCategory, ImageClient, ImageConfig, ProtocolConfig, RelayError,
    Transform,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "pixelrelay-client")]
#[command(about = "Offload image transforms to a pixelrelay server")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = ProtocolConfig::DEFAULT_SERVER_ADDR)]
    server: String,

    /// Where to save the processed image
    #[arg(short, long, default_value = ImageConfig::DEFAULT_OUTPUT_PATH)]
    output: PathBuf,

    /// Apply the transform in-process instead of contacting a server
    #[arg(long)]
    local: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Ask the server to run its performance tests
    Test,
    /// Box blur with the given radius
    #[command(alias = "gblur")]
    Blur {
        image: PathBuf,
        radius: u32,
        /// Number of row workers
        workers: Option<usize>,
    },
    /// Nearest-neighbor downscale to an exact size
    Downscale {
        image: PathBuf,
        #[arg(value_parser = clap::value_parser!(u32).range(1..))]
        width: u32,
        #[arg(value_parser = clap::value_parser!(u32).range(1..))]
        height: u32,
        /// Number of row workers
        workers: Option<usize>,
    },
}

impl Command {
    /// The transform, input image and worker count for image commands.
    fn transform(&self) -> Option<(Transform, &PathBuf, usize)> {
        match self {
            Command::Test => None,
            Command::Blur {
                image,
                radius,
                workers,
            } => Some((
                Transform::Blur { radius: *radius },
                image,
                workers.unwrap_or(1).max(1),
            )),
            Command::Downscale {
                image,
                width,
                height,
                workers,
            } => Some((
                Transform::Downscale {
                    width: *width,
                    height: *height,
                },
                image,
                workers.unwrap_or(1).max(1),
            )),
        }
    }
}

async fn run(args: Args) -> pixelrelay_core::Result<()> {
    let Some((transform, image, workers)) = args.command.transform() else {
        if args.local {
            return Err(RelayError::invalid_parameter(
                "local",
                "the test command needs a server",
            ));
        }
        let report = ImageClient::new(&args.server).benchmark().await?;
        println!("=== SERVER TEST RESULTS ===");
        println!("{}", report);
        return Ok(());
    };

    if args.local {
        process_file_locally(transform, workers, image, &args.output).await?;
    } else {
        let client = ImageClient::new(&args.server);
        debug!("Sending {} to {}", transform, client.addr());
        client
            .process_file(transform, workers, image, &args.output)
            .await?;
    }

    println!("Processed image saved: {}", args.output.display());
    Ok(())
}

fn exit_code(err: &RelayError) -> u8 {
    match err.category() {
        ErrorCategory::Parameter => 2,
        ErrorCategory::Connection | ErrorCategory::Frame => 3,
        ErrorCategory::Io => 4,
        ErrorCategory::Decode | ErrorCategory::Internal => 1,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::WARN };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}
