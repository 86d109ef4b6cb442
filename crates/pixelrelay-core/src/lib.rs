//! pixelrelay core - offload pixel transforms to a server over TCP.
//!
//! A client sends a one-line request (`blur 3 8`, `downscale 300 200 2`,
//! `test`) followed, for image requests, by a length-prefixed image frame. The
//! server decodes the image, applies the transform across a bounded pool of
//! row workers, and answers with one length-prefixed frame.
//!
//! # Example
//!
//! ```rust,ignore
//! use pixelrelay_core::{ImageClient, ImageServer, ServerConfig, Transform};
//!
//! #[tokio::main]
//! async fn main() -> pixelrelay_core::Result<()> {
//!     let server = ImageServer::start(&ServerConfig::default()).await?;
//!
//!     let client = ImageClient::new(server.addr().to_string());
//!     let png = std::fs::read("photo.png")?;
//!     let blurred = client.transform(Transform::Blur { radius: 3 }, 4, &png).await?;
//!     std::fs::write("photo-blurred.png", blurred)?;
//!
//!     Ok(())
//! }
//! ```

pub mod bench;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod pixel;
pub mod pool;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transform;

// Re-export commonly used types
pub use bench::{run_benchmark, BenchmarkReport, BenchmarkRow};
pub use client::{process_file_locally, ImageClient};
pub use codec::{ImageCodec, PngCodec};
pub use config::{BenchmarkConfig, ImageConfig, ProtocolConfig, ServerConfig};
pub use error::{ErrorCategory, RelayError, Result};
pub use pixel::{PixelBuffer, Rgba};
pub use pool::WorkerPool;
pub use protocol::Request;
pub use server::{ImageServer, ServerHandle};
pub use session::{handle_session, SessionContext, SessionOutcome};
pub use transform::{blur, downscale, Transform};
