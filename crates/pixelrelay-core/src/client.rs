//! TCP client for the image server.
//!
//! Each call opens a fresh connection, sends one request, and reads one
//! response frame. There are no retries: a failed dial, read or write is
//! returned to the caller as-is.

use crate::codec::{save_image, ImageCodec, PngCodec};
use crate::pool::WorkerPool;
use crate::protocol::{read_framed_payload, write_framed_payload, write_request_line, Request};
use crate::transform::Transform;
use crate::{RelayError, Result};
use std::path::Path;
use tokio::io::BufReader;
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, info};

/// Client bound to one server address.
#[derive(Debug, Clone)]
pub struct ImageClient {
    addr: String,
}

impl ImageClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn connect(&self) -> Result<TcpStream> {
        dial(&self.addr).await
    }

    /// Send image bytes for `transform` and return the encoded result.
    pub async fn transform(&self, transform: Transform, workers: usize, image: &[u8]) -> Result<Vec<u8>> {
        let request = Request::Transform {
            transform,
            workers: workers.max(1),
        };
        let mut stream = self.connect().await?;
        let (reader, mut writer) = stream.split();

        write_request_line(&mut writer, &request).await?;
        write_framed_payload(&mut writer, image).await?;
        debug!("Sent {} ({} bytes) to {}", request, image.len(), self.addr);

        let mut reader = BufReader::new(reader);
        read_framed_payload(&mut reader).await
    }

    /// Ask the server to run its benchmark and return the text report.
    pub async fn benchmark(&self) -> Result<String> {
        let mut stream = self.connect().await?;
        let (reader, mut writer) = stream.split();

        write_request_line(&mut writer, &Request::Benchmark).await?;

        let mut reader = BufReader::new(reader);
        let bytes = read_framed_payload(&mut reader).await?;
        String::from_utf8(bytes).map_err(|e| RelayError::Decode {
            message: format!("benchmark report is not UTF-8: {}", e),
            source: None,
        })
    }

    /// Send the file at `input` and save the response to `output`.
    pub async fn process_file(
        &self,
        transform: Transform,
        workers: usize,
        input: &Path,
        output: &Path,
    ) -> Result<usize> {
        let image = tokio::fs::read(input)
            .await
            .map_err(|e| RelayError::io_with_path(e, input))?;
        let result = self.transform(transform, workers, &image).await?;
        tokio::fs::write(output, &result)
            .await
            .map_err(|e| RelayError::io_with_path(e, output))?;
        info!("Saved processed image to {}", output.display());
        Ok(result.len())
    }
}

async fn dial(addr: impl ToSocketAddrs) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr).await.map_err(|e| RelayError::Connection {
        message: format!("cannot reach server: {}", e),
        source: Some(e),
    })?;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

/// Apply `transform` in-process and save a PNG, without a server.
pub async fn process_file_locally(
    transform: Transform,
    workers: usize,
    input: &Path,
    output: &Path,
) -> Result<()> {
    let input = input.to_path_buf();
    let output = output.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let codec = PngCodec::new();
        let bytes = std::fs::read(&input).map_err(|e| RelayError::io_with_path(e, &input))?;
        let source = codec.decode(&bytes)?;
        let result = transform.apply(&source, &WorkerPool::new(workers))?;
        save_image(&codec, &result, &output)?;
        info!(
            "Applied {} locally to {} -> {}",
            transform,
            input.display(),
            output.display()
        );
        Ok::<(), RelayError>(())
    })
    .await
    .map_err(|e| RelayError::WorkerPanicked {
        message: e.to_string(),
    })?
}
