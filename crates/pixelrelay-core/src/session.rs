//! Server-side handling of a single connection.
//!
//! A session reads one request line, then either runs the benchmark or reads
//! one image frame and transforms it, and writes exactly one response frame.
//! Any failure ends the session without a response; the process carries on.
//!
//! ```text
//! request line ─┬─ test ──────────────► benchmark ─► text frame
//!               ├─ blur | downscale ──► payload ─► decode ─► transform ─► encode ─► image frame
//!               └─ anything else ─────► close
//! ```

use crate::bench::run_benchmark;
use crate::codec::{ImageCodec, PngCodec};
use crate::config::{BenchmarkConfig, ProtocolConfig};
use crate::pool::WorkerPool;
use crate::protocol::{read_framed_payload_limited, read_request_line, write_framed_payload, Request};
use crate::transform::Transform;
use crate::{RelayError, Result};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

/// Read-only settings shared by every session of one server.
#[derive(Clone)]
pub struct SessionContext {
    pub codec: Arc<dyn ImageCodec>,
    pub benchmark: BenchmarkConfig,
    pub max_payload_bytes: usize,
}

impl SessionContext {
    pub fn new(benchmark: BenchmarkConfig) -> Self {
        Self {
            codec: Arc::new(PngCodec::new()),
            benchmark,
            max_payload_bytes: ProtocolConfig::MAX_PAYLOAD_BYTES,
        }
    }

    pub fn with_max_payload_bytes(mut self, max: usize) -> Self {
        self.max_payload_bytes = max;
        self
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("benchmark", &self.benchmark)
            .field("max_payload_bytes", &self.max_payload_bytes)
            .finish_non_exhaustive()
    }
}

/// What a completed session sent back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Encoded image bytes were sent.
    Image {
        transform: Transform,
        workers: usize,
        response_bytes: usize,
    },
    /// A benchmark report was sent.
    Report { response_bytes: usize },
}

/// Serve one connection to completion.
///
/// The stream is dropped (closing the connection) when this returns, whether
/// or not a response was written.
pub async fn handle_session<S>(stream: S, ctx: &SessionContext) -> Result<SessionOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);

    // The request line is validated before any payload is read.
    let request = read_request_line(&mut reader).await?;
    debug!("Session request: {}", request);

    let outcome = match request {
        Request::Benchmark => {
            let report = run_report(ctx).await?;
            write_framed_payload(&mut writer, report.as_bytes()).await?;
            SessionOutcome::Report {
                response_bytes: report.len(),
            }
        }
        Request::Transform { transform, workers } => {
            let payload = read_framed_payload_limited(&mut reader, ctx.max_payload_bytes).await?;
            debug!("Received {} byte payload", payload.len());

            let encoded = run_transform(ctx, transform, workers, payload).await?;
            write_framed_payload(&mut writer, &encoded).await?;
            SessionOutcome::Image {
                transform,
                workers,
                response_bytes: encoded.len(),
            }
        }
    };

    writer.shutdown().await.map_err(RelayError::connection)?;
    Ok(outcome)
}

async fn run_report(ctx: &SessionContext) -> Result<String> {
    let config = ctx.benchmark.clone();
    let codec = ctx.codec.clone();
    tokio::task::spawn_blocking(move || run_benchmark(&config, codec.as_ref()))
        .await
        .map_err(|e| RelayError::WorkerPanicked {
            message: e.to_string(),
        })
}

/// Decode, transform and re-encode off the async runtime.
async fn run_transform(
    ctx: &SessionContext,
    transform: Transform,
    workers: usize,
    payload: Vec<u8>,
) -> Result<Vec<u8>> {
    let codec = ctx.codec.clone();
    tokio::task::spawn_blocking(move || {
        let source = codec.decode(&payload)?;
        drop(payload);
        let output = transform.apply(&source, &WorkerPool::new(workers))?;
        codec.encode(&output)
    })
    .await
    .map_err(|e| RelayError::WorkerPanicked {
        message: e.to_string(),
    })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::PixelBuffer;
    use crate::protocol::{read_framed_payload, read_to_close, write_request_line};
    use tokio::io::{duplex, AsyncReadExt};

    fn context() -> Arc<SessionContext> {
        Arc::new(SessionContext::new(BenchmarkConfig {
            reference_image: "/nonexistent/test_image.png".into(),
            ..Default::default()
        }))
    }

    fn spawn_session(
        ctx: Arc<SessionContext>,
    ) -> (
        tokio::io::DuplexStream,
        tokio::task::JoinHandle<Result<SessionOutcome>>,
    ) {
        let (client, server) = duplex(4096);
        let handle = tokio::spawn(async move { handle_session(server, &ctx).await });
        (client, handle)
    }

    #[tokio::test]
    async fn test_blur_white_image() {
        let ctx = context();
        let codec = PngCodec::new();
        let white = PixelBuffer::filled(4, 4, [255, 255, 255, 255]);
        let (client, session) = spawn_session(ctx);
        let (rx, mut tx) = tokio::io::split(client);

        write_request_line(&mut tx, &Request::blur(1, 4)).await.unwrap();
        write_framed_payload(&mut tx, &codec.encode(&white).unwrap())
            .await
            .unwrap();

        let mut rx = BufReader::new(rx);
        let response = read_framed_payload(&mut rx).await.unwrap();
        assert_eq!(codec.decode(&response).unwrap(), white);

        let outcome = session.await.unwrap().unwrap();
        assert!(matches!(outcome, SessionOutcome::Image { workers: 4, .. }));
    }

    #[tokio::test]
    async fn test_unknown_algorithm_closes_without_response() {
        let (mut client, session) = spawn_session(context());
        client.write_all(b"sharpen 3\n").await.unwrap();

        let err = session.await.unwrap().unwrap_err();
        assert!(matches!(err, RelayError::UnknownAlgorithm { .. }));
        assert!(read_to_close(&mut client).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_parameters_close_before_payload() {
        let (mut client, session) = spawn_session(context());
        // No payload is ever sent; the session must not wait for one.
        client.write_all(b"downscale 10\n").await.unwrap();

        let err = session.await.unwrap().unwrap_err();
        assert!(matches!(err, RelayError::InvalidParameter { .. }));
        assert!(read_to_close(&mut client).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_downscale_target_closes_before_payload() {
        let (mut client, session) = spawn_session(context());
        client.write_all(b"downscale 4000000000 1\n").await.unwrap();

        let err = session.await.unwrap().unwrap_err();
        assert!(matches!(err, RelayError::TargetTooLarge { .. }));
        assert!(read_to_close(&mut client).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_payload_over_context_limit_is_rejected() {
        let ctx = Arc::new(SessionContext::new(BenchmarkConfig::default()).with_max_payload_bytes(16));
        let (mut client, session) = spawn_session(ctx);
        client.write_all(b"blur 1\n17\n").await.unwrap();

        let err = session.await.unwrap().unwrap_err();
        assert!(matches!(err, RelayError::FrameTooLarge { size: 17, max: 16 }));
        assert!(read_to_close(&mut client).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_huge_worker_count_is_capped() {
        let codec = PngCodec::new();
        let tall = PixelBuffer::filled(1, 2_000, [10, 20, 30, 255]);
        let (client, session) = spawn_session(context());
        let (rx, mut tx) = tokio::io::split(client);
        tx.write_all(b"blur 1 1000000\n").await.unwrap();
        write_framed_payload(&mut tx, &codec.encode(&tall).unwrap())
            .await
            .unwrap();

        let mut rx = BufReader::new(rx);
        let response = read_framed_payload(&mut rx).await.unwrap();
        assert_eq!(codec.decode(&response).unwrap(), tall);

        let outcome = session.await.unwrap().unwrap();
        assert!(matches!(
            outcome,
            SessionOutcome::Image { workers, .. } if workers == ProtocolConfig::MAX_WORKERS
        ));
    }

    #[tokio::test]
    async fn test_malformed_length_header() {
        let (mut client, session) = spawn_session(context());
        client.write_all(b"blur 1\nnot-a-number\n").await.unwrap();

        let err = session.await.unwrap().unwrap_err();
        assert!(matches!(err, RelayError::InvalidFrameHeader { .. }));
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_payload_sends_nothing() {
        let (client, session) = spawn_session(context());
        let (mut rx, mut tx) = tokio::io::split(client);
        write_request_line(&mut tx, &Request::blur(1, 1)).await.unwrap();
        write_framed_payload(&mut tx, b"garbage").await.unwrap();

        let err = session.await.unwrap().unwrap_err();
        assert!(matches!(err, RelayError::Decode { .. }));
        assert!(read_to_close(&mut rx).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_downscale_target_is_rejected() {
        let codec = PngCodec::new();
        let (client, session) = spawn_session(context());
        let (mut rx, mut tx) = tokio::io::split(client);
        tx.write_all(b"downscale 0 5\n").await.unwrap();
        write_framed_payload(&mut tx, &codec.encode(&PixelBuffer::filled(3, 3, [0; 4])).unwrap())
            .await
            .unwrap();

        let err = session.await.unwrap().unwrap_err();
        assert!(matches!(err, RelayError::InvalidDimensions { .. }));
        assert!(read_to_close(&mut rx).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_benchmark_error_report_is_sent_as_text() {
        let (client, session) = spawn_session(context());
        let (rx, mut tx) = tokio::io::split(client);
        write_request_line(&mut tx, &Request::Benchmark).await.unwrap();

        let mut rx = BufReader::new(rx);
        let response = read_framed_payload(&mut rx).await.unwrap();
        let text = String::from_utf8(response).unwrap();
        assert!(text.contains("Failed to run benchmark"));

        assert!(matches!(
            session.await.unwrap().unwrap(),
            SessionOutcome::Report { .. }
        ));
    }
}
