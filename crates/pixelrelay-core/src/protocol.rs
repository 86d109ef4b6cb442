//! Wire protocol: request line and length-prefixed frames.
//!
//! ```text
//! client → server   <algorithm> <param>...\n
//! client → server   <len>\n<len bytes>            (omitted for `test`)
//! server → client   <len>\n<len bytes>            (image, or UTF-8 report)
//! ```
//!
//! The length header is decimal ASCII. Payloads are read by byte count, never
//! by delimiter, so they may contain any byte value.

use crate::config::ProtocolConfig;
use crate::transform::{check_target_size, Transform};
use crate::{RelayError, Result};
use std::fmt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A parsed request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Transform the image payload that follows.
    Transform { transform: Transform, workers: usize },
    /// Run the server benchmark; no payload follows.
    Benchmark,
}

impl Request {
    /// Worker counts are clamped to `1..=ProtocolConfig::MAX_WORKERS`.
    pub fn blur(radius: u32, workers: usize) -> Self {
        Request::Transform {
            transform: Transform::Blur { radius },
            workers: workers.clamp(1, ProtocolConfig::MAX_WORKERS),
        }
    }

    pub fn downscale(width: u32, height: u32, workers: usize) -> Self {
        Request::Transform {
            transform: Transform::Downscale { width, height },
            workers: workers.clamp(1, ProtocolConfig::MAX_WORKERS),
        }
    }

    /// Whether an image payload frame follows this request line.
    pub fn expects_payload(&self) -> bool {
        matches!(self, Request::Transform { .. })
    }

    /// Parse a request line (without its trailing newline).
    ///
    /// `gblur` is accepted as an alias of `blur`.
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let algorithm = parts.next().unwrap_or_default();
        let params: Vec<&str> = parts.collect();

        match algorithm {
            "test" => {
                expect_arity(algorithm, &params, 0, 0)?;
                Ok(Request::Benchmark)
            }
            "blur" | "gblur" => {
                expect_arity(algorithm, &params, 1, 2)?;
                let radius = parse_int("radius", params[0])?;
                let workers = parse_workers(params.get(1).copied())?;
                // Negative radii degenerate to the identity.
                let radius = u32::try_from(radius.max(0)).unwrap_or(u32::MAX);
                Ok(Request::blur(radius, workers))
            }
            "downscale" => {
                expect_arity(algorithm, &params, 2, 3)?;
                let width = parse_dimension("width", params[0])?;
                let height = parse_dimension("height", params[1])?;
                let workers = parse_workers(params.get(2).copied())?;
                check_target_size(width, height)?;
                Ok(Request::downscale(width, height, workers))
            }
            "" => Err(RelayError::invalid_parameter("algorithm", "empty request line")),
            other => Err(RelayError::UnknownAlgorithm {
                name: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Transform { transform, workers } => write!(f, "{} {}", transform, workers),
            Request::Benchmark => write!(f, "test"),
        }
    }
}

fn expect_arity(algorithm: &str, params: &[&str], min: usize, max: usize) -> Result<()> {
    if params.len() < min || params.len() > max {
        let expected = if min == max {
            format!("{}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(RelayError::invalid_parameter(
            algorithm,
            format!("expected {} parameters, got {}", expected, params.len()),
        ));
    }
    Ok(())
}

fn parse_int(field: &str, value: &str) -> Result<i64> {
    value
        .parse::<i64>()
        .map_err(|_| RelayError::invalid_parameter(field, format!("{:?} is not an integer", value)))
}

fn parse_dimension(field: &str, value: &str) -> Result<u32> {
    let n = parse_int(field, value)?;
    u32::try_from(n).map_err(|_| {
        RelayError::invalid_parameter(field, format!("{} is not a valid dimension", n))
    })
}

/// Absent or non-positive worker counts mean serial execution. Large counts
/// are capped by the request constructors.
fn parse_workers(value: Option<&str>) -> Result<usize> {
    match value {
        None => Ok(1),
        Some(v) => {
            let n = parse_int("workers", v)?;
            Ok(usize::try_from(n).unwrap_or(0).max(1))
        }
    }
}

/// Write `"<request>\n"`.
pub async fn write_request_line<W: AsyncWrite + Unpin>(writer: &mut W, request: &Request) -> Result<()> {
    let line = format!("{}\n", request);
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(RelayError::connection)?;
    writer.flush().await.map_err(RelayError::connection)
}

/// Read and parse one request line.
pub async fn read_request_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Request> {
    let line = read_line_limited(reader, ProtocolConfig::MAX_REQUEST_LINE_BYTES, "request line")
        .await?
        .ok_or(RelayError::ConnectionClosed)?;
    let line = String::from_utf8(line)
        .map_err(|_| RelayError::invalid_parameter("request line", "not valid UTF-8"))?;
    Request::parse(&line)
}

/// Write `"<len>\n"` followed by `payload`, flushing once at the end.
pub async fn write_framed_payload<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let header = format!("{}\n", payload.len());
    writer
        .write_all(header.as_bytes())
        .await
        .map_err(RelayError::connection)?;
    writer
        .write_all(payload)
        .await
        .map_err(RelayError::connection)?;
    writer.flush().await.map_err(RelayError::connection)
}

/// Read one frame with the default payload ceiling.
pub async fn read_framed_payload<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    read_framed_payload_limited(reader, ProtocolConfig::MAX_PAYLOAD_BYTES).await
}

/// Read `"<len>\n"` and then exactly `len` bytes.
///
/// Short reads are retried until the full count arrives. A stream that ends
/// early yields [`RelayError::TruncatedFrame`].
pub async fn read_framed_payload_limited<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max_len: usize,
) -> Result<Vec<u8>> {
    let header = read_line_limited(reader, ProtocolConfig::MAX_LENGTH_HEADER_BYTES, "length header")
        .await?
        .ok_or(RelayError::ConnectionClosed)?;

    let len: usize = std::str::from_utf8(&header)
        .ok()
        .and_then(|h| h.trim().parse().ok())
        .ok_or_else(|| RelayError::InvalidFrameHeader {
            header: String::from_utf8_lossy(&header).into_owned(),
        })?;

    if len > max_len {
        return Err(RelayError::FrameTooLarge {
            size: len,
            max: max_len,
        });
    }

    let mut payload = vec![0u8; len];
    let mut received = 0;
    while received < len {
        let n = reader
            .read(&mut payload[received..])
            .await
            .map_err(RelayError::connection)?;
        if n == 0 {
            return Err(RelayError::TruncatedFrame {
                expected: len,
                received,
            });
        }
        received += n;
    }

    Ok(payload)
}

/// Read up to and including `\n`, at most `max` bytes.
///
/// Returns `None` on a clean EOF before any byte arrives. The returned line
/// has its `\n` (and a preceding `\r`) stripped.
async fn read_line_limited<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max: usize,
    what: &'static str,
) -> Result<Option<Vec<u8>>> {
    let mut buf = Vec::new();
    let mut limited = (&mut *reader).take(max as u64);
    let n = limited
        .read_until(b'\n', &mut buf)
        .await
        .map_err(RelayError::connection)?;

    if n == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') {
        if buf.len() >= max {
            return Err(RelayError::LineTooLong { what, max });
        }
        return Err(RelayError::ConnectionClosed);
    }

    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }

    Ok(Some(buf))
}

/// Read everything until EOF. Used to detect that a peer closed without
/// sending a frame.
pub async fn read_to_close<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut rest = Vec::new();
    reader
        .read_to_end(&mut rest)
        .await
        .map_err(RelayError::connection)?;
    Ok(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, BufReader};

    #[test]
    fn test_parse_blur() {
        assert_eq!(Request::parse("blur 3").unwrap(), Request::blur(3, 1));
        assert_eq!(Request::parse("blur 3 8").unwrap(), Request::blur(3, 8));
        assert_eq!(Request::parse("gblur 2 4").unwrap(), Request::blur(2, 4));
    }

    #[test]
    fn test_parse_blur_negative_radius_is_identity() {
        assert_eq!(Request::parse("blur -5").unwrap(), Request::blur(0, 1));
    }

    #[test]
    fn test_parse_workers_default_to_one() {
        assert_eq!(Request::parse("blur 1 0").unwrap(), Request::blur(1, 1));
        assert_eq!(Request::parse("blur 1 -3").unwrap(), Request::blur(1, 1));
        assert_eq!(
            Request::parse("downscale 10 20").unwrap(),
            Request::downscale(10, 20, 1)
        );
    }

    #[test]
    fn test_parse_downscale() {
        assert_eq!(
            Request::parse("downscale 300 200 2").unwrap(),
            Request::downscale(300, 200, 2)
        );
    }

    #[test]
    fn test_parse_caps_worker_count() {
        assert_eq!(
            Request::parse("blur 1 1000000").unwrap(),
            Request::blur(1, ProtocolConfig::MAX_WORKERS)
        );
        assert!(matches!(
            Request::parse("downscale 10 10 99999999999").unwrap(),
            Request::Transform { workers, .. } if workers == ProtocolConfig::MAX_WORKERS
        ));
    }

    #[test]
    fn test_parse_downscale_rejects_oversized_target() {
        let err = Request::parse("downscale 4000000000 1").unwrap_err();
        assert!(matches!(err, RelayError::TargetTooLarge { width: 4_000_000_000, height: 1, .. }));
        assert!(Request::parse("downscale 4294967295 4294967295 8").is_err());
        assert!(Request::parse("downscale 0 5").is_ok());
    }

    #[test]
    fn test_parse_downscale_rejects_negative_dimension() {
        let err = Request::parse("downscale -1 20").unwrap_err();
        assert!(matches!(err, RelayError::InvalidParameter { ref field, .. } if field == "width"));
    }

    #[test]
    fn test_parse_test_request() {
        assert_eq!(Request::parse("test").unwrap(), Request::Benchmark);
        assert!(!Request::Benchmark.expects_payload());
        assert!(Request::parse("test 1").is_err());
    }

    #[test]
    fn test_parse_arity_errors() {
        assert!(Request::parse("blur").is_err());
        assert!(Request::parse("blur 1 2 3").is_err());
        assert!(Request::parse("downscale 10").is_err());
        assert!(Request::parse("downscale 1 2 3 4").is_err());
    }

    #[test]
    fn test_parse_non_integer() {
        let err = Request::parse("blur abc").unwrap_err();
        assert!(matches!(err, RelayError::InvalidParameter { ref field, .. } if field == "radius"));
        assert!(Request::parse("downscale 10 20 many").is_err());
    }

    #[test]
    fn test_parse_unknown_algorithm() {
        let err = Request::parse("sharpen 3").unwrap_err();
        assert!(matches!(err, RelayError::UnknownAlgorithm { ref name } if name == "sharpen"));
        assert!(Request::parse("").is_err());
    }

    #[test]
    fn test_request_display_roundtrips_through_parse() {
        for req in [
            Request::blur(4, 2),
            Request::downscale(640, 480, 16),
            Request::Benchmark,
        ] {
            assert_eq!(Request::parse(&req.to_string()).unwrap(), req);
        }
    }

    #[tokio::test]
    async fn test_request_line_over_stream() {
        let mut buf = Vec::new();
        write_request_line(&mut buf, &Request::downscale(5, 6, 7))
            .await
            .unwrap();
        assert_eq!(buf, b"downscale 5 6 7\n");

        let mut reader = BufReader::new(std::io::Cursor::new(b"blur 2 3\r\n".to_vec()));
        assert_eq!(
            read_request_line(&mut reader).await.unwrap(),
            Request::blur(2, 3)
        );
    }

    async fn frame_roundtrip(payload: Vec<u8>) -> Vec<u8> {
        // A tiny pipe forces many partial reads and writes.
        let (mut tx, rx) = duplex(64);
        let sent = payload.clone();
        let writer = tokio::spawn(async move {
            write_framed_payload(&mut tx, &sent).await.unwrap();
        });

        let mut reader = BufReader::with_capacity(16, rx);
        let received = read_framed_payload(&mut reader).await.unwrap();
        writer.await.unwrap();
        received
    }

    #[tokio::test]
    async fn test_frame_roundtrip_sizes() {
        assert_eq!(frame_roundtrip(Vec::new()).await, Vec::<u8>::new());
        assert_eq!(frame_roundtrip(vec![b'\n']).await, vec![b'\n']);

        let large: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(frame_roundtrip(large.clone()).await, large);
    }

    #[tokio::test]
    async fn test_frame_payload_may_contain_newlines() {
        let payload = b"12\n34\n\n5".to_vec();
        assert_eq!(frame_roundtrip(payload.clone()).await, payload);
    }

    #[tokio::test]
    async fn test_frame_header_format() {
        let mut buf = Vec::new();
        write_framed_payload(&mut buf, b"abc").await.unwrap();
        assert_eq!(buf, b"3\nabc");
    }

    #[tokio::test]
    async fn test_frame_invalid_header() {
        for header in ["abc\n", "-4\n", "1.5\n"] {
            let mut reader = BufReader::new(std::io::Cursor::new(header.as_bytes().to_vec()));
            let err = read_framed_payload(&mut reader).await.unwrap_err();
            assert!(
                matches!(err, RelayError::InvalidFrameHeader { .. }),
                "{:?} gave {:?}",
                header,
                err
            );
        }
    }

    #[tokio::test]
    async fn test_frame_non_utf8_header_is_frame_error() {
        let mut reader = BufReader::new(std::io::Cursor::new(vec![0xff, 0xfe, b'\n', b'x']));
        let err = read_framed_payload(&mut reader).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidFrameHeader { .. }), "{:?}", err);
        assert_eq!(err.category(), crate::ErrorCategory::Frame);
    }

    #[tokio::test]
    async fn test_frame_truncated_payload() {
        let mut reader = BufReader::new(std::io::Cursor::new(b"10\nabcd".to_vec()));
        let err = read_framed_payload(&mut reader).await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::TruncatedFrame {
                expected: 10,
                received: 4
            }
        ));
    }

    #[tokio::test]
    async fn test_frame_too_large() {
        let mut reader = BufReader::new(std::io::Cursor::new(b"1000\n".to_vec()));
        let err = read_framed_payload_limited(&mut reader, 999).await.unwrap_err();
        assert!(matches!(err, RelayError::FrameTooLarge { size: 1000, max: 999 }));
    }

    #[tokio::test]
    async fn test_frame_header_without_newline() {
        let mut reader = BufReader::new(std::io::Cursor::new(vec![b'9'; 64]));
        let err = read_framed_payload(&mut reader).await.unwrap_err();
        assert!(matches!(err, RelayError::LineTooLong { .. }));

        let mut reader = BufReader::new(std::io::Cursor::new(b"12".to_vec()));
        let err = read_framed_payload(&mut reader).await.unwrap_err();
        assert!(matches!(err, RelayError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_frame_empty_stream_is_connection_closed() {
        let mut reader = BufReader::new(std::io::Cursor::new(Vec::new()));
        let err = read_framed_payload(&mut reader).await.unwrap_err();
        assert!(matches!(err, RelayError::ConnectionClosed));
    }
}
