//! Error types for pixelrelay.
//!
//! One enum carries every failure the protocol, the transform engine and the
//! acceptor can produce. Each variant belongs to an [`ErrorCategory`], which is
//! what callers branch on: a session is torn down for any of them, while the
//! client binary maps the category to its exit code.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for pixelrelay.
#[derive(Debug, Error)]
pub enum RelayError {
    // Transport errors
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Connection closed by peer")]
    ConnectionClosed,

    // Framing errors
    #[error("Invalid frame header: {header:?}")]
    InvalidFrameHeader { header: String },

    #[error("Truncated frame: expected {expected} bytes, received {received}")]
    TruncatedFrame { expected: usize, received: usize },

    #[error("Frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("{what} exceeds maximum length of {max} bytes")]
    LineTooLong { what: &'static str, max: usize },

    // Image codec errors
    #[error("Image decode error: {message}")]
    Decode {
        message: String,
        #[source]
        source: Option<image::ImageError>,
    },

    #[error("Image encode error: {message}")]
    Encode {
        message: String,
        #[source]
        source: Option<image::ImageError>,
    },

    #[error("Image of {width}x{height} exceeds the limit of {max_pixels} pixels")]
    ImageTooLarge {
        width: u32,
        height: u32,
        max_pixels: u64,
    },

    // Request parameter errors
    #[error("Unknown algorithm: {name}")]
    UnknownAlgorithm { name: String },

    #[error("Invalid parameter {field}: {message}")]
    InvalidParameter { field: String, message: String },

    #[error("Invalid target dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Target {width}x{height} exceeds the limit of {max_pixels} pixels")]
    TargetTooLarge {
        width: u32,
        height: u32,
        max_pixels: u64,
    },

    #[error("Cannot sample from an empty {width}x{height} source image")]
    EmptySource { width: u32, height: u32 },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Worker pool errors
    #[error("Row worker panicked: {message}")]
    WorkerPanicked { message: String },

    #[error("Failed to spawn row worker: {message}")]
    WorkerSpawn {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for pixelrelay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Coarse classification of a [`RelayError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Dial, accept, read or write failure on the transport.
    Connection,
    /// Malformed or truncated framing.
    Frame,
    /// Payload bytes are not a usable image.
    Decode,
    /// Missing or invalid request parameters.
    Parameter,
    /// Local file access.
    Io,
    /// Everything else.
    Internal,
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl RelayError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        RelayError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Wrap a transport failure.
    ///
    /// An unexpected EOF is reported as [`RelayError::ConnectionClosed`].
    pub fn connection(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            return RelayError::ConnectionClosed;
        }
        RelayError::Connection {
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Create a parameter error for a named field.
    pub fn invalid_parameter(field: impl Into<String>, message: impl Into<String>) -> Self {
        RelayError::InvalidParameter {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            RelayError::Connection { .. } | RelayError::ConnectionClosed => {
                ErrorCategory::Connection
            }

            RelayError::InvalidFrameHeader { .. }
            | RelayError::TruncatedFrame { .. }
            | RelayError::FrameTooLarge { .. }
            | RelayError::LineTooLong { .. } => ErrorCategory::Frame,

            RelayError::Decode { .. } | RelayError::ImageTooLarge { .. } => ErrorCategory::Decode,

            RelayError::UnknownAlgorithm { .. }
            | RelayError::InvalidParameter { .. }
            | RelayError::InvalidDimensions { .. }
            | RelayError::TargetTooLarge { .. }
            | RelayError::EmptySource { .. } => ErrorCategory::Parameter,

            RelayError::Io { .. } => ErrorCategory::Io,

            _ => ErrorCategory::Internal,
        }
    }

    /// Whether the failure originated from the peer's input rather than
    /// from this process.
    pub fn is_peer_fault(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Frame | ErrorCategory::Decode | ErrorCategory::Parameter
        )
    }
}
